// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Data shapes shared by the patcher, the history manager and the session actor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier of a component inside a project AST.
pub type ComponentId = String;

/// Identifier of a project (one session actor per project).
pub type ProjectId = String;

/// Identifier of a registered vibe (theme token set).
pub type VibeId = String;

/// One generated UI component: a markup fragment addressed by `id`.
///
/// The markup carries exactly one element whose id attribute equals `id`;
/// that element's class attribute is the only thing a nudge may rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component identifier (also the id attribute value in `markup`).
    pub id: ComponentId,
    /// Markup fragment.
    pub markup: String,
    /// Class list of the addressed element after the last nudge, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful patch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Component {
    /// Create a component with no recorded class list.
    pub fn new(id: impl Into<ComponentId>, markup: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            markup: markup.into(),
            classes: None,
            created_at: now,
            updated_at: None,
        }
    }
}

/// Mapping from component id to component.
///
/// Components are held behind `Arc` and never mutated in place, so cloning an
/// `Ast` shares every component with the original. Replacing a component only
/// swaps the pointer in *this* map; snapshots that hold the old pointer are
/// unaffected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ast(BTreeMap<ComponentId, Arc<Component>>);

impl Ast {
    /// Empty AST.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a component.
    pub fn get(&self, id: &str) -> Option<&Component> {
        self.0.get(id).map(AsRef::as_ref)
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    /// Insert or replace the component stored under its own id.
    pub fn insert(&mut self, component: Component) -> Option<Arc<Component>> {
        self.0.insert(component.id.clone(), Arc::new(component))
    }

    /// Shallow merge: every component in `partial` overwrites the entry with
    /// the same id (no per-field merge).
    pub fn merge(&mut self, partial: &Ast) {
        for (id, component) in &partial.0 {
            self.0.insert(id.clone(), Arc::clone(component));
        }
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the AST holds no components.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate components in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ComponentId, &Component)> {
        self.0.iter().map(|(id, c)| (id, c.as_ref()))
    }

    /// Whether `self` and `other` share the very same component allocation for `id`.
    pub fn shares_component(&self, other: &Ast, id: &str) -> bool {
        match (self.0.get(id), other.0.get(id)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl FromIterator<Component> for Ast {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        let mut ast = Ast::new();
        for component in iter {
            ast.insert(component);
        }
        ast
    }
}

/// Class tokens to add to and remove from one element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDelta {
    /// Tokens to add.
    #[serde(default)]
    pub add: Vec<String>,
    /// Tokens to remove. Removal wins over addition.
    #[serde(default)]
    pub remove: Vec<String>,
}

impl StyleDelta {
    /// Build a delta from token slices.
    pub fn new<A, R>(add: A, remove: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            add: add.into_iter().map(Into::into).collect(),
            remove: remove.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the delta names no tokens at all.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Persisted session for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Owning project.
    pub project_id: ProjectId,
    /// Active vibe.
    pub vibe_id: VibeId,
    /// Current component AST.
    pub ast: Ast,
    /// Creation time (set once by `init`).
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Fresh session with an empty AST.
    pub fn new(
        project_id: impl Into<ProjectId>,
        vibe_id: impl Into<VibeId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            vibe_id: vibe_id.into(),
            ast: Ast::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
