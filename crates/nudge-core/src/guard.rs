// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Logic guard: nudges may restyle an element, never change what it does.
//!
//! Only `class`, `className` and `style` are modifiable. Event handlers,
//! framework bindings and behavior-bearing form attributes are protected and
//! must survive a rewrite byte-for-byte. The structural check is a tag count,
//! not a tree diff.

use crate::markup::{self, Tag};
use std::collections::BTreeMap;
use std::fmt;

/// Attributes a nudge is allowed to touch.
pub const MODIFIABLE_ATTRIBUTES: [&str; 3] = ["class", "className", "style"];

/// Standard attributes whose value changes behavior (matched case-insensitively).
const BEHAVIOR_ATTRIBUTES: [&str; 10] = [
    "name", "value", "checked", "selected", "disabled", "action", "method", "enctype", "ref", "key",
];

/// Binding prefixes used by HTMX, Alpine, Vue and Angular templates.
const BINDING_PREFIXES: [&str; 8] = ["hx-", "x-", "v-", "@", ":", "(", "[", "*"];

/// Whether `name` may be changed by a nudge.
pub fn is_modifiable_attribute(name: &str) -> bool {
    MODIFIABLE_ATTRIBUTES.contains(&name)
}

/// Whether `name` encodes behavior and must never be changed by a nudge.
pub fn is_protected_attribute(name: &str) -> bool {
    if is_modifiable_attribute(name) {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    if is_event_handler(&lower) {
        return true;
    }
    if BINDING_PREFIXES.iter().any(|p| lower.starts_with(p)) || lower.starts_with("bind") {
        return true;
    }
    BEHAVIOR_ATTRIBUTES.contains(&lower.as_str())
}

fn is_event_handler(lower: &str) -> bool {
    lower
        .strip_prefix("on")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphabetic()))
}

/// Protected attribute names on the first opening tag in `opening_tag`, in
/// source order and without duplicates.
pub fn find_protected_attributes(opening_tag: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(tag) = markup::tags(opening_tag).find(|t| !t.closing) {
        for attr in &tag.attrs {
            if is_protected_attribute(attr.name) && !out.iter().any(|n| n == attr.name) {
                out.push(attr.name.to_owned());
            }
        }
    }
    out
}

/// Why a rewrite was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A protected attribute present before the rewrite is gone.
    Removed(String),
    /// A protected attribute is still present but its value changed.
    Modified(String),
    /// Opening plus closing tag count changed.
    HierarchyChanged {
        /// Tag count before the rewrite.
        before: usize,
        /// Tag count after the rewrite.
        after: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removed(name) => write!(f, "protected attribute \"{name}\" was removed"),
            Self::Modified(name) => write!(f, "protected attribute \"{name}\" was modified"),
            Self::HierarchyChanged { before, after } => {
                write!(f, "hierarchy changed ({before} tags before, {after} after)")
            }
        }
    }
}

type Occurrences<'a> = BTreeMap<(&'a str, Option<&'a str>), usize>;

fn protected_occurrences<'a>(tags: &[Tag<'a>]) -> Occurrences<'a> {
    let mut out = Occurrences::new();
    for attr in tags.iter().flat_map(|t| t.attrs.iter()) {
        if is_protected_attribute(attr.name) {
            let value = attr.value.as_ref().map(|v| v.text);
            *out.entry((attr.name, value)).or_default() += 1;
        }
    }
    out
}

/// Check that `after` keeps every protected attribute of `before` with the
/// exact same value, and the same number of tags.
///
/// Protected `(name, value)` pairs are compared as multisets: if `before`
/// carries `onclick="f()"` twice, `after` must too.
pub fn validate_nudge_preserves_logic(before: &str, after: &str) -> Result<(), Vec<Violation>> {
    let before_tags: Vec<Tag<'_>> = markup::tags(before).collect();
    let after_tags: Vec<Tag<'_>> = markup::tags(after).collect();
    let expected = protected_occurrences(&before_tags);
    let found = protected_occurrences(&after_tags);

    let mut violations = Vec::new();
    for ((name, value), count) in &expected {
        if found.get(&(*name, *value)).copied().unwrap_or(0) >= *count {
            continue;
        }
        let still_named = found.keys().any(|(n, _)| n == name);
        let violation = if still_named {
            Violation::Modified((*name).to_owned())
        } else {
            Violation::Removed((*name).to_owned())
        };
        if !violations.contains(&violation) {
            violations.push(violation);
        }
    }

    if before_tags.len() != after_tags.len() {
        violations.push(Violation::HierarchyChanged {
            before: before_tags.len(),
            after: after_tags.len(),
        });
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn classifies_attributes() {
        for name in [
            "onclick", "onClick", "onSubmit", "hx-post", "x-data", "x-on:click", "v-if", "@click",
            ":value", "(click)", "[disabled]", "*ngIf", "bindValue", "name", "VALUE", "checked",
            "selected", "disabled", "action", "method", "enctype", "ref", "key",
        ] {
            assert!(is_protected_attribute(name), "{name} should be protected");
        }
        let benign = ["class", "className", "style", "id", "data-id", "href", "on", "one-way", "title"];
        for name in benign {
            assert!(!is_protected_attribute(name), "{name} should not be protected");
        }
        assert!(is_modifiable_attribute("className"));
        assert!(!is_modifiable_attribute("onclick"));
    }

    #[test]
    fn finds_protected_attributes_on_one_tag() {
        let tag = r#"<input name="q" class="p-2" @input="search" onchange='go()' name="q">"#;
        assert_eq!(find_protected_attributes(tag), ["name", "@input", "onchange"]);
        assert!(find_protected_attributes("<div class=\"x\">").is_empty());
    }

    #[test]
    fn class_only_change_is_valid() {
        let before = r#"<button data-id="b1" onclick="f()" class="px-4">Go</button>"#;
        let after = r#"<button data-id="b1" onclick="f()" class="px-6">Go</button>"#;
        assert_eq!(validate_nudge_preserves_logic(before, after), Ok(()));
    }

    #[test]
    fn reports_removed_and_modified_handlers() {
        let before = r#"<form action="/a" method="post"><button onclick="f()">x</button></form>"#;
        let after = r#"<form action="/b"><button onclick="f()">x</button></form>"#;
        let err = validate_nudge_preserves_logic(before, after).unwrap_err();
        assert!(err.contains(&Violation::Modified("action".into())));
        assert!(err.contains(&Violation::Removed("method".into())));
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn duplicated_handler_must_keep_its_multiplicity() {
        let before = r#"<a onclick="f()">1</a><a onclick="f()">2</a>"#;
        let after = r#"<a onclick="f()">1</a><a onclick="g()">2</a>"#;
        let err = validate_nudge_preserves_logic(before, after).unwrap_err();
        assert_eq!(err, vec![Violation::Modified("onclick".into())]);
    }

    #[test]
    fn tag_count_mismatch_is_structural() {
        let before = r#"<div class="a"><span>x</span></div>"#;
        let after = r#"<div class="a">x</div>"#;
        let err = validate_nudge_preserves_logic(before, after).unwrap_err();
        assert_eq!(err, vec![Violation::HierarchyChanged { before: 4, after: 2 }]);
        assert!(err[0].to_string().contains("hierarchy changed"));
    }
}
