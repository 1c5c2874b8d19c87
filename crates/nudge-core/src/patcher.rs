// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Class-list patcher.
//!
//! A nudge arrives as a [`StyleDelta`]; the patcher finds the element whose
//! id attribute equals the component id, computes `(previous ∪ add) \ remove`
//! over whitespace-separated tokens, and splices the new list back into the
//! exact byte range of the class value. Every other byte of the markup is
//! left as it was. The result must pass the logic guard or the whole patch is
//! rejected.

use crate::guard::{self, Violation};
use crate::markup::{self, Attr, Quote, Tag};
use crate::model::{Component, ComponentId, StyleDelta};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Longest accepted class token, in characters.
pub const MAX_TOKEN_LEN: usize = 100;

/// Successful patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Rewritten markup (identical to the input when the delta is a no-op).
    pub markup: String,
    /// Class tokens before the patch, as written.
    pub previous_classes: Vec<String>,
    /// Class tokens after the patch.
    pub new_classes: Vec<String>,
}

/// Why a patch was refused. The input markup is never modified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// No element carries the requested id.
    #[error("could not find element with id \"{0}\"")]
    ElementNotFound(ComponentId),
    /// The element's class list is a template expression, not a literal.
    #[error("class list of \"{0}\" is a dynamic expression")]
    DynamicClassList(ComponentId),
    /// Delta tokens failed validation.
    #[error("invalid delta: {}", .0.join(", "))]
    InvalidDelta(Vec<String>),
    /// The rewrite would change behavior or structure.
    #[error("logic preservation failed: {}", join_violations(.0))]
    LogicViolation(Vec<Violation>),
}

fn join_violations(violations: &[Violation]) -> String {
    let mut out = String::new();
    for (i, v) in violations.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{v}");
    }
    out
}

/// Whether `name` is an id attribute: `id`, `data-id` or `data-<scope>-id`.
pub fn is_id_attribute(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "id"
        || lower
            .strip_prefix("data-")
            .is_some_and(|rest| rest == "id" || rest.ends_with("-id"))
}

fn is_class_attribute(name: &str) -> bool {
    name.eq_ignore_ascii_case("class") || name == "className"
}

fn find_element<'a>(markup: &'a str, component_id: &str) -> Option<Tag<'a>> {
    markup::tags(markup).filter(|t| !t.closing).find(|t| {
        t.attrs.iter().any(|a| {
            is_id_attribute(a.name) && a.value.as_ref().is_some_and(|v| v.text == component_id)
        })
    })
}

/// Whether `markup` carries an element addressed by `component_id`.
pub fn contains_element(markup: &str, component_id: &str) -> bool {
    find_element(markup, component_id).is_some()
}

fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_owned).collect()
}

/// Class tokens of the element addressed by `component_id`; empty when the
/// id is absent or the element has no literal class list.
pub fn extract_classes(markup: &str, component_id: &str) -> Vec<String> {
    find_element(markup, component_id)
        .and_then(|tag| tag.find_attr(is_class_attribute).cloned())
        .and_then(|attr| attr.value)
        .filter(|v| v.quote != Quote::Brace)
        .map(|v| tokens(v.text))
        .unwrap_or_default()
}

/// `(previous ∪ add) \ remove`, keeping first-seen order. Delta entries are
/// split on whitespace so a multi-token string behaves like its parts.
pub fn merge_classes(previous: &[String], delta: &StyleDelta) -> Vec<String> {
    let removed: HashSet<&str> = delta.remove.iter().flat_map(|t| t.split_whitespace()).collect();
    let mut seen = HashSet::new();
    previous
        .iter()
        .map(String::as_str)
        .chain(delta.add.iter().flat_map(|t| t.split_whitespace()))
        .filter(|t| !removed.contains(t) && seen.insert(*t))
        .map(str::to_owned)
        .collect()
}

fn is_noop(previous: &[String], delta: &StyleDelta) -> bool {
    let present: HashSet<&str> = previous.iter().map(String::as_str).collect();
    delta.add.iter().flat_map(|t| t.split_whitespace()).all(|t| present.contains(t))
        && delta.remove.iter().flat_map(|t| t.split_whitespace()).all(|t| !present.contains(t))
}

fn splice(markup: &str, range: std::ops::Range<usize>, replacement: &str) -> String {
    let mut out = String::with_capacity(markup.len() + replacement.len());
    out.push_str(&markup[..range.start]);
    out.push_str(replacement);
    out.push_str(&markup[range.end..]);
    out
}

fn id_attr<'t, 'a>(tag: &'t Tag<'a>, component_id: &str) -> Option<&'t Attr<'a>> {
    tag.attrs.iter().find(|a| {
        is_id_attribute(a.name) && a.value.as_ref().is_some_and(|v| v.text == component_id)
    })
}

/// Apply `delta` to the class list of the element addressed by `component_id`.
///
/// On any error the caller's `markup` is the authoritative, untouched state;
/// no partially patched string ever escapes this function.
pub fn apply_delta(
    markup: &str,
    component_id: &str,
    delta: &StyleDelta,
) -> Result<PatchOutcome, PatchError> {
    let not_found = || PatchError::ElementNotFound(component_id.to_owned());
    let tag = find_element(markup, component_id).ok_or_else(not_found)?;
    let class_attr = tag.find_attr(is_class_attribute);
    if class_attr
        .and_then(|a| a.value.as_ref())
        .is_some_and(|v| v.quote == Quote::Brace)
    {
        return Err(PatchError::DynamicClassList(component_id.to_owned()));
    }

    let previous_classes = class_attr
        .and_then(|a| a.value.as_ref())
        .map(|v| tokens(v.text))
        .unwrap_or_default();
    let new_classes = merge_classes(&previous_classes, delta);
    if is_noop(&previous_classes, delta) {
        return Ok(PatchOutcome {
            markup: markup.to_owned(),
            previous_classes,
            new_classes,
        });
    }

    let joined = new_classes.join(" ");
    let patched = match class_attr {
        Some(attr) => match &attr.value {
            Some(value) if value.quote != Quote::Bare => {
                splice(markup, value.span.clone(), &joined)
            }
            _ => splice(markup, attr.span.clone(), &format!("{}=\"{joined}\"", attr.name)),
        },
        None => {
            let anchor = id_attr(&tag, component_id).ok_or_else(not_found)?;
            let at = anchor.span.end;
            splice(markup, at..at, &format!(" class=\"{joined}\""))
        }
    };

    guard::validate_nudge_preserves_logic(markup, &patched).map_err(PatchError::LogicViolation)?;

    Ok(PatchOutcome {
        markup: patched,
        previous_classes,
        new_classes,
    })
}

/// Reject tokens that could break out of an attribute value or smuggle a
/// script URL. Run on every delta from an untrusted producer.
pub fn validate_delta(delta: &StyleDelta) -> Result<(), PatchError> {
    let mut issues = Vec::new();
    let mut check = |token: &str, side: &str| {
        if token.contains(['<', '>']) {
            issues.push(format!("{side}: class \"{token}\" contains HTML characters"));
        }
        if token.contains(['"', '\'', '`']) {
            issues.push(format!("{side}: class \"{token}\" contains quote characters"));
        }
        if token.to_ascii_lowercase().contains("javascript:") {
            issues.push(format!("{side}: class \"{token}\" contains javascript protocol"));
        }
        if token.chars().count() > MAX_TOKEN_LEN {
            issues.push(format!("{side}: class \"{token}\" exceeds maximum length"));
        }
    };
    for token in &delta.add {
        check(token, "add");
    }
    for token in &delta.remove {
        check(token, "remove");
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(PatchError::InvalidDelta(issues))
    }
}

/// Validate and apply a nudge to one component, producing its replacement.
///
/// The returned component records the new class list and `updated_at = now`.
pub fn nudge_component(
    component: &Component,
    delta: &StyleDelta,
    now: DateTime<Utc>,
) -> Result<(Component, PatchOutcome), PatchError> {
    validate_delta(delta)?;
    let outcome = apply_delta(&component.markup, &component.id, delta)?;
    let updated = Component {
        id: component.id.clone(),
        markup: outcome.markup.clone(),
        classes: Some(outcome.new_classes.clone()),
        created_at: component.created_at,
        updated_at: Some(now),
    };
    Ok((updated, outcome))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn set(items: &[String]) -> BTreeSet<String> {
        items.iter().cloned().collect()
    }

    #[test]
    fn extracts_classes_in_either_attribute_order() {
        let id_first = r#"<div data-id="c1" class="p-4  text-lg">x</div>"#;
        let class_first = r#"<div class="p-4 text-lg" data-02-id="c1">x</div>"#;
        assert_eq!(extract_classes(id_first, "c1"), ["p-4", "text-lg"]);
        assert_eq!(extract_classes(class_first, "c1"), ["p-4", "text-lg"]);
        assert!(extract_classes(id_first, "c2").is_empty());
    }

    #[test]
    fn padding_scenario_yields_exact_class_set() {
        let markup = r#"<div data-id="c1" class="p-4">x</div>"#;
        let delta = StyleDelta::new(["p-6", "shadow-lg"], ["p-4"]);
        let out = apply_delta(markup, "c1", &delta).unwrap();
        assert_eq!(out.markup, r#"<div data-id="c1" class="p-6 shadow-lg">x</div>"#);
        assert_eq!(out.previous_classes, ["p-4"]);
        assert_eq!(
            set(&extract_classes(&out.markup, "c1")),
            set(&["p-6".into(), "shadow-lg".into()])
        );
    }

    #[test]
    fn event_handler_survives_button_nudge() {
        let markup = r#"<button data-id="b1" onclick="f()" class="px-4">Go</button>"#;
        let out = apply_delta(markup, "b1", &StyleDelta::new(["px-6"], ["px-4"])).unwrap();
        assert!(out.markup.contains(r#"onclick="f()""#));
        assert_eq!(extract_classes(&out.markup, "b1"), ["px-6"]);
    }

    #[test]
    fn structural_break_is_rejected_and_input_kept() {
        let markup = r#"<div data-id="c" class="p-4">x</div>"#;
        let before = markup.to_owned();
        let delta = StyleDelta::new([r#"x"><i"#], Vec::<String>::new());
        let err = apply_delta(markup, "c", &delta).unwrap_err();
        assert_eq!(
            err,
            PatchError::LogicViolation(vec![Violation::HierarchyChanged { before: 2, after: 3 }])
        );
        assert_eq!(markup, before);
        assert_eq!(extract_classes(markup, "c"), ["p-4"]);
    }

    #[test]
    fn validated_token_cannot_swallow_a_handler() {
        // A bare class value carrying a stray quote, re-quoted around `y=`,
        // opens a new attribute value that would eat `onclick`.
        let markup = r#"<div data-id="c" class=a" onclick="f()">x</div>"#;
        let delta = StyleDelta::new(["y="], Vec::<String>::new());
        validate_delta(&delta).unwrap();
        let err = apply_delta(markup, "c", &delta).unwrap_err();
        assert_eq!(err, PatchError::LogicViolation(vec![Violation::Removed("onclick".into())]));
    }

    #[test]
    fn only_the_addressed_element_changes() {
        let markup = r#"<section data-id="outer" class="p-2"><p data-id="inner" class="p-2">t</p></section>"#;
        let out = apply_delta(markup, "inner", &StyleDelta::new(["p-8"], ["p-2"])).unwrap();
        assert_eq!(
            out.markup,
            r#"<section data-id="outer" class="p-2"><p data-id="inner" class="p-8">t</p></section>"#
        );
    }

    #[test]
    fn preserves_quote_style_and_class_name_attribute() {
        let markup = r#"<div className='a b' data-id="j">x</div>"#;
        let out = apply_delta(markup, "j", &StyleDelta::new(["c"], ["a"])).unwrap();
        assert_eq!(out.markup, r#"<div className='b c' data-id="j">x</div>"#);
    }

    #[test]
    fn missing_class_attribute_is_inserted_after_the_id() {
        let markup = r#"<span data-id="s" title="t">x</span>"#;
        let out = apply_delta(markup, "s", &StyleDelta::new(["italic"], Vec::<String>::new())).unwrap();
        assert_eq!(out.markup, r#"<span data-id="s" class="italic" title="t">x</span>"#);
    }

    #[test]
    fn unknown_id_is_element_not_found() {
        let err = apply_delta("<div data-id=\"a\"></div>", "b", &StyleDelta::default()).unwrap_err();
        assert_eq!(err, PatchError::ElementNotFound("b".into()));
    }

    #[test]
    fn contains_element_matches_any_id_attribute() {
        assert!(contains_element(r#"<section data-block-id="hero"></section>"#, "hero"));
        assert!(contains_element("<p id='p1'>x</p>", "p1"));
        assert!(!contains_element(r#"<p title="p1">x</p>"#, "p1"));
    }

    #[test]
    fn dynamic_class_expressions_are_refused() {
        let markup = r#"<div data-id="d" className={cx("a", b)}>x</div>"#;
        let err = apply_delta(markup, "d", &StyleDelta::new(["p-2"], Vec::<String>::new())).unwrap_err();
        assert_eq!(err, PatchError::DynamicClassList("d".into()));
    }

    #[test]
    fn validate_delta_rejects_dangerous_tokens() {
        let long = "x".repeat(101);
        for bad in ["<script>", "javascript:x", long.as_str(), "a\"b", "it's"] {
            let delta = StyleDelta::new([bad], Vec::<String>::new());
            assert!(matches!(validate_delta(&delta), Err(PatchError::InvalidDelta(_))), "{bad}");
        }
        let removal = StyleDelta::new(Vec::<String>::new(), ["<b>"]);
        match validate_delta(&removal) {
            Err(PatchError::InvalidDelta(issues)) => assert!(issues[0].starts_with("remove:")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(validate_delta(&StyleDelta::new(["px-6"], ["x".repeat(100)])), Ok(()));
    }

    #[test]
    fn nudge_component_records_classes_and_time() {
        let created = DateTime::from_timestamp(1, 0).unwrap();
        let now = DateTime::from_timestamp(2, 0).unwrap();
        let comp = Component::new("c1", r#"<div data-id="c1" class="p-4">x</div>"#, created);
        let (updated, _) = nudge_component(&comp, &StyleDelta::new(["p-6"], ["p-4"]), now).unwrap();
        assert_eq!(updated.classes.as_deref(), Some(&["p-6".to_owned()][..]));
        assert_eq!(updated.updated_at, Some(now));
        assert_eq!(updated.created_at, created);

        let bad = StyleDelta::new(["<x>"], Vec::<String>::new());
        assert!(matches!(nudge_component(&comp, &bad, now), Err(PatchError::InvalidDelta(_))));
    }

    fn token() -> impl Strategy<Value = String> {
        "[a-z]{1,3}-[0-9]{1,2}"
    }

    proptest! {
        #[test]
        fn result_classes_follow_set_algebra(
            prev in prop::collection::vec(token(), 0..6),
            add in prop::collection::vec(token(), 0..4),
            remove in prop::collection::vec(token(), 0..4),
        ) {
            let markup = format!(r#"<div data-id="c" onclick="go()" class="{}"><b>t</b></div>"#, prev.join(" "));
            let delta = StyleDelta { add: add.clone(), remove: remove.clone() };
            let out = apply_delta(&markup, "c", &delta).unwrap();

            let mut expected: BTreeSet<String> = set(&prev);
            expected.extend(add.iter().cloned());
            for r in &remove {
                expected.remove(r);
            }
            prop_assert_eq!(set(&extract_classes(&out.markup, "c")), expected);
            prop_assert!(out.markup.contains(r#"onclick="go()""#));
        }

        #[test]
        fn empty_delta_is_identity(prev in prop::collection::vec(token(), 0..6), pad in "[ ]{1,3}") {
            let markup = format!(r#"<p class="{}" data-id="c">x</p>"#, prev.join(&pad));
            let out = apply_delta(&markup, "c", &StyleDelta::default()).unwrap();
            prop_assert_eq!(out.markup, markup);
        }
    }
}
