//! Property-Based Tests for configuration resolution
//!
//! These tests check scoping and merge rules for arbitrary names and values:
//! 1. A leaf sees variables defined on any ancestor mapping
//! 2. A leaf never sees variables defined only in a sibling branch
//! 3. Values without template markers pass through untouched
//! 4. Provided keys unknown to the default tree never take effect

use proptest::prelude::*;
use serde_yaml::{Mapping, Value};
use tollgate_core::{resolve, ResolveWarning};

// =============================================================================
// Test Helpers
// =============================================================================

fn mapping(entries: Vec<(&str, Value)>) -> Value {
    let mut m = Mapping::new();
    for (k, v) in entries {
        m.insert(Value::String(k.to_string()), v);
    }
    Value::Mapping(m)
}

fn template(name: &str) -> Value {
    Value::String(format!("{{{{{}}}}}", name))
}

/// Variable names that cannot collide with the fixed structural keys
fn var_name() -> impl Strategy<Value = String> {
    "[a-z]{3,8}".prop_map(|s| format!("v_{}", s))
}

/// Values that re-parse as YAML strings
fn var_value() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,11}".prop_filter("yaml keywords", |s| {
        !matches!(s.as_str(), "y" | "n" | "yes" | "no" | "on" | "off" | "true" | "false" | "null")
    })
}

// =============================================================================
// Scoping
// =============================================================================

proptest! {
    /// A variable defined at depth 0 resolves in a leaf at any depth
    #[test]
    fn prop_ancestor_variable_visible(
        name in var_name(),
        value in var_value(),
        depth in 1..6usize,
    ) {
        let mut node = mapping(vec![("leaf", template(&name))]);
        for level in 0..depth {
            node = mapping(vec![(if level % 2 == 0 { "inner" } else { "outer" }, node)]);
        }
        let default = mapping(vec![(name.as_str(), Value::String(value.clone())), ("tree", node)]);

        let resolved = resolve(&default, &Value::Null).unwrap();

        let mut cursor = &resolved.tree["tree"];
        for level in (0..depth).rev() {
            cursor = &cursor[if level % 2 == 0 { "inner" } else { "outer" }];
        }
        prop_assert_eq!(&cursor["leaf"], &Value::String(value));
    }

    /// A variable defined only in a sibling branch renders as the empty string
    #[test]
    fn prop_sibling_variable_invisible(
        name in var_name(),
        value in var_value(),
    ) {
        let default = mapping(vec![
            ("left", mapping(vec![(name.as_str(), Value::String(value))])),
            ("right", mapping(vec![("leaf", template(&name))])),
        ]);

        let resolved = resolve(&default, &Value::Null).unwrap();
        prop_assert_eq!(&resolved.tree["right"]["leaf"], &Value::String(String::new()));
    }

    /// A nearer definition shadows an ancestor one
    #[test]
    fn prop_nearest_scope_wins(
        name in var_name(),
        outer in var_value(),
        inner in var_value(),
    ) {
        let default = mapping(vec![
            (name.as_str(), Value::String(outer)),
            ("child", mapping(vec![
                (name.as_str(), Value::String(inner.clone())),
                ("leaf", template(&name)),
            ])),
        ]);

        let resolved = resolve(&default, &Value::Null).unwrap();
        prop_assert_eq!(&resolved.tree["child"]["leaf"], &Value::String(inner));
    }
}

// =============================================================================
// Literals and merge
// =============================================================================

proptest! {
    /// Strings without `{{` round-trip unchanged
    #[test]
    fn prop_literals_round_trip(
        literal in "[a-zA-Z0-9 :/._#%-]{0,40}",
        number in any::<i32>(),
    ) {
        let default = mapping(vec![
            ("text", Value::String(literal.clone())),
            ("nested", mapping(vec![("n", Value::from(number)), ("s", Value::String(literal))])),
        ]);

        let resolved = resolve(&default, &Value::Null).unwrap();
        prop_assert_eq!(&resolved.tree, &default);
        prop_assert!(resolved.warnings.is_empty());
    }

    /// Unknown provided keys are reported and absent from the result
    #[test]
    fn prop_unknown_keys_never_applied(
        unknown in var_name(),
        value in var_value(),
    ) {
        let default = mapping(vec![("KNOWN", Value::String("x".into()))]);
        let provided = mapping(vec![(unknown.as_str(), Value::String(value))]);

        let resolved = resolve(&default, &provided).unwrap();
        prop_assert!(resolved.tree.get(unknown.as_str()).is_none());
        prop_assert_eq!(
            resolved.warnings,
            vec![ResolveWarning::UnknownKey { path: unknown }]
        );
    }

    /// Known provided keys always override the default
    #[test]
    fn prop_known_keys_override(value in var_value()) {
        let default = mapping(vec![("KNOWN", Value::String("default".into()))]);
        let provided = mapping(vec![("KNOWN", Value::String(value.clone()))]);

        let resolved = resolve(&default, &provided).unwrap();
        prop_assert_eq!(&resolved.tree["KNOWN"], &Value::String(value));
    }
}
