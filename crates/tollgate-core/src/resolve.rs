//! Scoped configuration resolution
//!
//! Merges a deployment-provided configuration tree into the built-in default
//! tree and renders template references (`{{NAME}}`) in string leaves.
//!
//! ## Merge
//!
//! Only keys that exist in the default tree can be overridden. Keys that only
//! exist in the provided tree are reported as [`ResolveWarning::UnknownKey`]
//! and dropped. A default mapping that is empty (`{}`) marks an open section
//! whose provided contents are taken whole.
//!
//! ## Scoping
//!
//! A template in a leaf sees the scalar values of its own mapping and of every
//! ancestor mapping. Values defined in sibling branches are never visible, and
//! unresolved references render as the empty string.

use handlebars::Handlebars;
use serde_json::{Map as JsonMap, Value as JsonValue};
use serde_yaml::{Mapping, Value};
use std::fmt;

use crate::error::ConfigError;

/// Marker that identifies a leaf as a template
const TEMPLATE_MARKER: &str = "{{";

/// Upper bound on re-render passes for references between values of the same mapping
const MAX_RENDER_PASSES: usize = 8;

/// A non-fatal finding produced during resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// A provided key has no counterpart in the default tree and was ignored
    UnknownKey { path: String },

    /// A rendered value could not be re-parsed and was kept as a literal string
    LiteralFallback { path: String, value: String },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::UnknownKey { path } => {
                write!(f, "unknown configuration key '{}' ignored", path)
            }
            ResolveWarning::LiteralFallback { path, value } => {
                write!(f, "value at '{}' kept as literal string: {:?}", path, value)
            }
        }
    }
}

/// Output of [`resolve`]: the merged, rendered tree and the warnings collected on the way
#[derive(Debug, Clone)]
pub struct Resolved {
    pub tree: Value,
    pub warnings: Vec<ResolveWarning>,
}

/// Merge `provided` into `default` and render every template leaf.
///
/// Fails when a template is syntactically malformed or when the templates of
/// one mapping keep changing each other without settling.
pub fn resolve(default: &Value, provided: &Value) -> Result<Resolved, ConfigError> {
    let mut warnings = Vec::new();
    let mut tree = merge(default, Some(provided), "", &mut warnings);

    let renderer = Renderer::new();
    let mut scope = Vec::new();
    renderer.render_node(&mut tree, &mut scope, "", &mut warnings)?;

    Ok(Resolved { tree, warnings })
}

// =============================================================================
// Merge
// =============================================================================

fn merge(
    default: &Value,
    provided: Option<&Value>,
    path: &str,
    warnings: &mut Vec<ResolveWarning>,
) -> Value {
    match (default, provided) {
        (_, None) => default.clone(),
        (Value::Mapping(_), Some(Value::Null)) => default.clone(),
        (Value::Mapping(defaults), Some(Value::Mapping(given))) => {
            if defaults.is_empty() {
                return Value::Mapping(given.clone());
            }

            let mut merged = Mapping::new();
            for (key, default_value) in defaults {
                let child_path = join_path(path, key);
                merged.insert(
                    key.clone(),
                    merge(default_value, given.get(key), &child_path, warnings),
                );
            }

            for key in given.keys() {
                if !defaults.contains_key(key) {
                    warnings.push(ResolveWarning::UnknownKey {
                        path: join_path(path, key),
                    });
                }
            }

            Value::Mapping(merged)
        }
        (_, Some(given)) => given.clone(),
    }
}

// =============================================================================
// Render
// =============================================================================

struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry.set_strict_mode(false);
        Self { registry }
    }

    /// Render a mapping (or sequence) in place.
    ///
    /// `scope` holds one frame per ancestor mapping; the node's own scalars
    /// are pushed as a new frame for the duration of the descent.
    fn render_node(
        &self,
        node: &mut Value,
        scope: &mut Vec<JsonMap<String, JsonValue>>,
        path: &str,
        warnings: &mut Vec<ResolveWarning>,
    ) -> Result<(), ConfigError> {
        match node {
            Value::Mapping(mapping) => {
                self.render_scalars(mapping, scope, path, warnings)?;

                scope.push(scalar_frame(mapping));
                let result = mapping.iter_mut().try_for_each(|(key, child)| {
                    if is_container(child) {
                        let child_path = join_path(path, key);
                        self.render_node(child, scope, &child_path, warnings)
                    } else {
                        Ok(())
                    }
                });
                scope.pop();
                result
            }
            Value::Sequence(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    let item_path = format!("{}[{}]", path, index);
                    match item {
                        Value::String(template) if template.contains(TEMPLATE_MARKER) => {
                            let context = flatten_scope(scope, None);
                            let rendered = self.render_leaf(template, &context, &item_path)?;
                            *item = reparse(rendered, &item_path, warnings);
                        }
                        _ if is_container(item) => {
                            self.render_node(item, scope, &item_path, warnings)?
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Render the template scalars of one mapping against its scope.
    ///
    /// Scalars may reference each other, so rendering repeats from the original
    /// templates until the values stop changing. A mapping still changing after
    /// the last pass is an error.
    fn render_scalars(
        &self,
        mapping: &mut Mapping,
        scope: &[JsonMap<String, JsonValue>],
        path: &str,
        warnings: &mut Vec<ResolveWarning>,
    ) -> Result<(), ConfigError> {
        let templates: Vec<(Value, String)> = mapping
            .iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) if s.contains(TEMPLATE_MARKER) => Some((key.clone(), s.clone())),
                _ => None,
            })
            .collect();

        if templates.is_empty() {
            return Ok(());
        }

        let mut pass_warnings = Vec::new();
        let mut unsettled = None;
        for _ in 0..MAX_RENDER_PASSES {
            pass_warnings.clear();
            let context = flatten_scope(scope, Some(mapping));
            unsettled = None;

            for (key, template) in &templates {
                let leaf_path = join_path(path, key);
                let rendered = self.render_leaf(template, &context, &leaf_path)?;
                let value = reparse(rendered, &leaf_path, &mut pass_warnings);
                if mapping.get(key) != Some(&value) {
                    mapping.insert(key.clone(), value);
                    unsettled = Some(leaf_path);
                }
            }

            if unsettled.is_none() {
                break;
            }
        }

        if let Some(path) = unsettled {
            return Err(ConfigError::Template {
                path,
                message: format!("value still changing after {} render passes", MAX_RENDER_PASSES),
            });
        }

        warnings.extend(pass_warnings);
        Ok(())
    }

    fn render_leaf(
        &self,
        template: &str,
        context: &JsonMap<String, JsonValue>,
        path: &str,
    ) -> Result<String, ConfigError> {
        self.registry
            .render_template(template, context)
            .map_err(|e| ConfigError::Template {
                path: path.to_string(),
                message: e.to_string(),
            })
    }
}

/// Re-parse a rendered string as a YAML value, keeping it literal when that fails
fn reparse(rendered: String, path: &str, warnings: &mut Vec<ResolveWarning>) -> Value {
    if rendered.trim().is_empty() {
        return Value::String(rendered);
    }

    match serde_yaml::from_str::<Value>(&rendered) {
        Ok(Value::Null) => Value::String(rendered),
        Ok(value) => value,
        Err(_) => {
            warnings.push(ResolveWarning::LiteralFallback {
                path: path.to_string(),
                value: rendered.clone(),
            });
            Value::String(rendered)
        }
    }
}

/// Scalar entries of a mapping as a template scope frame
fn scalar_frame(mapping: &Mapping) -> JsonMap<String, JsonValue> {
    mapping
        .iter()
        .filter(|(_, value)| !is_container(value))
        .filter_map(|(key, value)| {
            let key = key.as_str()?;
            let value = serde_json::to_value(value).ok()?;
            Some((key.to_string(), value))
        })
        .collect()
}

/// Collapse the scope stack into one context; nearer frames win
fn flatten_scope(
    scope: &[JsonMap<String, JsonValue>],
    current: Option<&Mapping>,
) -> JsonMap<String, JsonValue> {
    let mut context = JsonMap::new();
    for frame in scope {
        context.extend(frame.clone());
    }
    if let Some(mapping) = current {
        context.extend(scalar_frame(mapping));
    }
    context
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Mapping(_) | Value::Sequence(_))
}

fn join_path(parent: &str, key: &Value) -> String {
    let key = match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    };
    if parent.is_empty() {
        key
    } else {
        format!("{}.{}", parent, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn lookup<'a>(tree: &'a Value, path: &[&str]) -> &'a Value {
        path.iter().fold(tree, |node, key| &node[*key])
    }

    #[test]
    fn test_ancestor_reference_resolves() {
        let default = yaml(
            r#"
BASE_URL: "http://a"
OPENID_CONNECT:
  fence:
    client_kwargs:
      redirect_uri: "{{BASE_URL}}/x"
"#,
        );

        let resolved = resolve(&default, &Value::Null).unwrap();
        assert_eq!(
            lookup(&resolved.tree, &["OPENID_CONNECT", "fence", "client_kwargs", "redirect_uri"]),
            &Value::String("http://a/x".into())
        );
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_provided_value_feeds_templates() {
        let default = yaml(
            r#"
BASE_URL: "http://localhost/user"
login:
  redirect: "{{BASE_URL}}/login"
"#,
        );
        let provided = yaml(r#"BASE_URL: "https://broker.example/user""#);

        let resolved = resolve(&default, &provided).unwrap();
        assert_eq!(
            lookup(&resolved.tree, &["login", "redirect"]),
            &Value::String("https://broker.example/user/login".into())
        );
    }

    #[test]
    fn test_sibling_reference_renders_empty() {
        let default = yaml(
            r#"
left:
  secret: "hidden"
right:
  leaf: "{{secret}}"
"#,
        );

        let resolved = resolve(&default, &Value::Null).unwrap();
        assert_eq!(lookup(&resolved.tree, &["right", "leaf"]), &Value::String(String::new()));
    }

    #[test]
    fn test_same_node_references_reach_fixpoint() {
        let default = yaml(
            r#"
fence:
  authorize_url: "{{api_base_url}}/oauth2/authorize"
  api_base_url: "{{root}}/user"
  root: "https://upstream.example"
"#,
        );

        let resolved = resolve(&default, &Value::Null).unwrap();
        assert_eq!(
            lookup(&resolved.tree, &["fence", "authorize_url"]),
            &Value::String("https://upstream.example/user/oauth2/authorize".into())
        );
    }

    #[test]
    fn test_self_referencing_template_is_an_error() {
        let default = yaml("node:\n  a: \"{{a}}x\"\n");

        let err = resolve(&default, &Value::Null).unwrap_err();
        assert!(matches!(err, ConfigError::Template { ref path, .. } if path == "node.a"));
    }

    #[test]
    fn test_unknown_keys_are_reported_and_dropped() {
        let default = yaml("BASE_URL: http://a\nnested:\n  known: 1\n");
        let provided = yaml("EXTRA: 1\nnested:\n  known: 2\n  surprise: true\n");

        let resolved = resolve(&default, &provided).unwrap();
        assert!(resolved.tree.get("EXTRA").is_none());
        assert!(resolved.tree["nested"].get("surprise").is_none());
        assert_eq!(resolved.tree["nested"]["known"], Value::from(2));
        assert_eq!(
            resolved.warnings,
            vec![
                ResolveWarning::UnknownKey { path: "nested.surprise".into() },
                ResolveWarning::UnknownKey { path: "EXTRA".into() },
            ]
        );
    }

    #[test]
    fn test_open_section_taken_whole() {
        let default = yaml("OAUTH_CLIENTS: {}\n");
        let provided = yaml("OAUTH_CLIENTS:\n  app:\n    client_secret: s\n");

        let resolved = resolve(&default, &provided).unwrap();
        assert_eq!(resolved.tree["OAUTH_CLIENTS"]["app"]["client_secret"], Value::from("s"));
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_rendered_values_are_typed() {
        let default = yaml("PORT: 8080\nnested:\n  port: \"{{PORT}}\"\n  flag: \"{{ON}}\"\nON: true\n");

        let resolved = resolve(&default, &Value::Null).unwrap();
        assert_eq!(resolved.tree["nested"]["port"], Value::from(8080));
        assert_eq!(resolved.tree["nested"]["flag"], Value::from(true));
    }

    #[test]
    fn test_unparsable_rendering_kept_literal() {
        let default = yaml("NAME: \"x\"\nbad: \"{{NAME}}: [unclosed\"\n");

        let resolved = resolve(&default, &Value::Null).unwrap();
        assert_eq!(resolved.tree["bad"], Value::String("x: [unclosed".into()));
        assert!(matches!(
            resolved.warnings.as_slice(),
            [ResolveWarning::LiteralFallback { path, .. }] if path == "bad"
        ));
    }

    #[test]
    fn test_malformed_template_is_an_error() {
        let default = yaml("broken: \"{{#if}}\"\n");

        let err = resolve(&default, &Value::Null).unwrap_err();
        assert!(matches!(err, ConfigError::Template { ref path, .. } if path == "broken"));
    }

    #[test]
    fn test_literals_round_trip() {
        let default = yaml("a: \"plain: text\"\nb: 12\nc:\n  - \"x\"\n  - 3\n");

        let resolved = resolve(&default, &Value::Null).unwrap();
        assert_eq!(resolved.tree, default);
    }
}
