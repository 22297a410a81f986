//! # Templates
//!
//! Renders the subset of Go templates used by template rules: field actions
//! (`{{ .a.b }}`, `{{ . }}`), whitespace trim markers (`{{-`, `-}}`) and
//! custom delimiters.
//!
//! Strings render verbatim, numbers and booleans as text, null as nothing and
//! objects or arrays as compact JSON. Anything else inside an action is
//! rejected.

use crate::crd::GoTemplateDelimiters;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template delimiters must not be empty")]
    EmptyDelimiters,
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),
    #[error("unsupported template action {0:?}")]
    Unsupported(String),
    #[error("map has no entry for key {0:?}")]
    MissingKey(String),
    #[error("cannot evaluate field {field:?} on a non-object value")]
    NotAnObject { field: String },
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(&b.to_string()),
        Value::Number(n) => out.push_str(&n.to_string()),
        other => out.push_str(&other.to_string()),
    }
}

/// Evaluate a field chain such as `.image.tag` against `data`
fn evaluate<'a>(action: &str, data: &'a Value) -> Result<&'a Value, TemplateError> {
    if action == "." {
        return Ok(data);
    }
    let Some(chain) = action.strip_prefix('.') else {
        return Err(TemplateError::Unsupported(action.to_string()));
    };
    let mut current = data;
    for field in chain.split('.') {
        if field.is_empty() || !field.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(TemplateError::Unsupported(action.to_string()));
        }
        current = match current {
            Value::Object(map) => map
                .get(field)
                .ok_or_else(|| TemplateError::MissingKey(field.to_string()))?,
            _ => {
                return Err(TemplateError::NotAnObject {
                    field: field.to_string(),
                })
            }
        };
    }
    Ok(current)
}

/// Render `template` with `data` as the top-level context
pub fn render(
    template: &str,
    data: &Value,
    delimiters: &GoTemplateDelimiters,
) -> Result<String, TemplateError> {
    let (left, right) = (delimiters.left.as_str(), delimiters.right.as_str());
    if left.is_empty() || right.is_empty() {
        return Err(TemplateError::EmptyDelimiters);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut trim_next = false;

    while let Some(start) = rest.find(left) {
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        let after_left = &rest[start + left.len()..];
        let end = after_left
            .find(right)
            .ok_or_else(|| TemplateError::Unclosed(template.len() - rest.len() + start))?;
        let mut action = &after_left[..end];

        // `{{- ` and ` -}}` need whitespace next to the dash
        if let Some(stripped) = action.strip_prefix('-') {
            if stripped.starts_with(char::is_whitespace) {
                text = text.trim_end();
                action = stripped;
            }
        }
        trim_next = false;
        if let Some(stripped) = action.strip_suffix('-') {
            if stripped.ends_with(char::is_whitespace) {
                trim_next = true;
                action = stripped;
            }
        }

        out.push_str(text);
        render_value(evaluate(action.trim(), data)?, &mut out);
        rest = &after_left[end + right.len()..];
    }

    out.push_str(if trim_next { rest.trim_start() } else { rest });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn braces() -> GoTemplateDelimiters {
        GoTemplateDelimiters::default()
    }

    #[test]
    fn test_field_actions() {
        let data = json!({"image": {"repository": "nginx", "tag": "1.25"}, "replicas": 3});
        let out = render(
            "image: {{ .image.repository }}:{{ .image.tag }}\nreplicas: {{ .replicas }}\n",
            &data,
            &braces(),
        )
        .unwrap();
        assert_eq!(out, "image: nginx:1.25\nreplicas: 3\n");
    }

    #[test]
    fn test_dot_renders_context() {
        assert_eq!(render("v={{.}}", &json!("x"), &braces()).unwrap(), "v=x");
        assert_eq!(
            render("v={{ . }}", &json!({"a": [1, 2]}), &braces()).unwrap(),
            r#"v={"a":[1,2]}"#
        );
        assert_eq!(render("v={{ . }}", &Value::Null, &braces()).unwrap(), "v=");
    }

    #[test]
    fn test_trim_markers() {
        let data = json!({"a": "A", "b": "B"});
        assert_eq!(
            render("x  \n {{- .a -}} \n  y {{- .b }}", &data, &braces()).unwrap(),
            "xAyB"
        );
        // a dash without whitespace is part of the action
        assert!(matches!(
            render("{{-.a}}", &data, &braces()),
            Err(TemplateError::Unsupported(_))
        ));
    }

    #[test]
    fn test_custom_delimiters_leave_braces_alone() {
        let delimiters = GoTemplateDelimiters {
            left: "((".to_string(),
            right: "))".to_string(),
        };
        let out = render(
            "helm: {{ .Values.x }}\nown: (( .name ))\n",
            &json!({"name": "app"}),
            &delimiters,
        )
        .unwrap();
        assert_eq!(out, "helm: {{ .Values.x }}\nown: app\n");
    }

    #[test]
    fn test_errors() {
        let data = json!({"a": "A"});
        assert_eq!(
            render("{{ .missing }}", &data, &braces()),
            Err(TemplateError::MissingKey("missing".to_string()))
        );
        assert_eq!(
            render("{{ .a.b }}", &data, &braces()),
            Err(TemplateError::NotAnObject {
                field: "b".to_string()
            })
        );
        assert!(matches!(
            render("{{ if .a }}x{{ end }}", &data, &braces()),
            Err(TemplateError::Unsupported(_))
        ));
        assert_eq!(
            render("ab{{ .a", &data, &braces()),
            Err(TemplateError::Unclosed(2))
        );
    }
}
