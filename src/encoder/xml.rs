// SPDX-License-Identifier: MIT

//! XML name validation, escaping, and rendering of the `custom_cot_attrib`
//! extension tree (§4.1).
//!
//! No entity references beyond the five predefined XML ones, no DOCTYPE, no
//! processing instructions are ever emitted — the encoder only ever writes
//! elements, attributes and escaped text it builds itself.

use serde_json::Value;

/// Event attributes a `custom_cot_attrib.event` tree must not override.
pub const PROTECTED_EVENT_ATTRS: &[&str] =
    &["version", "uid", "type", "time", "start", "stale", "how"];

/// Detail child elements a `custom_cot_attrib.detail` tree must not
/// override.
pub const PROTECTED_DETAIL_CHILDREN: &[&str] = &[
    "contact",
    "uid",
    "precisionlocation",
    "__group",
    "status",
    "track",
];

/// `^[A-Za-z_][A-Za-z0-9._-]*$`, checked by hand rather than pulling in a
/// regex engine for one pattern.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Escapes text content: `&`, `<`, `>`.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes an attribute value: `&`, `<`, `>`, `"`.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders one attribute as ` name="escaped value"`, or `None` if the name
/// is invalid (the caller logs a warning and drops it).
pub fn render_attr(name: &str, value: &str) -> Option<String> {
    if !is_valid_name(name) {
        return None;
    }
    Some(format!(" {name}=\"{}\"", escape_attr(value)))
}

/// Result of interpreting one `custom_cot_attrib.event` or
/// `custom_cot_attrib.detail` tree: extra attributes to splice onto the
/// host element, optional text content, and fully-rendered child element
/// XML. `warnings` accumulates one message per dropped protected name or
/// invalid identifier, matching the "log and drop with warning" contract.
#[derive(Debug, Default)]
pub struct RenderedExtension {
    pub extra_attrs: String,
    pub text: Option<String>,
    pub children_xml: String,
    pub warnings: Vec<String>,
}

/// Interprets a top-level `event`/`detail` tree per §4.1: `_attributes`
/// become attributes on the host element, `_text` becomes its text
/// content, every other key names a child element recursively interpreted
/// by the same rules. `protected_children` blocks element-name overrides
/// (the detail child list); `protected_attrs` blocks attribute-name
/// overrides (the event attribute list). Nested elements carry no
/// protected names of their own.
pub fn render_top_level(
    tree: &Value,
    protected_children: &[&str],
    protected_attrs: &[&str],
) -> RenderedExtension {
    let mut out = RenderedExtension::default();
    let obj = match tree.as_object() {
        Some(o) => o,
        None => {
            out.warnings
                .push("custom_cot_attrib branch must be a JSON object".to_string());
            return out;
        }
    };

    for (key, value) in obj {
        match key.as_str() {
            "_attributes" => {
                render_attributes_into(
                    value,
                    protected_attrs,
                    &mut out.extra_attrs,
                    &mut out.warnings,
                );
            }
            "_text" => {
                out.text = value.as_str().map(|s| escape_text(s));
            }
            name => {
                if protected_children.contains(&name) {
                    out.warnings
                        .push(format!("dropped protected element override: {name}"));
                    continue;
                }
                if !is_valid_name(name) {
                    out.warnings
                        .push(format!("dropped element with invalid name: {name}"));
                    continue;
                }
                if let Some(xml) = render_node(name, value, &mut out.warnings) {
                    out.children_xml.push_str(&xml);
                }
            }
        }
    }
    out
}

fn render_attributes_into(
    value: &Value,
    protected_attrs: &[&str],
    into: &mut String,
    warnings: &mut Vec<String>,
) {
    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            warnings.push("_attributes must be a JSON object of string values".to_string());
            return;
        }
    };
    for (name, v) in obj {
        if protected_attrs.contains(&name.as_str()) {
            warnings.push(format!("dropped protected attribute override: {name}"));
            continue;
        }
        let Some(text) = v.as_str() else {
            warnings.push(format!("attribute {name:?} value must be a string"));
            continue;
        };
        match render_attr(name, text) {
            Some(rendered) => into.push_str(&rendered),
            None => warnings.push(format!("dropped attribute with invalid name: {name}")),
        }
    }
}

/// Renders one child element. `name` has already passed the protected-name
/// and identifier-pattern checks at the call site.
fn render_node(name: &str, value: &Value, warnings: &mut Vec<String>) -> Option<String> {
    match value {
        Value::String(s) => Some(format!("<{name}>{}</{name}>", escape_text(s))),
        Value::Number(n) => Some(format!("<{name}>{n}</{name}>")),
        Value::Bool(b) => Some(format!("<{name}>{b}</{name}>")),
        Value::Object(_) => {
            let nested = render_top_level(value, &[], &[]);
            warnings.extend(nested.warnings);
            let text = nested.text.unwrap_or_default();
            if nested.children_xml.is_empty() && text.is_empty() && nested.extra_attrs.is_empty()
            {
                Some(format!("<{name}/>"))
            } else {
                Some(format!(
                    "<{name}{attrs}>{text}{children}</{name}>",
                    attrs = nested.extra_attrs,
                    text = text,
                    children = nested.children_xml
                ))
            }
        }
        Value::Null | Value::Array(_) => {
            warnings.push(format!(
                "dropped element {name:?}: unsupported value type (expected string, number, bool, or object)"
            ));
            None
        }
    }
}
