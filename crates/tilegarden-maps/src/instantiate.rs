// Template instantiation: placeholder resolution, type-directed
// escaping and marker substitution in sql/cartocss strings.
//
// Substitution never compiles parameter-derived regexes: a single
// compiled marker pattern finds `<%= name %>` occurrences and a lookup
// closure supplies the escaped values. Markers for undeclared
// placeholders are left verbatim.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::{MapsError, MapsResult};
use crate::model::{LayerGroup, PlaceholderType, Template, TemplateRef};

static PLACEHOLDER_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<%=\s*([a-zA-Z][0-9a-zA-Z_]*)\s*%>").unwrap());

static NUMBER_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?[\d.]?\d+([eE][+-]?\d+)?$").unwrap());

static CSS_COLOR_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z]+$").unwrap());

static CSS_COLOR_HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#([0-9a-fA-F]{3,4}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$").unwrap());

/// Instantiates `template` with `params`, returning the substituted
/// layergroup tagged with the template's name and auth rule.
pub(crate) fn instance(
    template: &Template,
    params: &Map<String, Value>,
) -> MapsResult<LayerGroup> {
    let mut values: HashMap<&str, String> = HashMap::with_capacity(template.placeholders.len());
    for (name, placeholder) in &template.placeholders {
        let value = match params.get(name).or(placeholder.default.as_ref()) {
            Some(value) => value,
            None => {
                return Err(MapsError::Validation(format!(
                    "Missing value for placeholder '{name}'"
                )))
            }
        };
        let kind = placeholder.kind.as_deref().ok_or_else(|| {
            MapsError::Validation(format!("Missing type for placeholder '{name}'"))
        })?;
        let kind = PlaceholderType::parse(kind)
            .ok_or_else(|| MapsError::InvalidPlaceholderType { kind: kind.to_string() })?;
        values.insert(name.as_str(), escape_value(kind, name, value)?);
    }

    let mut layergroup = template.layergroup.clone();
    for layer in &mut layergroup.layers {
        if let Some(cartocss) = layer.options.cartocss.take() {
            layer.options.cartocss = Some(replace_vars(&cartocss, &values));
        }
        if let Some(sql) = layer.options.sql.take() {
            layer.options.sql = Some(replace_vars(&sql, &values));
        }
    }
    layergroup.template = Some(TemplateRef {
        name: template.name.clone(),
        auth: template.auth.clone(),
    });
    Ok(layergroup)
}

fn replace_vars(text: &str, values: &HashMap<&str, String>) -> String {
    PLACEHOLDER_MARKER
        .replace_all(text, |caps: &Captures<'_>| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Escapes or validates a placeholder value per its declared type.
fn escape_value(kind: PlaceholderType, name: &str, value: &Value) -> MapsResult<String> {
    match kind {
        PlaceholderType::SqlLiteral => Ok(value_text(kind, name, value)?.replace('\'', "''")),
        PlaceholderType::SqlIdent => Ok(value_text(kind, name, value)?.replace('"', "\"\"")),
        PlaceholderType::Number => {
            if value.is_number() {
                return Ok(value.to_string());
            }
            let text = value_text(kind, name, value)?;
            if NUMBER_LITERAL.is_match(&text) {
                Ok(text)
            } else {
                Err(invalid(kind, name, value))
            }
        }
        PlaceholderType::CssColor => {
            let text = value_text(kind, name, value)?;
            if CSS_COLOR_NAME.is_match(&text) || CSS_COLOR_HEX.is_match(&text) {
                Ok(text)
            } else {
                Err(invalid(kind, name, value))
            }
        }
    }
}

fn value_text(kind: PlaceholderType, name: &str, value: &Value) -> MapsResult<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        _ => Err(invalid(kind, name, value)),
    }
}

fn invalid(kind: PlaceholderType, name: &str, value: &Value) -> MapsError {
    MapsError::InvalidParameter {
        kind: kind.as_str(),
        name: name.to_string(),
        value: value.to_string(),
    }
}
