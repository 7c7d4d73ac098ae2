//! Data model for map templates, certificates and layer configurations.
//!
//! Templates and certificates are persisted as JSON in the key-value
//! store; unknown fields of layergroups and layers are preserved through
//! flattened maps so a stored template round-trips byte-for-byte in
//! content.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The single supported template and certificate version.
pub const TEMPLATE_VERSION: &str = "0.0.1";

/// Template names and placeholder names: a letter followed by letters,
/// digits or underscores.
pub(crate) static VALID_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][0-9a-zA-Z_]*$").unwrap());

/// Authorization rule protecting a template or certificate.
///
/// Serializes as a tagged object: `{"method":"open"}` or
/// `{"method":"token","valid_tokens":[...]}`. Deserialization is
/// tolerant of the historical loose forms: a missing field, `null`, `{}`
/// or the bare string `"open"` all mean open access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TemplateAuth {
    #[default]
    Open,
    Token {
        valid_tokens: Vec<String>,
    },
}

impl<'de> Deserialize<'de> for TemplateAuth {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null => Ok(TemplateAuth::Open),
            Value::String(method) if method == "open" => Ok(TemplateAuth::Open),
            Value::String(method) => {
                Err(de::Error::custom(format!("Unsupported authentication method: {method}")))
            }
            Value::Object(map) => match map.get("method").and_then(Value::as_str) {
                None | Some("open") => Ok(TemplateAuth::Open),
                Some("token") => {
                    let tokens = map.get("valid_tokens").ok_or_else(|| {
                        de::Error::custom("Invalid 'token' authentication: missing valid_tokens")
                    })?;
                    let valid_tokens: Vec<String> = serde_json::from_value(tokens.clone())
                        .map_err(|_| {
                            de::Error::custom(
                                "Invalid 'token' authentication: missing valid_tokens",
                            )
                        })?;
                    Ok(TemplateAuth::Token { valid_tokens })
                }
                Some(method) => {
                    Err(de::Error::custom(format!("Unsupported authentication method: {method}")))
                }
            },
            other => Err(de::Error::custom(format!(
                "Unsupported authentication method: {other}"
            ))),
        }
    }
}

/// An authorization certificate owned by a signer.
///
/// Content-addressed: its id is the SHA-256 of its canonical JSON form,
/// so re-adding identical content always yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub version: String,
    /// Name of the template this certificate protects.
    pub template_id: String,
    #[serde(default)]
    pub auth: TemplateAuth,
}

/// Declared substitution parameter of a template.
///
/// `kind` and `default` stay optional at the parse level so validation
/// can report exactly which one is missing for which placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placeholder {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// The set of placeholder types the substitution step understands.
///
/// The declared type is the only thing standing between a template
/// parameter and the SQL/CartoCSS it is spliced into, so anything
/// undeclared or unknown fails instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderType {
    /// SQL string literal: single quotes are doubled.
    SqlLiteral,
    /// SQL identifier: double quotes are doubled.
    SqlIdent,
    /// Numeric literal: validated, never rewritten.
    Number,
    /// CSS color name or hex value: validated, never rewritten.
    CssColor,
}

impl PlaceholderType {
    /// Parses a declared type name. `None` for unknown types.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "sql_literal" => Some(PlaceholderType::SqlLiteral),
            "sql_ident" => Some(PlaceholderType::SqlIdent),
            "number" => Some(PlaceholderType::Number),
            "css_color" => Some(PlaceholderType::CssColor),
            _ => None,
        }
    }

    /// The declared type name, as written in templates.
    pub fn as_str(self) -> &'static str {
        match self {
            PlaceholderType::SqlLiteral => "sql_literal",
            PlaceholderType::SqlIdent => "sql_ident",
            PlaceholderType::Number => "number",
            PlaceholderType::CssColor => "css_color",
        }
    }
}

impl fmt::Display for PlaceholderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, reusable map configuration owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Must equal [`TEMPLATE_VERSION`]; checked by validation, not serde.
    #[serde(default)]
    pub version: String,
    /// Identifier, unique per owner. Immutable once created.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub auth: TemplateAuth,
    #[serde(default)]
    pub placeholders: BTreeMap<String, Placeholder>,
    pub layergroup: LayerGroup,
    /// Id of the certificate protecting this template. Injected by the
    /// registry on add/update; outer layers strip it before returning
    /// the template to clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_id: Option<String>,
}

/// The template's name and auth rule, attached to instantiated
/// layergroups so callers can build cache identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    pub auth: TemplateAuth,
}

/// A map configuration: an ordered list of layers plus whatever other
/// fields the rendering engine understands (kept verbatim in `extra`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LayerGroup {
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single layer of a map configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Layer {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub options: LayerOptions,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Layer {
    /// Whether this layer is a reference to a named template rather than
    /// a concrete layer definition.
    pub fn is_named(&self) -> bool {
        self.kind.as_deref() == Some("named")
    }
}

/// Layer options. `sql`/`cartocss` are the substitution targets; `name`,
/// `config` and `auth_tokens` only carry meaning on `named` layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LayerOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cartocss: Option<String>,
    /// Referenced template name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Placeholder value overrides for instantiation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    /// Tokens presented for authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_tokens: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
