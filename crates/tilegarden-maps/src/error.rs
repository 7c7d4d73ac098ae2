//! Error types for the template/signature subsystem.

use tilegarden_store::StoreError;

/// Result alias for registry operations.
pub type MapsResult<T> = Result<T, MapsError>;

/// Errors surfaced by the registries and the named-layer expansion.
///
/// Every variant carries a message sufficient to diagnose the cause
/// without reading logs; [`http_status`](MapsError::http_status) gives the
/// calling HTTP layer a response-code hint without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum MapsError {
    /// A template failed structural validation before any store write.
    #[error("{0}")]
    Validation(String),

    /// A concurrent mutation holds the lock for this template.
    #[error("Template '{name}' of user '{owner}' is locked")]
    TemplateLocked { owner: String, name: String },

    /// Add refused to overwrite an existing template.
    #[error("Template '{name}' of user '{owner}' already exists")]
    TemplateExists { owner: String, name: String },

    #[error("Template '{name}' of user '{owner}' does not exist")]
    TemplateNotFound { owner: String, name: String },

    /// The per-owner template quota was reached.
    #[error("User '{owner}' reached limit on number of templates ({count}/{limit})")]
    TemplateQuotaExceeded { owner: String, count: u64, limit: u64 },

    /// Update was asked to change the template name, which is immutable.
    #[error("Cannot update name of a map template ('{current}' != '{requested}')")]
    TemplateRename { current: String, requested: String },

    #[error("Unsupported certificate version {0}")]
    UnsupportedCertificateVersion(String),

    /// The presented auth tokens do not satisfy the template's auth rule.
    #[error("Unauthorized '{name}' template instantiation")]
    UnauthorizedInstantiation { name: String },

    /// A referenced template itself contains a `named` layer.
    #[error("Nested named layers are not allowed")]
    NestedNamedLayers,

    /// A `named` layer did not say which template it references.
    #[error("Missing Named Map name in layer options")]
    MissingNamedMapName,

    /// A placeholder value failed its type-directed check.
    #[error("Invalid {kind} value for template parameter '{name}': {value}")]
    InvalidParameter { kind: &'static str, name: String, value: String },

    /// A placeholder declared a type the substitution step does not know.
    #[error("Invalid placeholder type '{kind}'")]
    InvalidPlaceholderType { kind: String },

    /// Store transport failure, propagated unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored value could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MapsError {
    /// HTTP status hint for the calling layer.
    pub fn http_status(&self) -> u16 {
        match self {
            MapsError::Validation(_)
            | MapsError::TemplateRename { .. }
            | MapsError::UnsupportedCertificateVersion(_)
            | MapsError::NestedNamedLayers
            | MapsError::MissingNamedMapName
            | MapsError::InvalidParameter { .. }
            | MapsError::InvalidPlaceholderType { .. } => 400,
            MapsError::UnauthorizedInstantiation { .. } => 403,
            MapsError::TemplateNotFound { .. } => 404,
            MapsError::TemplateLocked { .. }
            | MapsError::TemplateExists { .. }
            | MapsError::TemplateQuotaExceeded { .. } => 409,
            MapsError::Store(_) | MapsError::Serialization(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_identify_template_and_user() {
        let err = MapsError::TemplateLocked { owner: "me".to_string(), name: "tpl".to_string() };
        assert_eq!(err.to_string(), "Template 'tpl' of user 'me' is locked");

        let err = MapsError::TemplateNotFound { owner: "me".to_string(), name: "tpl".to_string() };
        assert_eq!(err.to_string(), "Template 'tpl' of user 'me' does not exist");
    }

    #[test]
    fn test_http_status_hints() {
        assert_eq!(
            MapsError::UnauthorizedInstantiation { name: "t".to_string() }.http_status(),
            403
        );
        assert_eq!(
            MapsError::TemplateNotFound { owner: "u".to_string(), name: "t".to_string() }
                .http_status(),
            404
        );
        assert_eq!(
            MapsError::TemplateExists { owner: "u".to_string(), name: "t".to_string() }
                .http_status(),
            409
        );
        assert_eq!(MapsError::NestedNamedLayers.http_status(), 400);
    }

    #[test]
    fn test_quota_message_shows_counts() {
        let err = MapsError::TemplateQuotaExceeded {
            owner: "me".to_string(),
            count: 5,
            limit: 5,
        };
        assert_eq!(
            err.to_string(),
            "User 'me' reached limit on number of templates (5/5)"
        );
    }
}
