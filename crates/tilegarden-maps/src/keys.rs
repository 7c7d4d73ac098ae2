//! Store key layout for templates, certificates and signatures.
//!
//! | Key pattern | Type | Contents |
//! |---|---|---|
//! | `map_tpl\|{owner}` | hash | template name → serialized template |
//! | `map_tpl\|{owner}\|locks` | hash | template name → lock timestamp (ms) |
//! | `map_crt\|{signer}` | hash | certificate id → serialized certificate |
//! | `map_sig\|{signer}\|{map_id}` | set | certificate ids signing this map |
//! | `crt_sig\|{signer}\|{crt_id}` | set | map ids signed with this certificate |

/// Per-user map templates.
pub(crate) fn user_templates(owner: &str) -> String {
    format!("map_tpl|{owner}")
}

/// Per-user template mutation locks.
pub(crate) fn user_template_locks(owner: &str) -> String {
    format!("map_tpl|{owner}|locks")
}

/// Per-user authorization certificates.
pub(crate) fn user_certificates(signer: &str) -> String {
    format!("map_crt|{signer}")
}

/// Certificates that signed a given map.
pub(crate) fn map_signatures(signer: &str, map_id: &str) -> String {
    format!("map_sig|{signer}|{map_id}")
}

/// Maps signed with a given certificate; consulted on certificate
/// deletion to drop all of its signatures.
pub(crate) fn certificate_signatures(signer: &str, crt_id: &str) -> String {
    format!("crt_sig|{signer}|{crt_id}")
}
