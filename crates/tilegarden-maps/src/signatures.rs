//! Certificate storage and map signatures.
//!
//! A signer (user) owns a hash of content-addressed certificates. A map
//! is "signed" with a certificate when instantiating a template produced
//! it; authorization of later accesses walks the map's signing
//! certificates until one admits the presented token.
//!
//! Two inverse set relations track the links: `map_sig` answers "which
//! certificates sign this map" and `crt_sig` answers "which maps did this
//! certificate sign", so deleting a certificate can drop all of its
//! signatures in one batch.

use std::sync::Arc;

use tracing::{debug, warn};

use tilegarden_store::{DbIndex, KvCommand, KvStore};

use crate::digest;
use crate::error::{MapsError, MapsResult};
use crate::keys;
use crate::model::{Certificate, TemplateAuth, TEMPLATE_VERSION};

/// Registry of authorization certificates and map signatures.
#[derive(Clone)]
pub struct SignatureRegistry {
    store: Arc<dyn KvStore>,
    db: DbIndex,
}

impl SignatureRegistry {
    pub fn new(store: Arc<dyn KvStore>, db: DbIndex) -> Self {
        Self { store, db }
    }

    /// Checks whether `auth_token` satisfies a certificate's auth rule.
    ///
    /// Open certificates admit anything, including no token at all.
    pub fn authorized_by_cert(
        &self,
        cert: &Certificate,
        auth_token: Option<&str>,
    ) -> MapsResult<bool> {
        if cert.version != TEMPLATE_VERSION {
            return Err(MapsError::UnsupportedCertificateVersion(cert.version.clone()));
        }
        Ok(match &cert.auth {
            TemplateAuth::Open => true,
            TemplateAuth::Token { valid_tokens } => match auth_token {
                Some(token) => valid_tokens.iter().any(|t| t == token),
                None => false,
            },
        })
    }

    /// Whether any certificate signing `map_id` admits `auth_token`.
    ///
    /// An unsigned map authorizes nobody. Signature ids whose certificate
    /// is gone, and certificates that fail to parse, are logged and
    /// skipped rather than failing the whole check.
    pub async fn is_authorized(
        &self,
        signer: &str,
        map_id: &str,
        auth_token: Option<&str>,
    ) -> MapsResult<bool> {
        let crt_ids = self.store.smembers(self.db, &keys::map_signatures(signer, map_id)).await?;
        if crt_ids.is_empty() {
            return Ok(false);
        }

        let serialized = self
            .store
            .hmget(self.db, &keys::user_certificates(signer), &crt_ids)
            .await?;

        for (crt_id, value) in crt_ids.iter().zip(serialized) {
            let Some(value) = value else {
                warn!(signer, map_id, crt_id, "signature references missing certificate");
                continue;
            };
            let cert: Certificate = match serde_json::from_str(&value) {
                Ok(cert) => cert,
                Err(err) => {
                    warn!(signer, crt_id, error = %err, "skipping malformed certificate");
                    continue;
                }
            };
            if self.authorized_by_cert(&cert, auth_token)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stores a certificate and returns its content-derived id.
    ///
    /// The id is the SHA-256 of the certificate's canonical JSON, so
    /// identical content is stored once and re-adding it is a no-op
    /// beyond the write itself.
    pub async fn add_certificate(&self, signer: &str, cert: &Certificate) -> MapsResult<String> {
        let serialized = serde_json::to_string(cert)?;
        let crt_id = digest::content_hash(cert)?;
        self.store
            .hset(self.db, &keys::user_certificates(signer), &crt_id, &serialized)
            .await?;
        debug!(signer, crt_id, "stored certificate");
        Ok(crt_id)
    }

    /// Deletes a certificate and every signature made with it.
    ///
    /// The signature removals go through a single batch so a map never
    /// keeps a signature from a certificate that no longer exists.
    pub async fn del_certificate(&self, signer: &str, crt_id: &str) -> MapsResult<()> {
        let removed = self
            .store
            .hdel(self.db, &keys::user_certificates(signer), crt_id)
            .await?;
        if !removed {
            warn!(signer, crt_id, "deleting a certificate that was not stored");
        }

        let crt_sig_key = keys::certificate_signatures(signer, crt_id);
        let map_ids = self.store.smembers(self.db, &crt_sig_key).await?;
        if !map_ids.is_empty() {
            let commands: Vec<KvCommand> = map_ids
                .iter()
                .map(|map_id| KvCommand::SRem {
                    key: keys::map_signatures(signer, map_id),
                    member: crt_id.to_string(),
                })
                .collect();
            let counts = self.store.multi(self.db, commands).await?;
            for (map_id, count) in map_ids.iter().zip(counts) {
                if count == 0 {
                    warn!(signer, crt_id, map_id, "signature was already gone");
                }
            }
        }

        self.store.del(self.db, &crt_sig_key).await?;
        debug!(signer, crt_id, maps = map_ids.len(), "deleted certificate and its signatures");
        Ok(())
    }

    /// Records that `map_id` is signed with certificate `crt_id`.
    ///
    /// The two sides of the relation are written sequentially, not
    /// transactionally; a crash between them leaves a forward reference
    /// that `is_authorized` tolerates.
    pub async fn sign_map(&self, signer: &str, crt_id: &str, map_id: &str) -> MapsResult<()> {
        self.store
            .sadd(self.db, &keys::map_signatures(signer, map_id), crt_id)
            .await?;
        self.store
            .sadd(self.db, &keys::certificate_signatures(signer, crt_id), map_id)
            .await?;
        debug!(signer, crt_id, map_id, "signed map");
        Ok(())
    }

    /// Stores a certificate and signs `map_id` with it in one call.
    pub async fn add_signature(
        &self,
        signer: &str,
        cert: &Certificate,
        map_id: &str,
    ) -> MapsResult<String> {
        let crt_id = self.add_certificate(signer, cert).await?;
        self.sign_map(signer, &crt_id, map_id).await?;
        Ok(crt_id)
    }
}
