//! The template registry: per-user CRUD over named map templates.
//!
//! Mutations on a given (owner, name) pair are serialized through a lock
//! field in the store, acquired atomically with `hsetnx`. The lock is
//! released on every exit path; release failures are logged and never
//! override the operation's own outcome.
//!
//! Every template carries a certificate mirroring its auth rule. The
//! registry keeps the two in sync: add stores a certificate, update
//! replaces it, delete removes it together with all of its signatures.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use tilegarden_store::{DbIndex, KvStore};

use crate::digest;
use crate::error::{MapsError, MapsResult};
use crate::instantiate;
use crate::keys;
use crate::model::{
    Certificate, LayerGroup, Template, TemplateAuth, TEMPLATE_VERSION, VALID_IDENTIFIER,
};
use crate::signatures::SignatureRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Tuning knobs for [`TemplateRegistry`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TemplateRegistryOpts {
    /// Maximum number of templates per owner. Zero means unlimited.
    #[serde(default)]
    pub max_user_templates: u64,
    /// If set, a mutation may take over a lock older than this instead
    /// of failing, recovering from a crashed holder.
    #[serde(default)]
    pub lock_ttl: Option<Duration>,
}

/// Change notification emitted after a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateEvent {
    Added { owner: String, name: String },
    Updated { owner: String, name: String },
    Deleted { owner: String, name: String },
}

/// Store-backed registry of named map templates.
#[derive(Clone)]
pub struct TemplateRegistry {
    store: Arc<dyn KvStore>,
    db: DbIndex,
    opts: TemplateRegistryOpts,
    signatures: SignatureRegistry,
    events: broadcast::Sender<TemplateEvent>,
}

impl TemplateRegistry {
    pub fn new(store: Arc<dyn KvStore>, db: DbIndex, opts: TemplateRegistryOpts) -> Self {
        let signatures = SignatureRegistry::new(Arc::clone(&store), db);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { store, db, opts, signatures, events }
    }

    /// The signature registry sharing this registry's store and database.
    pub fn signatures(&self) -> &SignatureRegistry {
        &self.signatures
    }

    /// Subscribes to mutation events. Slow subscribers may miss events;
    /// the registry never blocks on them.
    pub fn subscribe(&self) -> broadcast::Receiver<TemplateEvent> {
        self.events.subscribe()
    }

    /// Creates a template. Fails if the owner already has one with the
    /// same name.
    ///
    /// Returns the template name.
    pub async fn add_template(&self, owner: &str, template: &Template) -> MapsResult<String> {
        self.check_invalid_template(template)?;
        self.check_quota(owner).await?;

        let name = template.name.clone();
        self.obtain_template_lock(owner, &name).await?;
        let result = self.add_template_locked(owner, template).await;
        self.release_template_lock(owner, &name).await;
        result
    }

    async fn add_template_locked(&self, owner: &str, template: &Template) -> MapsResult<String> {
        let name = &template.name;
        let tpl_key = keys::user_templates(owner);
        if self.store.hget(self.db, &tpl_key, name).await?.is_some() {
            return Err(MapsError::TemplateExists {
                owner: owner.to_string(),
                name: name.clone(),
            });
        }

        let mut stored = template.clone();
        stored.auth_id =
            Some(self.signatures.add_certificate(owner, &certificate_for(template)).await?);

        self.store
            .hset(self.db, &tpl_key, name, &serde_json::to_string(&stored)?)
            .await?;
        debug!(owner, name, "added template");
        let _ = self.events.send(TemplateEvent::Added {
            owner: owner.to_string(),
            name: name.clone(),
        });
        Ok(name.clone())
    }

    /// Replaces an existing template's content. The name is immutable:
    /// a `template.name` differing from `name` is rejected outright.
    pub async fn upd_template(
        &self,
        owner: &str,
        name: &str,
        template: &Template,
    ) -> MapsResult<()> {
        self.check_invalid_template(template)?;
        if template.name != name {
            return Err(MapsError::TemplateRename {
                current: name.to_string(),
                requested: template.name.clone(),
            });
        }

        self.obtain_template_lock(owner, name).await?;
        let result = self.upd_template_locked(owner, name, template).await;
        self.release_template_lock(owner, name).await;
        result
    }

    async fn upd_template_locked(
        &self,
        owner: &str,
        name: &str,
        template: &Template,
    ) -> MapsResult<()> {
        let tpl_key = keys::user_templates(owner);
        let previous = self.store.hget(self.db, &tpl_key, name).await?.ok_or_else(|| {
            MapsError::TemplateNotFound { owner: owner.to_string(), name: name.to_string() }
        })?;
        let previous: Template = serde_json::from_str(&previous)?;

        match previous.auth_id.as_deref() {
            Some(crt_id) => {
                if let Err(err) = self.signatures.del_certificate(owner, crt_id).await {
                    error!(owner, name, crt_id, error = %err,
                        "failed to delete certificate of updated template");
                    return Err(err);
                }
            }
            None => warn!(owner, name, "updated template had no certificate"),
        }

        let mut stored = template.clone();
        stored.auth_id =
            Some(self.signatures.add_certificate(owner, &certificate_for(template)).await?);
        self.store
            .hset(self.db, &tpl_key, name, &serde_json::to_string(&stored)?)
            .await?;
        debug!(owner, name, "updated template");

        if self.fingerprint(&previous)? != self.fingerprint(template)? {
            let _ = self.events.send(TemplateEvent::Updated {
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Deletes a template together with its certificate and every
    /// signature made with it.
    pub async fn del_template(&self, owner: &str, name: &str) -> MapsResult<()> {
        self.obtain_template_lock(owner, name).await?;
        let result = self.del_template_locked(owner, name).await;
        self.release_template_lock(owner, name).await;
        result
    }

    async fn del_template_locked(&self, owner: &str, name: &str) -> MapsResult<()> {
        let tpl_key = keys::user_templates(owner);
        let stored = self.store.hget(self.db, &tpl_key, name).await?.ok_or_else(|| {
            MapsError::TemplateNotFound { owner: owner.to_string(), name: name.to_string() }
        })?;
        let stored: Template = serde_json::from_str(&stored)?;

        match stored.auth_id.as_deref() {
            Some(crt_id) => self.signatures.del_certificate(owner, crt_id).await?,
            None => warn!(owner, name, "deleted template had no certificate"),
        }

        self.store.hdel(self.db, &tpl_key, name).await?;
        debug!(owner, name, "deleted template");
        let _ = self.events.send(TemplateEvent::Deleted {
            owner: owner.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    /// Fetches a template by name. `Ok(None)` when the owner has no such
    /// template.
    pub async fn get_template(&self, owner: &str, name: &str) -> MapsResult<Option<Template>> {
        let stored = self.store.hget(self.db, &keys::user_templates(owner), name).await?;
        match stored {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Names of all templates owned by `owner`.
    pub async fn list_templates(&self, owner: &str) -> MapsResult<Vec<String>> {
        Ok(self.store.hkeys(self.db, &keys::user_templates(owner)).await?)
    }

    /// Whether the presented tokens satisfy the template's own auth rule.
    pub fn is_authorized(&self, template: &Template, auth_tokens: &[String]) -> bool {
        match &template.auth {
            TemplateAuth::Open => true,
            TemplateAuth::Token { valid_tokens } => {
                auth_tokens.iter().any(|token| valid_tokens.contains(token))
            }
        }
    }

    /// Content fingerprint of a template, stable across storage metadata.
    ///
    /// Two templates with the same content fingerprint produce identical
    /// instantiations for identical parameters.
    pub fn fingerprint(&self, template: &Template) -> MapsResult<String> {
        let mut content = template.clone();
        content.auth_id = None;
        Ok(digest::content_hash(&content)?)
    }

    /// Instantiates a template: resolves every declared placeholder from
    /// `params` or its default, escapes it per its declared type, and
    /// returns the substituted layergroup tagged with a
    /// [`TemplateRef`](crate::model::TemplateRef).
    pub fn instance(
        &self,
        template: &Template,
        params: &Map<String, Value>,
    ) -> MapsResult<LayerGroup> {
        instantiate::instance(template, params)
    }

    /// Structural validation performed before any store write.
    fn check_invalid_template(&self, template: &Template) -> MapsResult<()> {
        if template.version != TEMPLATE_VERSION {
            return Err(MapsError::Validation(format!(
                "Unsupported template version {}",
                template.version
            )));
        }
        if template.name.is_empty() {
            return Err(MapsError::Validation("Missing template name".to_string()));
        }
        if !VALID_IDENTIFIER.is_match(&template.name) {
            return Err(MapsError::Validation(format!(
                "Invalid characters in template name '{}'",
                template.name
            )));
        }
        for (name, placeholder) in &template.placeholders {
            if !VALID_IDENTIFIER.is_match(name) {
                return Err(MapsError::Validation(format!(
                    "Invalid characters in placeholder name '{name}'"
                )));
            }
            if placeholder.default.is_none() {
                return Err(MapsError::Validation(format!(
                    "Missing default for placeholder '{name}'"
                )));
            }
            if placeholder.kind.is_none() {
                return Err(MapsError::Validation(format!(
                    "Missing type for placeholder '{name}'"
                )));
            }
        }
        if let TemplateAuth::Token { valid_tokens } = &template.auth {
            if valid_tokens.is_empty() {
                return Err(MapsError::Validation(
                    "Invalid 'token' authentication: no valid_tokens".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn check_quota(&self, owner: &str) -> MapsResult<()> {
        if self.opts.max_user_templates == 0 {
            return Ok(());
        }
        let count = self.store.hlen(self.db, &keys::user_templates(owner)).await?;
        if count >= self.opts.max_user_templates {
            return Err(MapsError::TemplateQuotaExceeded {
                owner: owner.to_string(),
                count,
                limit: self.opts.max_user_templates,
            });
        }
        Ok(())
    }

    async fn obtain_template_lock(&self, owner: &str, name: &str) -> MapsResult<()> {
        let locks_key = keys::user_template_locks(owner);
        let now_ms = epoch_millis();
        let acquired = self
            .store
            .hsetnx(self.db, &locks_key, name, &now_ms.to_string())
            .await?;
        if acquired {
            return Ok(());
        }

        if let Some(ttl) = self.opts.lock_ttl {
            let held_since = self
                .store
                .hget(self.db, &locks_key, name)
                .await?
                .and_then(|ts| ts.parse::<u128>().ok());
            if let Some(held_since) = held_since {
                if now_ms.saturating_sub(held_since) > ttl.as_millis() {
                    self.store
                        .hset(self.db, &locks_key, name, &now_ms.to_string())
                        .await?;
                    warn!(owner, name, "took over stale template lock");
                    return Ok(());
                }
            }
        }

        Err(MapsError::TemplateLocked { owner: owner.to_string(), name: name.to_string() })
    }

    async fn release_template_lock(&self, owner: &str, name: &str) {
        match self.store.hdel(self.db, &keys::user_template_locks(owner), name).await {
            Ok(true) => {}
            Ok(false) => warn!(owner, name, "template lock was already released"),
            Err(err) => warn!(owner, name, error = %err, "failed to release template lock"),
        }
    }
}

/// The certificate mirroring a template's auth rule.
fn certificate_for(template: &Template) -> Certificate {
    Certificate {
        version: TEMPLATE_VERSION.to_string(),
        template_id: template.name.clone(),
        auth: template.auth.clone(),
    }
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
