//! Expansion of `named` layer references into concrete layer lists.
//!
//! A map configuration may reference templates through layers of type
//! `named`. Expansion replaces each such layer with the layers of the
//! referenced template's instantiation, preserving overall layer order,
//! and reports which of the resulting layers came from a template so the
//! caller can route them to the template owner's database.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::debug;

use crate::error::{MapsError, MapsResult};
use crate::model::Layer;
use crate::templates::TemplateRegistry;

/// Database connection identity of a template owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseIdentity {
    pub user: String,
}

/// Per-layer datasource annotations produced by expansion.
///
/// Indexed by position in the expanded layer list; layers that did not
/// come from a template have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datasource {
    entries: BTreeMap<usize, DatabaseIdentity>,
}

impl Datasource {
    /// The database identity of the expanded layer at `index`, if it
    /// originated from a named layer.
    pub fn layer_datasource(&self, index: usize) -> Option<&DatabaseIdentity> {
        self.entries.get(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expands `named` layers of incoming map configurations.
#[derive(Clone)]
pub struct NamedLayerExpansion {
    templates: Arc<TemplateRegistry>,
}

impl NamedLayerExpansion {
    pub fn new(templates: Arc<TemplateRegistry>) -> Self {
        Self { templates }
    }

    /// Replaces every `named` layer in `layers` with the layers of its
    /// template's instantiation.
    ///
    /// Templates are fetched and instantiated concurrently; the expanded
    /// list keeps the original order, with each named layer's expansion
    /// spliced in at its position. Layers expanded from a template are
    /// annotated with `db` in the returned [`Datasource`].
    pub async fn get_layers(
        &self,
        username: &str,
        layers: Vec<Layer>,
        db: &DatabaseIdentity,
    ) -> MapsResult<(Vec<Layer>, Datasource)> {
        if !layers.iter().any(Layer::is_named) {
            return Ok((layers, Datasource::default()));
        }

        let expanded = try_join_all(
            layers.into_iter().map(|layer| self.expand_layer(username, layer)),
        )
        .await?;

        let mut out = Vec::new();
        let mut datasource = Datasource::default();
        for (group, from_template) in expanded {
            for layer in group {
                if from_template {
                    datasource.entries.insert(out.len(), db.clone());
                }
                out.push(layer);
            }
        }
        debug!(username, layers = out.len(), "expanded named layers");
        Ok((out, datasource))
    }

    async fn expand_layer(&self, username: &str, layer: Layer) -> MapsResult<(Vec<Layer>, bool)> {
        if !layer.is_named() {
            return Ok((vec![layer], false));
        }

        let name = layer.options.name.clone().ok_or(MapsError::MissingNamedMapName)?;
        let template = self
            .templates
            .get_template(username, &name)
            .await?
            .ok_or_else(|| MapsError::TemplateNotFound {
                owner: username.to_string(),
                name: name.clone(),
            })?;

        let auth_tokens = layer.options.auth_tokens.clone().unwrap_or_default();
        if !self.templates.is_authorized(&template, &auth_tokens) {
            return Err(MapsError::UnauthorizedInstantiation { name });
        }

        if template.layergroup.layers.iter().any(Layer::is_named) {
            return Err(MapsError::NestedNamedLayers);
        }

        let config = layer.options.config.clone().unwrap_or_default();
        let instantiated = self.templates.instance(&template, &config)?;
        Ok((instantiated.layers, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        LayerGroup, LayerOptions, Placeholder, Template, TemplateAuth, TEMPLATE_VERSION,
    };
    use crate::templates::TemplateRegistryOpts;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tilegarden_store::{KvStore, MemoryStore};

    fn expansion() -> (NamedLayerExpansion, Arc<TemplateRegistry>) {
        let store = Arc::new(MemoryStore::new()) as Arc<dyn KvStore>;
        let templates =
            Arc::new(TemplateRegistry::new(store, 0, TemplateRegistryOpts::default()));
        (NamedLayerExpansion::new(templates.clone()), templates)
    }

    fn db() -> DatabaseIdentity {
        DatabaseIdentity { user: "tiles_ro".to_string() }
    }

    fn sql_layer(sql: &str) -> Layer {
        Layer {
            kind: Some("cartodb".to_string()),
            options: LayerOptions { sql: Some(sql.to_string()), ..Default::default() },
            ..Default::default()
        }
    }

    fn named_layer(name: &str) -> Layer {
        Layer {
            kind: Some("named".to_string()),
            options: LayerOptions { name: Some(name.to_string()), ..Default::default() },
            ..Default::default()
        }
    }

    fn template(name: &str, layers: Vec<Layer>) -> Template {
        Template {
            version: TEMPLATE_VERSION.to_string(),
            name: name.to_string(),
            auth: TemplateAuth::Open,
            placeholders: BTreeMap::new(),
            layergroup: LayerGroup { layers, ..Default::default() },
            auth_id: None,
        }
    }

    #[tokio::test]
    async fn test_no_named_layers_is_passthrough() {
        let (exp, _) = expansion();
        let layers = vec![sql_layer("select 1"), sql_layer("select 2")];
        let (out, datasource) = exp.get_layers("alice", layers.clone(), &db()).await.unwrap();
        assert_eq!(out, layers);
        assert!(datasource.is_empty());
    }

    #[tokio::test]
    async fn test_named_layer_expands_in_place() {
        let (exp, templates) = expansion();
        templates
            .add_template(
                "alice",
                &template("pair", vec![sql_layer("select 'a'"), sql_layer("select 'b'")]),
            )
            .await
            .unwrap();

        let layers = vec![sql_layer("select 0"), named_layer("pair"), sql_layer("select 3")];
        let (out, datasource) = exp.get_layers("alice", layers, &db()).await.unwrap();

        let sqls: Vec<_> =
            out.iter().map(|l| l.options.sql.as_deref().unwrap()).collect();
        assert_eq!(sqls, vec!["select 0", "select 'a'", "select 'b'", "select 3"]);

        assert!(datasource.layer_datasource(0).is_none());
        assert_eq!(datasource.layer_datasource(1), Some(&db()));
        assert_eq!(datasource.layer_datasource(2), Some(&db()));
        assert!(datasource.layer_datasource(3).is_none());
    }

    #[tokio::test]
    async fn test_named_layer_config_overrides_defaults() {
        let (exp, templates) = expansion();
        let mut tpl = template("one", vec![sql_layer("select '<%= color %>'")]);
        tpl.placeholders.insert(
            "color".to_string(),
            Placeholder { kind: Some("sql_literal".to_string()), default: Some(json!("red")) },
        );
        templates.add_template("alice", &tpl).await.unwrap();

        let mut layer = named_layer("one");
        layer.options.config = Some(
            [("color".to_string(), json!("blue"))].into_iter().collect(),
        );
        let (out, _) = exp.get_layers("alice", vec![layer], &db()).await.unwrap();
        assert_eq!(out[0].options.sql.as_deref(), Some("select 'blue'"));

        let (out, _) =
            exp.get_layers("alice", vec![named_layer("one")], &db()).await.unwrap();
        assert_eq!(out[0].options.sql.as_deref(), Some("select 'red'"));
    }

    #[tokio::test]
    async fn test_named_layer_errors() {
        let (exp, templates) = expansion();

        let mut nameless = named_layer("x");
        nameless.options.name = None;
        let err = exp.get_layers("alice", vec![nameless], &db()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing Named Map name in layer options");

        let err =
            exp.get_layers("alice", vec![named_layer("ghost")], &db()).await.unwrap_err();
        assert_eq!(err.to_string(), "Template 'ghost' of user 'alice' does not exist");

        let mut tpl = template("locked_down", vec![sql_layer("select 1")]);
        tpl.auth = TemplateAuth::Token { valid_tokens: vec!["secret".to_string()] };
        templates.add_template("alice", &tpl).await.unwrap();

        let err = exp
            .get_layers("alice", vec![named_layer("locked_down")], &db())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized 'locked_down' template instantiation");

        let mut authorized = named_layer("locked_down");
        authorized.options.auth_tokens = Some(vec!["secret".to_string()]);
        let (out, _) = exp.get_layers("alice", vec![authorized], &db()).await.unwrap();
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_named_layers_rejected() {
        let (exp, templates) = expansion();
        templates
            .add_template("alice", &template("inner", vec![sql_layer("select 1")]))
            .await
            .unwrap();
        templates
            .add_template("alice", &template("outer", vec![named_layer("inner")]))
            .await
            .unwrap();

        let err =
            exp.get_layers("alice", vec![named_layer("outer")], &db()).await.unwrap_err();
        assert_eq!(err.to_string(), "Nested named layers are not allowed");
    }
}
