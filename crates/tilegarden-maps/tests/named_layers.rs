//! Integration tests for named-layer expansion against a live registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tilegarden_maps::{
    DatabaseIdentity, Layer, LayerGroup, LayerOptions, NamedLayerExpansion, Placeholder,
    Template, TemplateAuth, TemplateRegistry, TemplateRegistryOpts, TEMPLATE_VERSION,
};
use tilegarden_store::{KvStore, MemoryStore};

fn setup() -> (NamedLayerExpansion, Arc<TemplateRegistry>) {
    let store = Arc::new(MemoryStore::new()) as Arc<dyn KvStore>;
    let templates = Arc::new(TemplateRegistry::new(store, 0, TemplateRegistryOpts::default()));
    (NamedLayerExpansion::new(templates.clone()), templates)
}

fn db() -> DatabaseIdentity {
    DatabaseIdentity { user: "alice_ro".to_string() }
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

fn parametrized_template() -> Template {
    let mut placeholders = BTreeMap::new();
    placeholders.insert(
        "table".to_string(),
        Placeholder { kind: Some("sql_ident".to_string()), default: Some(json!("points")) },
    );
    placeholders.insert(
        "width".to_string(),
        Placeholder { kind: Some("number".to_string()), default: Some(json!(2)) },
    );
    Template {
        version: TEMPLATE_VERSION.to_string(),
        name: "world".to_string(),
        auth: TemplateAuth::Open,
        placeholders,
        layergroup: LayerGroup {
            layers: vec![Layer {
                kind: Some("cartodb".to_string()),
                options: LayerOptions {
                    sql: Some(r#"select * from "<%= table %>""#.to_string()),
                    cartocss: Some("#l { marker-width: <%= width %>; }".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        },
        auth_id: None,
    }
}

#[tokio::test]
async fn test_expansion_substitutes_config_values() {
    let (exp, templates) = setup();
    templates.add_template("alice", &parametrized_template()).await.unwrap();

    let mut layer = named_layer("world");
    layer.options.config = Some(
        [
            ("table".to_string(), json!("world_borders")),
            ("width".to_string(), json!(4)),
        ]
        .into_iter()
        .collect(),
    );

    let (out, datasource) = exp.get_layers("alice", vec![layer], &db()).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].options.sql.as_deref(), Some(r#"select * from "world_borders""#));
    assert_eq!(out[0].options.cartocss.as_deref(), Some("#l { marker-width: 4; }"));
    assert_eq!(datasource.layer_datasource(0), Some(&db()));
}

#[tokio::test]
async fn test_injection_attempt_is_rejected() {
    let (exp, templates) = setup();
    templates.add_template("alice", &parametrized_template()).await.unwrap();

    let mut layer = named_layer("world");
    layer.options.config = Some(
        [("width".to_string(), json!("4; background: url(x)"))].into_iter().collect(),
    );

    let err = exp.get_layers("alice", vec![layer], &db()).await.unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert!(err.to_string().starts_with("Invalid number value for template parameter 'width'"));
}

#[tokio::test]
async fn test_mixed_configuration_keeps_order_and_annotations() {
    let (exp, templates) = setup();
    templates.add_template("alice", &parametrized_template()).await.unwrap();

    let layers = vec![
        sql_layer("select 'base'"),
        named_layer("world"),
        named_layer("world"),
        sql_layer("select 'top'"),
    ];
    let (out, datasource) = exp.get_layers("alice", layers, &db()).await.unwrap();

    assert_eq!(out.len(), 4);
    assert_eq!(out[0].options.sql.as_deref(), Some("select 'base'"));
    assert_eq!(out[3].options.sql.as_deref(), Some("select 'top'"));
    assert!(datasource.layer_datasource(0).is_none());
    assert_eq!(datasource.layer_datasource(1), Some(&db()));
    assert_eq!(datasource.layer_datasource(2), Some(&db()));
    assert!(datasource.layer_datasource(3).is_none());
}

#[tokio::test]
async fn test_expanded_layers_reference_current_template_content() {
    let (exp, templates) = setup();
    templates.add_template("alice", &parametrized_template()).await.unwrap();

    let mut updated = parametrized_template();
    updated.layergroup.layers[0].options.sql = Some("select 42".to_string());
    updated.placeholders.clear();
    templates.upd_template("alice", "world", &updated).await.unwrap();

    let (out, _) = exp.get_layers("alice", vec![named_layer("world")], &db()).await.unwrap();
    assert_eq!(out[0].options.sql.as_deref(), Some("select 42"));
}
