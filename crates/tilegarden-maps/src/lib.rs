//! Named map templates for the Tilegarden control plane.
//!
//! This crate owns the template/signature subsystem of the tile server:
//! reusable named map templates with safe parameter substitution, the
//! certificates and signatures that authorize instantiating them, and the
//! expansion of `named` layer references into concrete layer lists.
//!
//! State is persisted through the [`tilegarden_store::KvStore`] client;
//! nothing here touches the rendering engine or the SQL database directly.

pub mod error;
pub mod expansion;
pub mod model;
pub mod signatures;
pub mod templates;

mod digest;
mod instantiate;
mod keys;

pub use error::{MapsError, MapsResult};
pub use expansion::{Datasource, DatabaseIdentity, NamedLayerExpansion};
pub use model::{
    Certificate, Layer, LayerGroup, LayerOptions, Placeholder, PlaceholderType, Template,
    TemplateAuth, TemplateRef, TEMPLATE_VERSION,
};
pub use signatures::SignatureRegistry;
pub use templates::{TemplateEvent, TemplateRegistry, TemplateRegistryOpts};
