// Reality - Core Library
// Entities, their attribute histories, and the sources that describe them

pub mod error;
pub mod config;
pub mod http;
pub mod response;       // Paginated replies + continuation merge
pub mod coerce;         // Raw payload → typed value
pub mod measure;
pub mod geo;
pub mod value;
pub mod variable;       // Observations over time
pub mod entity;         // Entity, Link, EntityList
pub mod describers;     // Source registry
pub mod loader;         // Batch loading
pub mod labels;         // Label cache for claim references
pub mod wikidata;
pub mod wikipedia;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use error::{RealityError, Result};
pub use config::Config;
pub use http::{HttpClient, Params};
#[cfg(feature = "http")]
pub use http::ApiClient;
pub use response::{deep_merge, Request, Response, METADATA_KEYS};
pub use coerce::{coerce, CoerceOptions, CoerceType, Raw};
pub use measure::{measure, Measure};
pub use geo::{coerce_coord, Coord};
pub use value::Value;
pub use variable::{Observation, Variable};
pub use entity::{entity, Entity, EntityList, Link, WIKIDATA, WIKIPEDIA};
pub use describers::{
    Describer, Describers, EncyclopediaSource, GraphEntity, KnowledgeGraphSource, Page, PageSet,
};
pub use loader::{BatchLoader, LoadSummary};
pub use labels::{Facet, LabelResolver, LabelSource, LabelStore};
pub use wikidata::{Wikidata, WikidataLabels};
pub use wikipedia::{default_fields, InfoboxField, Wikipedia};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
