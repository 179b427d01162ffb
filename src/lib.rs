pub mod config;
pub mod csv;
pub mod error;
pub mod facet;
pub mod fielded;
pub mod index;
pub mod parser;
pub mod query;
pub mod rql;
pub mod schema;
pub mod sql;
pub mod tree;
pub mod typeinfo;
pub mod validate;
pub mod wildcard;
pub mod writer;

use config::ParseConfig;

pub use config::TagStormConfig;
pub use error::{Result, TagStormError};
pub use facet::{FacetField, FacetSet, FacetVal};
pub use fielded::{FieldedTable, FromTableOptions};
pub use index::{IndexMode, StanzaIndex};
pub use query::{QueryOutput, QueryRow};
pub use rql::{RqlExpr, RqlStatement};
pub use schema::Schema;
pub use sql::SqlEmitter;
pub use tree::{StanzaId, TagPair, TagStanza, TagStorm};
pub use typeinfo::{infer_types, TagTypeInfo};
pub use validate::{validate_storm, SchemaError, ValidationReport};
pub use writer::{FlatOptions, TableStyle};

// ── Core API ───────────────────────────────────────────────────────

/// Parse TagStorm text with the default limits. `file_name` is only used
/// in error messages.
pub fn parse_tag_storm(text: &str, file_name: &str) -> Result<TagStorm> {
    parser::parse_with(text, file_name, &ParseConfig::default())
}

#[cfg(test)]
mod tests;
