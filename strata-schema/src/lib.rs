//! # strata-schema
//!
//! Typed schema definitions and content-addressed snapshots for the strata
//! migration engine.
//!
//! Plugins describe their tables with the builder types in [`spec`]; the
//! engine turns a [`PluginSchema`] into a [`SchemaSnapshot`] — a canonical,
//! ordering-independent structure whose sha256 digest is the cheap
//! equality check the migration pipeline short-circuits on.
//!
//! ```rust
//! use strata_schema::{ColumnSpec, ColumnType, PluginSchema, SchemaSnapshot, TableSpec};
//!
//! let schema = PluginSchema::new().table(
//!     TableSpec::new("memories")
//!         .column(ColumnSpec::new("id", ColumnType::Uuid).primary_key())
//!         .column(ColumnSpec::new("content", ColumnType::Jsonb)),
//! );
//!
//! let snapshot = SchemaSnapshot::from_schema(&schema).unwrap();
//! let hash = snapshot.hash().unwrap();
//! assert_eq!(hash.len(), 64);
//! ```

pub mod error;
pub mod snapshot;
pub mod spec;

pub use error::{SchemaError, SchemaResult};
pub use snapshot::{ColumnDef, ForeignKeyDef, IndexDef, SchemaSnapshot, TableDef};
pub use spec::{
    ColumnSpec, ColumnType, DefaultValue, ForeignKeySpec, IndexSpec, PluginSchema,
    ReferentialAction, TableSpec, validate_identifier,
};
