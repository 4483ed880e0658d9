mod parser;
mod types;

pub use parser::{parse_field, parse_schema, parse_schema_str};
pub use types::{
    FieldDefinition, FieldType, Schema, SchemaDescriptor, Table, TableDescriptor,
};

use std::sync::{Arc, PoisonError, RwLock};

struct Installed {
    version: u64,
    schema: Arc<Schema>,
}

/// Shared slot holding the active schema.
///
/// Readers take an `Arc<Schema>` snapshot with [`SchemaHandle::current`] and
/// keep it for the whole operation; [`SchemaHandle::install`] swaps in a new
/// version atomically. A schema is never mutated once installed.
#[derive(Clone)]
pub struct SchemaHandle {
    inner: Arc<RwLock<Installed>>,
}

impl SchemaHandle {
    pub fn new(schema: Schema) -> Self {
        SchemaHandle {
            inner: Arc::new(RwLock::new(Installed {
                version: 1,
                schema: Arc::new(schema),
            })),
        }
    }

    /// Snapshot of the active schema.
    pub fn current(&self) -> Arc<Schema> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard.schema)
    }

    /// Version of the active schema; starts at 1 and increases on every install.
    pub fn version(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    /// Replace the active schema. Returns the new version.
    pub fn install(&self, schema: Schema) -> u64 {
        let schema = Arc::new(schema);
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.version += 1;
        guard.schema = schema;
        log::info!(
            "Installed schema '{}' v{} ({} tables)",
            guard.schema.name,
            guard.version,
            guard.schema.tables.len()
        );
        guard.version
    }
}

impl Default for SchemaHandle {
    fn default() -> Self {
        SchemaHandle::new(Schema::default())
    }
}
