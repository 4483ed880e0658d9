pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod kv;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use backend::DocumentBackend;
pub use config::StoreConfig;
pub use document::{Document, Value};
pub use error::{KvDocError, Result};
pub use schema::{Schema, SchemaHandle};
pub use store::{Order, Store};
pub use validation::{RuleRegistry, ValidationError};
