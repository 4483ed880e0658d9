use crate::document::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Descriptor as read from disk (YAML or JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
}

/// One table entry of a descriptor. Each field is a
/// `name,type[,modifier]*` string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// A parsed, immutable schema. Replaced wholesale on reload, never edited.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub name: String,
    pub tables: HashMap<String, Table>,
}

impl Schema {
    /// Look up the table governing a collection, if one is declared.
    pub fn table(&self, collection: &str) -> Option<&Table> {
        self.tables.get(collection)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Definition of a single table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
}

impl Table {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.unique)
    }
}

/// Definition of a single field in a table
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub autoincrement: bool,
    pub unique: bool,
    pub required: bool,
    /// Lower bound; 0 disables the check.
    pub minlen: i64,
    /// Upper bound; 0 disables the check.
    pub maxlen: i64,
    pub default: Option<Value>,
    pub alias: Option<String>,
    pub validation: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldDefinition {
            name: name.into(),
            field_type,
            autoincrement: false,
            unique: false,
            required: false,
            minlen: 0,
            maxlen: 0,
            default: None,
            alias: None,
            validation: None,
        }
    }

    /// Name the field is stored under once validation has run.
    pub fn stored_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Int,
    Bigint,
    Float,
    Double,
    Varchar,
    Date,
}

impl FieldType {
    /// Case-insensitive; anything unrecognized is a `String`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "int" => FieldType::Int,
            "bigint" => FieldType::Bigint,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "varchar" => FieldType::Varchar,
            "date" => FieldType::Date,
            _ => FieldType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Bigint => "bigint",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Varchar => "varchar",
            FieldType::Date => "date",
        }
    }

    /// Bounds measure character length.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Varchar)
    }

    /// Bounds compare the numeric value.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Int | FieldType::Bigint | FieldType::Float | FieldType::Double
        )
    }
}
