use super::types::{FieldDefinition, FieldType, Schema, SchemaDescriptor, Table};
use crate::document::{parse_timestamp, Value};
use crate::error::{KvDocError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Parse a descriptor file into a Schema
pub fn parse_schema(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse descriptor text (YAML or JSON) into a Schema. Empty text yields an
/// empty schema.
pub fn parse_schema_str(content: &str) -> Result<Schema> {
    if content.trim().is_empty() {
        return Ok(Schema::default());
    }

    let descriptor: SchemaDescriptor = serde_yaml::from_str(content)
        .map_err(|e| KvDocError::Parse(format!("malformed descriptor: {e}")))?;

    let mut tables = HashMap::new();
    for table_desc in descriptor.tables {
        let mut fields: Vec<FieldDefinition> = Vec::with_capacity(table_desc.fields.len());
        for raw in &table_desc.fields {
            let field = parse_field(raw)
                .map_err(|e| KvDocError::Parse(format!("table '{}': {e}", table_desc.name)))?;
            if fields.iter().any(|f| f.name == field.name) {
                return Err(KvDocError::Parse(format!(
                    "table '{}': duplicate field '{}'",
                    table_desc.name, field.name
                )));
            }
            fields.push(field);
        }

        let table = Table {
            name: table_desc.name.clone(),
            fields,
        };
        if tables.insert(table_desc.name.clone(), table).is_some() {
            return Err(KvDocError::Parse(format!(
                "duplicate table '{}'",
                table_desc.name
            )));
        }
    }

    Ok(Schema {
        name: descriptor.schema,
        tables,
    })
}

/// Parse one `name,type[,modifier]*` field descriptor.
pub fn parse_field(descriptor: &str) -> Result<FieldDefinition> {
    let tokens: Vec<&str> = descriptor.split(',').map(str::trim).collect();
    if tokens.len() < 2 {
        return Err(KvDocError::Parse(format!(
            "field descriptor '{descriptor}' needs at least a name and a type"
        )));
    }
    if tokens[0].is_empty() {
        return Err(KvDocError::Parse(format!(
            "field descriptor '{descriptor}' has an empty name"
        )));
    }
    // `:` separates field and value in uniqueness keys
    if tokens[0].contains(':') {
        return Err(KvDocError::Parse(format!(
            "field name '{}' must not contain ':'",
            tokens[0]
        )));
    }

    let mut field = FieldDefinition::new(tokens[0], FieldType::parse(tokens[1]));
    let mut raw_default: Option<&str> = None;

    for token in &tokens[2..] {
        match token.split_once('=') {
            None => match token.to_ascii_lowercase().as_str() {
                "autoincrement" => field.autoincrement = true,
                "unique" => field.unique = true,
                "required" => field.required = true,
                "" => {}
                other => log::warn!("Ignoring unknown modifier '{other}' on field '{}'", field.name),
            },
            Some((key, value)) => {
                let value = value.trim();
                match key.trim().to_ascii_lowercase().as_str() {
                    "minlen" => field.minlen = parse_bound(&field.name, "minlen", value)?,
                    "maxlen" => field.maxlen = parse_bound(&field.name, "maxlen", value)?,
                    "alias" => field.alias = non_empty(value),
                    "validation" => field.validation = non_empty(value),
                    "default" => raw_default = Some(value),
                    other => log::warn!(
                        "Ignoring unknown modifier '{other}={value}' on field '{}'",
                        field.name
                    ),
                }
            }
        }
    }

    if let Some(raw) = raw_default {
        field.default = Some(typed_default(&field, raw)?);
    }

    Ok(field)
}

fn parse_bound(field: &str, key: &str, value: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|_| {
        KvDocError::Parse(format!(
            "field '{field}': {key} value '{value}' is not an integer"
        ))
    })
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Convert a raw `default=` token into a value of the field's declared type.
fn typed_default(field: &FieldDefinition, raw: &str) -> Result<Value> {
    let invalid = || {
        KvDocError::Parse(format!(
            "field '{}': default '{raw}' is not a valid {}",
            field.name,
            field.field_type.as_str()
        ))
    };

    Ok(match field.field_type {
        FieldType::Int | FieldType::Bigint => Value::Int(raw.parse().map_err(|_| invalid())?),
        FieldType::Float | FieldType::Double => Value::Float(raw.parse().map_err(|_| invalid())?),
        FieldType::Date => Value::Timestamp(parse_timestamp(raw).ok_or_else(invalid)?),
        FieldType::String | FieldType::Varchar => Value::String(raw.to_string()),
    })
}
