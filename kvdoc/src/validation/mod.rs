pub mod rules;

pub use rules::{RuleFn, RuleRegistry};

use crate::document::{Document, Value};
use crate::schema::{FieldDefinition, FieldType, Schema, Table};
use thiserror::Error;

/// Why a document was rejected. Always produced before any write begins.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("field '{field}' references unknown validator '{rule}'")]
    UnknownValidator { field: String, rule: String },

    #[error("validation '{rule}' failed for field '{field}' with value '{value}'")]
    ValidationFailed {
        field: String,
        rule: String,
        value: String,
    },

    #[error("field '{field}' is required")]
    RequiredFieldMissing { field: String },

    #[error("field '{field}' has length {actual}, outside bound {bound}")]
    LengthOutOfRange {
        field: String,
        bound: i64,
        actual: usize,
    },

    #[error("field '{field}' has value {actual}, outside bound {bound}")]
    RangeViolation {
        field: String,
        bound: i64,
        actual: f64,
    },
}

/// Validate a document bound for `collection` against the schema snapshot.
/// Collections without a declared table are accepted unchanged.
pub fn validate_and_prepare(
    schema: &Schema,
    collection: &str,
    data: Document,
    rules: &RuleRegistry,
) -> Result<Document, ValidationError> {
    match schema.table(collection) {
        Some(table) => validate(table, data, rules),
        None => Ok(data),
    }
}

/// Apply the table's rules field by field, in declaration order. For each
/// field: named validator, required, bounds, default, alias. Defaults are
/// therefore never bound-checked, and earlier steps always see the
/// declared field name.
pub fn validate(
    table: &Table,
    mut data: Document,
    rules: &RuleRegistry,
) -> Result<Document, ValidationError> {
    for field in &table.fields {
        check_rule(field, &data, rules)?;

        if field.required && data.is_absent(&field.name) {
            return Err(ValidationError::RequiredFieldMissing {
                field: field.name.clone(),
            });
        }

        check_bounds(field, data.get(&field.name).unwrap_or(&Value::Null))?;

        if let Some(default) = &field.default {
            if data.is_absent(&field.name) {
                data.insert(field.name.clone(), default.clone());
            }
        }

        if let Some(alias) = &field.alias {
            data.rename(&field.name, alias);
        }
    }

    Ok(data)
}

fn check_rule(
    field: &FieldDefinition,
    data: &Document,
    rules: &RuleRegistry,
) -> Result<(), ValidationError> {
    let Some(rule_name) = &field.validation else {
        return Ok(());
    };
    let rule = rules
        .get(rule_name)
        .ok_or_else(|| ValidationError::UnknownValidator {
            field: field.name.clone(),
            rule: rule_name.clone(),
        })?;

    let value = data
        .get(&field.name)
        .map(Value::to_display_string)
        .unwrap_or_default();
    if rule(&value) {
        Ok(())
    } else {
        Err(ValidationError::ValidationFailed {
            field: field.name.clone(),
            rule: rule_name.clone(),
            value,
        })
    }
}

fn check_bounds(field: &FieldDefinition, value: &Value) -> Result<(), ValidationError> {
    if field.minlen <= 0 && field.maxlen <= 0 {
        return Ok(());
    }

    if field.field_type.is_textual() {
        let actual = value.to_display_string().chars().count();
        let len = actual as i64;
        if field.minlen > 0 && len < field.minlen {
            return Err(length_error(field, field.minlen, actual));
        }
        if field.maxlen > 0 && len > field.maxlen {
            return Err(length_error(field, field.maxlen, actual));
        }
    } else if field.field_type.is_numeric() {
        let actual = match field.field_type {
            FieldType::Float | FieldType::Double => value.to_f64_lossy(),
            _ => value.to_f64_lossy().trunc(),
        };
        if field.minlen > 0 && actual < field.minlen as f64 {
            return Err(range_error(field, field.minlen, actual));
        }
        if field.maxlen > 0 && actual > field.maxlen as f64 {
            return Err(range_error(field, field.maxlen, actual));
        }
    }

    Ok(())
}

fn length_error(field: &FieldDefinition, bound: i64, actual: usize) -> ValidationError {
    ValidationError::LengthOutOfRange {
        field: field.name.clone(),
        bound,
        actual,
    }
}

fn range_error(field: &FieldDefinition, bound: i64, actual: f64) -> ValidationError {
    ValidationError::RangeViolation {
        field: field.name.clone(),
        bound,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use pretty_assertions::assert_eq;

    fn test_schema() -> Schema {
        parse_schema_str(
            r#"
schema: test
tables:
  - name: users
    fields:
      - "name,string,required,minlen=2,maxlen=10"
      - "email,string,unique,validation=isemail"
      - "age,int,minlen=18,maxlen=130"
      - "role,varchar,default=member"
      - "nick,string,alias=nickname"
  - name: people
    fields:
      - "document,string,validation=iscpf"
      - "status,string,required,default=active"
  - name: readings
    fields:
      - "ratio,float,maxlen=1"
      - "born,date,minlen=5"
  - name: broken
    fields:
      - "code,string,validation=nosuchrule"
"#,
        )
        .unwrap()
    }

    fn run(collection: &str, data: Document) -> Result<Document, ValidationError> {
        validate_and_prepare(&test_schema(), collection, data, &RuleRegistry::builtin())
    }

    fn valid_user() -> Document {
        Document::from([
            ("name", Value::from("Alice")),
            ("email", Value::from("alice@test.com")),
            ("age", Value::from(30)),
        ])
    }

    #[test]
    fn test_valid_user_gets_default() {
        let out = run("users", valid_user()).unwrap();
        assert_eq!(out.get("role"), Some(&Value::from("member")));
        assert_eq!(out.get("age"), Some(&Value::Int(30)));
    }

    #[test]
    fn test_default_does_not_overwrite() {
        let mut data = valid_user();
        data.insert("role", "admin");
        let out = run("users", data).unwrap();
        assert_eq!(out.get("role"), Some(&Value::from("admin")));
    }

    #[test]
    fn test_missing_required_field() {
        let mut data = valid_user();
        data.remove("name");
        assert_eq!(
            run("users", data).unwrap_err(),
            ValidationError::RequiredFieldMissing {
                field: "name".into()
            }
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let mut data = valid_user();
        data.insert("name", Value::Null);
        assert!(matches!(
            run("users", data),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
    }

    #[test]
    fn test_required_checked_before_default() {
        let data = Document::from([
            ("document", Value::from("237.498.170-30")),
            ("status", Value::Null),
        ]);
        assert_eq!(
            run("people", data).unwrap_err(),
            ValidationError::RequiredFieldMissing {
                field: "status".into()
            }
        );
    }

    #[test]
    fn test_int_below_minimum() {
        let mut data = valid_user();
        data.insert("age", 15);
        assert_eq!(
            run("users", data).unwrap_err(),
            ValidationError::RangeViolation {
                field: "age".into(),
                bound: 18,
                actual: 15.0,
            }
        );
    }

    #[test]
    fn test_int_above_maximum() {
        let mut data = valid_user();
        data.insert("age", "200");
        assert!(matches!(
            run("users", data),
            Err(ValidationError::RangeViolation { bound: 130, .. })
        ));
    }

    #[test]
    fn test_string_length_bounds() {
        let mut data = valid_user();
        data.insert("name", "A");
        assert_eq!(
            run("users", data).unwrap_err(),
            ValidationError::LengthOutOfRange {
                field: "name".into(),
                bound: 2,
                actual: 1,
            }
        );

        let mut data = valid_user();
        data.insert("name", "Bartholomew!");
        assert!(matches!(
            run("users", data),
            Err(ValidationError::LengthOutOfRange { bound: 10, actual: 12, .. })
        ));
    }

    #[test]
    fn test_length_counts_characters() {
        let mut data = valid_user();
        data.insert("name", "João");
        assert!(run("users", data).is_ok());
    }

    #[test]
    fn test_float_bound_not_truncated() {
        let data = Document::from([("ratio", 1.5)]);
        assert!(matches!(
            run("readings", data),
            Err(ValidationError::RangeViolation { actual, .. }) if actual == 1.5
        ));
    }

    #[test]
    fn test_date_fields_skip_bounds() {
        assert!(run("readings", Document::from([("born", "2020-01-01")])).is_ok());
    }

    #[test]
    fn test_validator_rejects_value() {
        let mut data = valid_user();
        data.insert("email", "not-an-email");
        assert_eq!(
            run("users", data).unwrap_err(),
            ValidationError::ValidationFailed {
                field: "email".into(),
                rule: "isemail".into(),
                value: "not-an-email".into(),
            }
        );
    }

    #[test]
    fn test_validator_sees_empty_string_for_absent_field() {
        let mut data = valid_user();
        data.remove("email");
        assert!(matches!(
            run("users", data),
            Err(ValidationError::ValidationFailed { value, .. }) if value.is_empty()
        ));
    }

    #[test]
    fn test_unknown_validator() {
        let data = Document::from([("code", "x")]);
        assert_eq!(
            run("broken", data).unwrap_err(),
            ValidationError::UnknownValidator {
                field: "code".into(),
                rule: "nosuchrule".into(),
            }
        );
    }

    #[test]
    fn test_caller_rule_satisfies_unknown_validator() {
        let rules = RuleRegistry::builtin().with("nosuchrule", |v| v == "x");
        let out = validate_and_prepare(
            &test_schema(),
            "broken",
            Document::from([("code", "x")]),
            &rules,
        );
        assert!(out.is_ok());
    }

    #[test]
    fn test_alias_renames_in_place() {
        let mut data = valid_user();
        data.insert("nick", "ali");
        let out = run("users", data).unwrap();
        assert!(!out.contains_key("nick"));
        assert_eq!(out.get("nickname"), Some(&Value::from("ali")));
        let keys: Vec<_> = out.keys().collect();
        assert_eq!(keys, vec!["name", "email", "age", "nickname", "role"]);
    }

    #[test]
    fn test_undeclared_collection_bypasses_validation() {
        let data = Document::from([("anything", Value::Null)]);
        assert_eq!(run("free_form", data.clone()).unwrap(), data);
    }

    #[test]
    fn test_first_failing_field_wins() {
        let data = Document::from([("age", 3)]);
        assert!(matches!(
            run("users", data),
            Err(ValidationError::RequiredFieldMissing { field }) if field == "name"
        ));
    }
}
