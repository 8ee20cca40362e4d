//! Input/output validation plumbing.
//!
//! Steps validate their decoded input before the handler runs and their
//! output before it is persisted. Validation is enabled by default and can
//! be disabled per step. Constraint checking itself is pluggable: a step
//! accepts custom validator functions, and types deriving
//! [`validator::Validate`] wire in with
//! [`Step::with_validated_input`](crate::Step::with_validated_input) /
//! [`Step::with_validated_output`](crate::Step::with_validated_output).

use serde::Serialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// One failed constraint on one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    /// Constraint name, e.g. `range` or `length`.
    pub constraint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// The offending value, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Input or output failed constraint checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    /// Single-violation convenience.
    pub fn single(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation {
                field: field.into(),
                constraint: constraint.into(),
                param: None,
                value: None,
            }],
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.violations.is_empty() {
            return f.write_str("validation failed");
        }
        f.write_str("validation failed:")?;
        for v in &self.violations {
            write!(f, " field '{}' failed on '{}' constraint", v.field, v.constraint)?;
            if let Some(param) = &v.param {
                write!(f, " (param: {param})")?;
            }
            if let Some(value) = &v.value {
                write!(f, ": got value '{value}'")?;
            }
            f.write_str(";")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut violations = Vec::new();
        for (field, field_errors) in errors.field_errors() {
            for err in field_errors {
                let value = err.params.get("value").cloned();
                let param = err
                    .params
                    .iter()
                    .filter(|(name, _)| name.as_ref() != "value")
                    .map(|(_, v)| v.to_string())
                    .next();
                violations.push(FieldViolation {
                    field: field.to_string(),
                    constraint: err.code.to_string(),
                    param,
                    value,
                });
            }
        }
        Self { violations }
    }
}
