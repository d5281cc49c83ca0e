//! Validation collaborator.
//!
//! Domain rules live outside the engine. A [`Validator`] registered with the
//! transaction manager is asked about every added or modified entity before
//! a root commit reaches the unit of work.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::model::Element;

/// Validation failures keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
pub struct ValidationError {
    errors: BTreeMap<String, Vec<String>>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (i, (field, messages)) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, field, messages.join(", "))?;
        }
        Ok(())
    }
}

impl ValidationError {
    /// Create an empty error set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an error with one message.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new().with(field, message)
    }

    /// Add a message for a field.
    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(field, message);
        self
    }

    /// Add a message for a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Merge another error set into this one.
    pub fn merge(&mut self, other: ValidationError) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    /// Messages per field.
    pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    /// Messages for one field.
    pub fn messages(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check if no messages were recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks entities before they are committed.
pub trait Validator: Send + Sync {
    /// Validate one entity.
    fn validate(&self, element: &Element) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&Element) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, element: &Element) -> Result<(), ValidationError> {
        self(element)
    }
}
