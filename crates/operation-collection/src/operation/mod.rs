// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The operation record captured for every intercepted call.

mod document;
mod value;

pub use document::{render_document, render_value, Document};
pub use value::{FromValue, OperationList, OperationMap, Value, ValueKind};

use crate::errors::OperationError;
use serde::{Serialize, Serializer};
use std::fmt;
use ustr::Ustr;

/// Interned operation type identifier, e.g. `rabbitmq-client-consumer`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationType(Ustr);

impl OperationType {
    pub fn value_of(name: &str) -> Self {
        Self(Ustr::from(name))
    }

    pub fn name(&self) -> &'static str {
        self.0.as_str()
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationType({})", self.name())
    }
}

impl Serialize for OperationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Formats the `"<prefix>: <Class>.<method>()"` label used by method adapters.
pub fn method_label(prefix: &str, class_name: &str, method_name: &str) -> String {
    format!("{prefix}: {class_name}.{method_name}()")
}

/// A captured call: type, label and named fields.
///
/// Fields are writable until [`Operation::finalize_construction`]; from then
/// on every mutator fails with [`OperationError::ImmutableState`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    #[serde(rename = "type")]
    op_type: OperationType,
    label: String,
    fields: OperationMap,
    #[serde(skip)]
    finalized: bool,
}

impl Operation {
    pub fn new(op_type: OperationType, label: impl Into<String>) -> Self {
        Self {
            op_type,
            label: label.into(),
            fields: OperationMap::new(),
            finalized: false,
        }
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) -> Result<&mut Self, OperationError> {
        self.check_mutable()?;
        self.label = label.into();
        Ok(self)
    }

    pub fn put(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, OperationError> {
        self.check_mutable()?;
        self.fields.put(name, value);
        Ok(self)
    }

    /// Adds the field only when a value is present.
    pub fn put_any_non_empty<V: Into<Value>>(
        &mut self,
        name: impl Into<String>,
        value: Option<V>,
    ) -> Result<&mut Self, OperationError> {
        self.check_mutable()?;
        if let Some(value) = value {
            self.fields.put(name, value);
        }
        Ok(self)
    }

    pub fn create_map(&mut self, name: impl Into<String>) -> Result<&mut OperationMap, OperationError> {
        self.check_mutable()?;
        self.fields.create_map(name)
    }

    pub fn create_list(
        &mut self,
        name: impl Into<String>,
    ) -> Result<&mut OperationList, OperationError> {
        self.check_mutable()?;
        self.fields.create_list(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_as<'a, T: FromValue<'a>>(&'a self, name: &str) -> Result<Option<T>, OperationError> {
        self.fields.get_as(name)
    }

    pub fn fields(&self) -> &OperationMap {
        &self.fields
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Freezes the field mapping. Calling it again has no effect.
    pub fn finalize_construction(&mut self) {
        self.finalized = true;
    }

    fn check_mutable(&self) -> Result<(), OperationError> {
        if self.finalized {
            return Err(OperationError::ImmutableState {
                label: self.label.clone(),
            });
        }
        Ok(())
    }
}
