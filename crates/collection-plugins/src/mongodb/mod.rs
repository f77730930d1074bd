// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! MongoDB cursor operations.
//!
//! Every cursor call becomes a `mongo_cursor_operation` labelled
//! `MongoDB: DBCursor.<method>()`, carrying the collection name, the query
//! and projection documents in canonical form, and the call arguments.

mod cursor;

pub use cursor::InstrumentedCursor;

use operation_collection::operation::{Document, OperationType};
use std::fmt;

pub const TYPE_NAME: &str = "mongo_cursor_operation";
pub const LABEL_PREFIX: &str = "MongoDB";
pub const CLASS_NAME: &str = "DBCursor";

pub fn operation_type() -> OperationType {
    OperationType::value_of(TYPE_NAME)
}

/// The cursor methods that get instrumented.
pub trait DbCursor {
    type Error: fmt::Display;

    /// Full `<database>.<collection>` name.
    fn collection_name(&self) -> &str;

    fn query(&self) -> &Document;

    fn keys_wanted(&self) -> &Document;

    fn next(&mut self) -> Result<Option<Document>, Self::Error>;

    fn skip(&mut self, count: i32) -> Result<(), Self::Error>;

    fn limit(&mut self, count: i32) -> Result<(), Self::Error>;

    fn batch_size(&mut self, size: i32) -> Result<(), Self::Error>;

    fn sort(&mut self, order_by: &Document) -> Result<(), Self::Error>;

    fn to_array(&mut self) -> Result<Vec<Document>, Self::Error>;

    fn to_array_max(&mut self, max: usize) -> Result<Vec<Document>, Self::Error>;

    fn count(&mut self) -> Result<u64, Self::Error>;
}
