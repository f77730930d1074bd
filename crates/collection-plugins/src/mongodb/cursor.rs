// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::mongodb::{operation_type, DbCursor, CLASS_NAME, LABEL_PREFIX};
use operation_collection::collector::OperationCollector;
use operation_collection::errors::InstrumentationError;
use operation_collection::intercept::{intercept, CollectionAdvice};
use operation_collection::operation::{
    method_label, render_document, Document, Operation, OperationType,
};
use std::sync::Arc;

/// Snapshot of a cursor call, taken before the cursor is touched.
struct CursorCall {
    method: &'static str,
    collection: String,
    query: String,
    keys_wanted: String,
    args: Vec<String>,
}

impl CursorCall {
    fn capture<C: DbCursor>(cursor: &C, method: &'static str, args: Vec<String>) -> Self {
        Self {
            method,
            collection: cursor.collection_name().to_string(),
            query: render_document(cursor.query()),
            keys_wanted: render_document(cursor.keys_wanted()),
            args,
        }
    }
}

struct CursorAdvice;

impl<T> CollectionAdvice<CursorCall, T> for CursorAdvice {
    fn operation_type(&self) -> OperationType {
        operation_type()
    }

    fn label(&self, call: &CursorCall) -> String {
        method_label(LABEL_PREFIX, CLASS_NAME, call.method)
    }

    fn fill(&self, call: &CursorCall, operation: &mut Operation) -> Result<(), InstrumentationError> {
        operation
            .put("collection", call.collection.as_str())?
            .put("query", call.query.as_str())?
            .put("keysWanted", call.keys_wanted.as_str())?;
        let args = operation.create_list("args")?;
        for arg in &call.args {
            args.add(arg.as_str());
        }
        Ok(())
    }
}

/// A [`DbCursor`] recording every call as a cursor operation.
pub struct InstrumentedCursor<C> {
    inner: C,
    collector: Arc<OperationCollector>,
}

impl<C: DbCursor> InstrumentedCursor<C> {
    pub fn new(inner: C, collector: Arc<OperationCollector>) -> Self {
        Self { inner, collector }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Runs `proceed` on the wrapped cursor as a `method` call. Nothing is
    /// rendered while collection is disabled.
    fn record<T>(
        &mut self,
        method: &'static str,
        args: impl FnOnce() -> Vec<String>,
        proceed: impl FnOnce(&mut C) -> Result<T, C::Error>,
    ) -> Result<T, C::Error> {
        if !self.collector.is_enabled() {
            return proceed(&mut self.inner);
        }
        let call = CursorCall::capture(&self.inner, method, args());
        intercept(&self.collector, &CursorAdvice, &call, || {
            proceed(&mut self.inner)
        })
    }
}

impl<C: DbCursor> DbCursor for InstrumentedCursor<C> {
    type Error = C::Error;

    fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    fn query(&self) -> &Document {
        self.inner.query()
    }

    fn keys_wanted(&self) -> &Document {
        self.inner.keys_wanted()
    }

    fn next(&mut self) -> Result<Option<Document>, Self::Error> {
        self.record("next", Vec::new, |cursor| cursor.next())
    }

    fn skip(&mut self, count: i32) -> Result<(), Self::Error> {
        self.record("skip", || vec![count.to_string()], |cursor| cursor.skip(count))
    }

    fn limit(&mut self, count: i32) -> Result<(), Self::Error> {
        self.record("limit", || vec![count.to_string()], |cursor| cursor.limit(count))
    }

    fn batch_size(&mut self, size: i32) -> Result<(), Self::Error> {
        self.record("batchSize", || vec![size.to_string()], |cursor| {
            cursor.batch_size(size)
        })
    }

    fn sort(&mut self, order_by: &Document) -> Result<(), Self::Error> {
        self.record("sort", || vec![render_document(order_by)], |cursor| {
            cursor.sort(order_by)
        })
    }

    fn to_array(&mut self) -> Result<Vec<Document>, Self::Error> {
        self.record("toArray", Vec::new, |cursor| cursor.to_array())
    }

    fn to_array_max(&mut self, max: usize) -> Result<Vec<Document>, Self::Error> {
        self.record("toArray", || vec![max.to_string()], |cursor| {
            cursor.to_array_max(max)
        })
    }

    fn count(&mut self) -> Result<u64, Self::Error> {
        self.record("count", Vec::new, |cursor| cursor.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operation_collection::collector::TraceRecorder;
    use operation_collection::config::CollectorConfig;
    use operation_collection::operation::OperationList;
    use serde_json::json;

    struct DummyCursor {
        collection: String,
        query: Document,
        keys: Document,
        fail: bool,
    }

    impl DummyCursor {
        fn new() -> Self {
            Self {
                collection: "test".to_string(),
                query: doc(json!({ "query": "value" })),
                keys: doc(json!({ "key": "value" })),
                fail: false,
            }
        }

        fn result<T>(&self, value: T) -> Result<T, String> {
            if self.fail {
                Err("cursor not found".to_string())
            } else {
                Ok(value)
            }
        }
    }

    impl DbCursor for DummyCursor {
        type Error = String;

        fn collection_name(&self) -> &str {
            &self.collection
        }

        fn query(&self) -> &Document {
            &self.query
        }

        fn keys_wanted(&self) -> &Document {
            &self.keys
        }

        fn next(&mut self) -> Result<Option<Document>, String> {
            self.result(None)
        }

        fn skip(&mut self, _count: i32) -> Result<(), String> {
            self.result(())
        }

        fn limit(&mut self, _count: i32) -> Result<(), String> {
            self.result(())
        }

        fn batch_size(&mut self, _size: i32) -> Result<(), String> {
            self.result(())
        }

        fn sort(&mut self, _order_by: &Document) -> Result<(), String> {
            self.result(())
        }

        fn to_array(&mut self) -> Result<Vec<Document>, String> {
            self.result(Vec::new())
        }

        fn to_array_max(&mut self, _max: usize) -> Result<Vec<Document>, String> {
            self.result(Vec::new())
        }

        fn count(&mut self) -> Result<u64, String> {
            self.result(0)
        }
    }

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not a document"),
        }
    }

    fn test_cursor() -> (InstrumentedCursor<DummyCursor>, Arc<TraceRecorder>) {
        let recorder = Arc::new(TraceRecorder::new());
        let collector = Arc::new(
            OperationCollector::new(CollectorConfig::default()).with_listener(recorder.clone()),
        );
        (InstrumentedCursor::new(DummyCursor::new(), collector), recorder)
    }

    fn last_entered(recorder: &TraceRecorder) -> Operation {
        recorder.last().unwrap().root().operation().clone()
    }

    fn standard_asserts(op: &Operation) {
        assert_eq!(op.op_type(), operation_type());
        assert_eq!(op.get_as::<&str>("keysWanted"), Ok(Some("{ \"key\" : \"value\"}")));
        assert_eq!(op.get_as::<&str>("query"), Ok(Some("{ \"query\" : \"value\"}")));
        assert_eq!(op.get_as::<&str>("collection"), Ok(Some("test")));
    }

    fn first_arg(op: &Operation) -> String {
        let args = op.get_as::<&OperationList>("args").unwrap().unwrap();
        args.get_as::<&str>(0).unwrap().unwrap().to_string()
    }

    #[test]
    fn test_next() {
        let (mut cursor, recorder) = test_cursor();
        cursor.next().unwrap();
        let op = last_entered(&recorder);
        assert_eq!(op.label(), "MongoDB: DBCursor.next()");
        standard_asserts(&op);
        assert!(op.get_as::<&OperationList>("args").unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_skip() {
        let (mut cursor, recorder) = test_cursor();
        cursor.skip(34).unwrap();
        let op = last_entered(&recorder);
        assert_eq!(op.label(), "MongoDB: DBCursor.skip()");
        assert_eq!(first_arg(&op), "34");
        standard_asserts(&op);
    }

    #[test]
    fn test_limit() {
        let (mut cursor, recorder) = test_cursor();
        cursor.limit(35).unwrap();
        let op = last_entered(&recorder);
        assert_eq!(op.label(), "MongoDB: DBCursor.limit()");
        assert_eq!(first_arg(&op), "35");
        standard_asserts(&op);
    }

    #[test]
    fn test_to_array() {
        let (mut cursor, recorder) = test_cursor();
        cursor.to_array().unwrap();
        let op = last_entered(&recorder);
        assert_eq!(op.label(), "MongoDB: DBCursor.toArray()");
        standard_asserts(&op);

        cursor.to_array_max(43).unwrap();
        let op = last_entered(&recorder);
        assert_eq!(op.label(), "MongoDB: DBCursor.toArray()");
        assert_eq!(first_arg(&op), "43");
        standard_asserts(&op);
    }

    #[test]
    fn test_sort() {
        let (mut cursor, recorder) = test_cursor();
        cursor.sort(&doc(json!({ "sort": "this" }))).unwrap();
        let op = last_entered(&recorder);
        assert_eq!(op.label(), "MongoDB: DBCursor.sort()");
        assert_eq!(first_arg(&op), "{ \"sort\" : \"this\"}");
        standard_asserts(&op);
    }

    #[test]
    fn test_batch_size() {
        let (mut cursor, recorder) = test_cursor();
        cursor.batch_size(14).unwrap();
        let op = last_entered(&recorder);
        assert_eq!(op.label(), "MongoDB: DBCursor.batchSize()");
        assert_eq!(first_arg(&op), "14");
        standard_asserts(&op);
    }

    #[test]
    fn test_failure_passes_through() {
        let (mut cursor, recorder) = test_cursor();
        cursor.inner.fail = true;
        assert_eq!(cursor.count(), Err("cursor not found".to_string()));

        let trace = recorder.last().unwrap();
        assert_eq!(trace.root().operation().label(), "MongoDB: DBCursor.count()");
        assert_eq!(trace.root().error(), Some("cursor not found"));
    }

    #[test]
    fn test_nested_under_request() {
        let (mut cursor, recorder) = test_cursor();
        let collector = Arc::clone(&cursor.collector);
        collector.enter(Operation::new(OperationType::value_of("http"), "GET /users"));
        cursor.skip(1).unwrap();
        cursor.limit(2).unwrap();
        collector.exit_normal().unwrap();

        assert_eq!(recorder.len(), 1);
        let trace = recorder.last().unwrap();
        assert_eq!(trace.frames_of_type(operation_type()).len(), 2);
        assert_eq!(trace.last_frames_of_type(operation_type()).len(), 2);
    }

    #[test]
    fn test_disabled_collector_passes_through() {
        let recorder = Arc::new(TraceRecorder::new());
        let config = CollectorConfig {
            enabled: false,
            ..Default::default()
        };
        let collector = Arc::new(OperationCollector::new(config).with_listener(recorder.clone()));
        let mut cursor = InstrumentedCursor::new(DummyCursor::new(), collector);

        assert_eq!(cursor.count(), Ok(0));
        cursor.sort(&doc(json!({ "sort": "this" }))).unwrap();
        cursor.inner.fail = true;
        assert_eq!(cursor.next(), Err("cursor not found".to_string()));
        assert!(recorder.is_empty());
    }
}
