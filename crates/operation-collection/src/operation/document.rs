// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonical text form of structured documents (query objects, sort orders,
//! projections) stored in operation fields.
//!
//! Downstream consumers parse this rendering, so the layout is fixed:
//!
//! ```text
//! { "key" : "value"}
//! { "a" : 1 , "b" : [ 1 , 2] , "c" : { "d" : true}}
//! { }
//! ```

use serde_json::{Map, Value as JsonValue};
use std::fmt::Write;

/// An ordered structured document.
pub type Document = Map<String, JsonValue>;

pub fn render_document(document: &Document) -> String {
    let mut out = String::with_capacity(16 * (document.len() + 1));
    write_document(&mut out, document);
    out
}

pub fn render_value(value: &JsonValue) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_document(out: &mut String, document: &Document) {
    out.push_str("{ ");
    for (i, (key, value)) in document.iter().enumerate() {
        if i > 0 {
            out.push_str(" , ");
        }
        write_string(out, key);
        out.push_str(" : ");
        write_value(out, value);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &JsonValue) {
    match value {
        JsonValue::Null => out.push_str("null"),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Number(n) => {
            let _ = write!(out, "{n}");
        }
        JsonValue::String(s) => write_string(out, s),
        JsonValue::Array(items) => {
            out.push_str("[ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(" , ");
                }
                write_value(out, item);
            }
            out.push(']');
        }
        JsonValue::Object(document) => write_document(out, document),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
