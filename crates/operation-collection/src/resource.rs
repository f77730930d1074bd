// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keys identifying the resources metrics are attributed to.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The entry point of a trace, e.g. a request handler or a consumer.
    EndPoint,
    /// A downstream dependency called during a trace.
    ExternalResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceKey {
    kind: ResourceKind,
    name: String,
}

impl ResourceKey {
    pub fn endpoint(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::EndPoint,
            name: name.into(),
        }
    }

    pub fn external(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::ExternalResource,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::EndPoint => write!(f, "EndPoint:{}", self.name),
            ResourceKind::ExternalResource => write!(f, "ExternalResource:{}", self.name),
        }
    }
}
