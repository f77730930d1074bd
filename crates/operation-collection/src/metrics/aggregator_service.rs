// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::CollectorConfig;
use crate::errors::AggregationError;
use crate::metrics::aggregator::MetricsAggregator;
use crate::metrics::bag::MetricsBag;
use crate::metrics::MetricsSink;
use crate::resource::ResourceKey;
use std::ops::ControlFlow;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Messages understood by [`MetricsAggregatorService`]. Queries carry the
/// sender their answer goes back on.
#[derive(Debug)]
pub enum AggregatorCommand {
    InsertBatch(Vec<MetricsBag>),
    Flush(oneshot::Sender<Vec<MetricsBag>>),
    GetEntry {
        resource_key: ResourceKey,
        window_start_secs: u64,
        response_tx: oneshot::Sender<Option<MetricsBag>>,
    },
    Shutdown,
}

/// Cloneable sender side of the aggregator. Inserting never blocks, so it can
/// be used from the threads completing traces.
#[derive(Clone)]
pub struct MetricsAggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorCommand>,
}

impl MetricsAggregatorHandle {
    pub fn insert_batch(&self, bags: Vec<MetricsBag>) -> Result<(), AggregationError> {
        self.send(AggregatorCommand::InsertBatch(bags))
    }

    /// Takes every aggregated bag, leaving the aggregator empty.
    pub async fn flush(&self) -> Result<Vec<MetricsBag>, AggregationError> {
        self.request(AggregatorCommand::Flush).await
    }

    pub async fn get_entry(
        &self,
        resource_key: ResourceKey,
        window_start_secs: u64,
    ) -> Result<Option<MetricsBag>, AggregationError> {
        self.request(|response_tx| AggregatorCommand::GetEntry {
            resource_key,
            window_start_secs,
            response_tx,
        })
        .await
    }

    pub fn shutdown(&self) -> Result<(), AggregationError> {
        self.send(AggregatorCommand::Shutdown)
    }

    fn send(&self, command: AggregatorCommand) -> Result<(), AggregationError> {
        self.tx
            .send(command)
            .map_err(|_| AggregationError::ServiceUnavailable("command channel closed".to_string()))
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> AggregatorCommand,
    ) -> Result<R, AggregationError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(command(response_tx))?;
        response_rx.await.map_err(|_| {
            AggregationError::ServiceUnavailable("service stopped before answering".to_string())
        })
    }
}

impl MetricsSink for MetricsAggregatorHandle {
    fn submit(&self, bags: Vec<MetricsBag>) {
        if bags.is_empty() {
            return;
        }
        let count = bags.len();
        if let Err(e) = self.insert_batch(bags) {
            error!("Dropping {} metrics bags: {}", count, e);
        }
    }
}

/// Owns the [`MetricsAggregator`] and applies commands one at a time, which
/// makes concurrent submissions for the same resource plain sequential merges.
pub struct MetricsAggregatorService {
    aggregator: MetricsAggregator,
    rx: mpsc::UnboundedReceiver<AggregatorCommand>,
}

impl MetricsAggregatorService {
    pub fn new(config: &CollectorConfig) -> (Self, MetricsAggregatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator =
            MetricsAggregator::new(config.metrics_window_secs, config.max_metric_contexts);

        (Self { aggregator, rx }, MetricsAggregatorHandle { tx })
    }

    /// Serves commands until [`AggregatorCommand::Shutdown`] arrives or every
    /// handle is dropped.
    pub async fn run(mut self) {
        debug!("Aggregating metrics bags");
        while let Some(command) = self.rx.recv().await {
            if self.apply(command).is_break() {
                break;
            }
        }
        debug!(
            "Metrics aggregation over, {} buckets unflushed",
            self.aggregator.len()
        );
    }

    fn apply(&mut self, command: AggregatorCommand) -> ControlFlow<()> {
        match command {
            AggregatorCommand::InsertBatch(bags) => {
                let rejected = bags
                    .iter()
                    .filter(|bag| self.aggregator.insert(bag).is_err())
                    .count();
                if rejected > 0 {
                    warn!(
                        "Aggregator at capacity, {} of {} bags rejected",
                        rejected,
                        bags.len()
                    );
                }
            }
            AggregatorCommand::Flush(response_tx) => {
                if response_tx.send(self.aggregator.consume_bags()).is_err() {
                    error!("Flushed bags lost, requester went away");
                }
            }
            AggregatorCommand::GetEntry {
                resource_key,
                window_start_secs,
                response_tx,
            } => {
                let entry = self
                    .aggregator
                    .get_entry(&resource_key, window_start_secs)
                    .cloned();
                if response_tx.send(entry).is_err() {
                    debug!("Entry for {:?} not delivered, requester went away", resource_key);
                }
            }
            AggregatorCommand::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }
}
