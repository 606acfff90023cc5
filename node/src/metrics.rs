//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the metrics
//! port. All metrics live in a dedicated [`prometheus::Registry`] with the
//! `tessera` prefix.
//!
//! Gateway latency is measured by wrapping the object store and minter in
//! [`InstrumentedStorage`] and [`InstrumentedMinter`] before they are handed
//! to the bundle aggregator. A call cut off by the aggregator's timeout is
//! dropped mid-flight and never observed.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

use tessera_protocol::crypto::AccountAddress;
use tessera_protocol::gateway::{GatewayError, MintReceipt, MintingService, ObjectStorage};

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub challenges_issued_total: IntCounter,
    pub sessions_issued_total: IntCounter,
    pub verification_failures_total: IntCounter,
    pub records_stored_total: IntCounter,
    pub policy_rejections_total: IntCounter,
    /// Bundle transitions by target status (`created`, `published`, `tokenized`).
    pub bundle_transitions_total: IntCounterVec,
    /// Gateway call latency by operation and outcome.
    pub gateway_latency_seconds: HistogramVec,
}

fn register<M: prometheus::core::Collector + Clone + 'static>(
    registry: &Registry,
    metric: M,
) -> Result<M, prometheus::Error> {
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tessera".into()), None)?;

        let challenges_issued_total = register(
            &registry,
            IntCounter::new("challenges_issued_total", "Authentication challenges issued")?,
        )?;
        let sessions_issued_total = register(
            &registry,
            IntCounter::new("sessions_issued_total", "Session tokens issued after verification")?,
        )?;
        let verification_failures_total = register(
            &registry,
            IntCounter::new(
                "verification_failures_total",
                "Challenge verifications that did not produce a session",
            )?,
        )?;
        let records_stored_total = register(
            &registry,
            IntCounter::new("records_stored_total", "Encrypted records written to the vault")?,
        )?;
        let policy_rejections_total = register(
            &registry,
            IntCounter::new(
                "policy_rejections_total",
                "Submissions rejected by the location precision policy",
            )?,
        )?;
        let bundle_transitions_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("bundle_transitions_total", "Bundle lifecycle transitions"),
                &["status"],
            )?,
        )?;
        let gateway_latency_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "gateway_latency_seconds",
                    "Latency of publication and minting calls in seconds",
                )
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
                &["operation", "outcome"],
            )?,
        )?;

        Ok(Self {
            registry,
            challenges_issued_total,
            sessions_issued_total,
            verification_failures_total,
            records_stored_total,
            policy_rejections_total,
            bundle_transitions_total,
            gateway_latency_seconds,
        })
    }

    fn observe_gateway<T>(&self, operation: &str, started: Instant, result: &Result<T, GatewayError>) {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.gateway_latency_seconds
            .with_label_values(&[operation, outcome])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway Instrumentation
// ---------------------------------------------------------------------------

pub struct InstrumentedStorage {
    inner: Arc<dyn ObjectStorage>,
    metrics: SharedMetrics,
}

impl InstrumentedStorage {
    pub fn new(inner: Arc<dyn ObjectStorage>, metrics: SharedMetrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl ObjectStorage for InstrumentedStorage {
    async fn put(&self, bytes: Vec<u8>, name: &str) -> Result<String, GatewayError> {
        let started = Instant::now();
        let result = self.inner.put(bytes, name).await;
        self.metrics.observe_gateway("publish", started, &result);
        result
    }
}

pub struct InstrumentedMinter {
    inner: Arc<dyn MintingService>,
    metrics: SharedMetrics,
}

impl InstrumentedMinter {
    pub fn new(inner: Arc<dyn MintingService>, metrics: SharedMetrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl MintingService for InstrumentedMinter {
    fn contract(&self) -> String {
        self.inner.contract()
    }

    async fn mint(
        &self,
        beneficiary: &AccountAddress,
        metadata_uri: &str,
    ) -> Result<MintReceipt, GatewayError> {
        let started = Instant::now();
        let result = self.inner.mint(beneficiary, metadata_uri).await;
        self.metrics.observe_gateway("mint", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_protocol::gateway::{MemoryMinter, MemoryObjectStore};

    #[test]
    fn encodes_registered_metrics() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.records_stored_total.inc();
        metrics.bundle_transitions_total.with_label_values(&["published"]).inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("tessera_records_stored_total 1"));
        assert!(text.contains("tessera_bundle_transitions_total{status=\"published\"} 1"));
    }

    #[tokio::test]
    async fn instrumented_gateways_observe_latency() {
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let store = Arc::new(MemoryObjectStore::new());
        let storage = InstrumentedStorage::new(store.clone(), metrics.clone());
        let minter = InstrumentedMinter::new(Arc::new(MemoryMinter::new()), metrics.clone());

        storage.put(b"payload".to_vec(), "bundle-x.json").await.unwrap();
        store.set_rejecting(true);
        assert!(storage.put(b"other".to_vec(), "bundle-y.json").await.is_err());
        minter
            .mint(&AccountAddress::from_bytes([7; 20]), "ipfs://zmeta")
            .await
            .unwrap();

        let count = |op: &str, outcome: &str| {
            metrics
                .gateway_latency_seconds
                .with_label_values(&[op, outcome])
                .get_sample_count()
        };
        assert_eq!(count("publish", "ok"), 1);
        assert_eq!(count("publish", "error"), 1);
        assert_eq!(count("mint", "ok"), 1);
    }
}
