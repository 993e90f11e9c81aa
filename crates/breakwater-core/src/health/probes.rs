//! Synthetic probe execution.
//!
//! One [`ProbeContext`] is built per dependency per batch: it fixes the
//! probe object's unique key and payload so the write, metadata, and
//! delete probes of a batch operate on the same object.

use crate::circuit_breaker::DependencyBreaker;
use crate::health::{classify_latency, HealthStatus, ProbeKind};
use crate::object_store::{compute_checksum, ObjectStore, ObjectStoreError, PutOptions};
use crate::Ulid;
use bytes::Bytes;
use rand::RngExt;
use std::sync::Arc;
use thiserror::Error;

/// Probe payload content type
const PROBE_CONTENT_TYPE: &str = "application/octet-stream";

/// Bound on list-probe results
const LIST_PROBE_LIMIT: usize = 10;

/// Why a probe failed
#[derive(Debug, Error)]
pub(crate) enum ProbeError {
    /// The dependency answered with an error
    #[error(transparent)]
    Store(#[from] ObjectStoreError),

    /// The dependency answered, but not with the contracted semantics
    #[error("probe contract violated: {0}")]
    Contract(String),
}

/// Per-batch probe inputs for one dependency
#[derive(Debug, Clone)]
pub(crate) struct ProbeContext {
    /// Unique key the write probe stores under
    pub probe_key: String,

    /// Key guaranteed to hold no object
    pub absent_key: String,

    /// Prefix the list probe scans
    pub prefix: String,

    /// Payload written by the write probe
    pub payload: Bytes,

    /// Checksum the metadata probe verifies
    pub expected_checksum: String,

    /// Deadline for each probe
    pub timeout_ms: u64,

    /// Latency at or above which a successful probe is degraded
    pub slow_threshold_ms: u64,
}

impl ProbeContext {
    /// Build a context with unique salted keys
    pub fn new(prefix: &str, timeout_ms: u64, slow_threshold_ms: u64) -> Self {
        let salt: u32 = rand::rng().random_range(0..u32::MAX);
        let id = Ulid::new();
        let payload = Bytes::from(format!("breakwater-probe-{id}"));
        let expected_checksum = compute_checksum(&payload);

        Self {
            probe_key: format!("{prefix}{id}-{salt:08x}"),
            absent_key: format!("{prefix}absent-{id}-{salt:08x}"),
            prefix: prefix.to_string(),
            payload,
            expected_checksum,
            timeout_ms,
            slow_threshold_ms,
        }
    }
}

/// Outcome of one probe before it is persisted
#[derive(Debug, Clone)]
pub(crate) struct ProbeOutcome {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

/// Run one probe through the dependency's breaker
///
/// The probe deadline runs inside the breaker, so an expired probe is
/// settled as a breaker failure. Breaker rejections classify as
/// unhealthy: a circuit refusing probes is a dependency that cannot be
/// shown healthy.
pub(crate) async fn run_probe(
    probe: ProbeKind,
    breaker: &DependencyBreaker,
    store: &Arc<dyn ObjectStore>,
    ctx: &ProbeContext,
) -> ProbeOutcome {
    let started = std::time::Instant::now();
    let result = match probe {
        ProbeKind::Write => {
            breaker
                .execute_with_timeout(ctx.timeout_ms, || async {
                    let meta = store
                        .put(
                            &ctx.probe_key,
                            ctx.payload.clone(),
                            PutOptions::with_content_type(PROBE_CONTENT_TYPE),
                        )
                        .await?;
                    if meta.checksum != ctx.expected_checksum {
                        return Err(ProbeError::Contract(format!(
                            "stored checksum {} does not match payload",
                            meta.checksum
                        )));
                    }
                    Ok(())
                })
                .await
        }
        ProbeKind::Read => {
            breaker
                .execute_with_timeout(ctx.timeout_ms, || async {
                    match store.get(&ctx.absent_key).await {
                        Ok(_) => Err(ProbeError::Contract(
                            "expected absent key to be missing".to_string(),
                        )),
                        Err(error) if error.is_not_found() => Ok(()),
                        Err(error) => Err(ProbeError::Store(error)),
                    }
                })
                .await
        }
        ProbeKind::Delete => {
            breaker
                .execute_with_timeout(ctx.timeout_ms, || async {
                    store.delete(&ctx.probe_key).await?;
                    Ok(())
                })
                .await
        }
        ProbeKind::List => {
            breaker
                .execute_with_timeout(ctx.timeout_ms, || async {
                    store.list(&ctx.prefix, LIST_PROBE_LIMIT).await?;
                    Ok(())
                })
                .await
        }
        ProbeKind::Metadata => {
            breaker
                .execute_with_timeout(ctx.timeout_ms, || async {
                    let meta = store.head(&ctx.probe_key).await?;
                    if meta.size_bytes != ctx.payload.len() as u64 {
                        return Err(ProbeError::Contract(format!(
                            "probe object size {} does not match payload",
                            meta.size_bytes
                        )));
                    }
                    if meta.checksum != ctx.expected_checksum {
                        return Err(ProbeError::Contract(
                            "probe object checksum does not match payload".to_string(),
                        ));
                    }
                    Ok(())
                })
                .await
        }
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(()) => ProbeOutcome {
            status: classify_latency(elapsed_ms, ctx.slow_threshold_ms),
            response_time_ms: elapsed_ms,
            error_message: None,
        },
        Err(error) => ProbeOutcome {
            status: HealthStatus::Unhealthy,
            response_time_ms: elapsed_ms,
            error_message: Some(error.to_string()),
        },
    }
}

#[cfg(test)]
#[path = "probes_tests.rs"]
mod tests;
