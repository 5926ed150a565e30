//! JSON-lines measurement ingestion.
//!
//! Each input line is one [`Measurement`]. Lines that do not parse are
//! logged and skipped; evaluations that fail on storage are retried with
//! exponential backoff, relying on the engine to deduplicate alerts a
//! failed attempt already persisted.
//!
//! [`ingest_and_forward`] runs the same loop while copying the engine's
//! live alert feed to a writer, and fails if that feed is cut off.

use std::sync::Arc;
use std::time::Duration;

use climate_alerts::{
    Alert, AlertEngine, AlertError, AlertSubscription, EvaluationResult, Measurement,
};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

/// How failed evaluations are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub const fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    /// Delay before retry number `attempt` (starting at 1).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Non-empty lines read.
    pub lines: usize,
    /// Lines that parsed as measurements.
    pub measurements: usize,
    /// Lines that did not parse.
    pub invalid: usize,
    /// Alerts fired.
    pub fired: usize,
    /// Violations absorbed by an open alert.
    pub suppressed: usize,
    /// Measurements given up on after exhausting retries.
    pub failed: usize,
}

impl IngestStats {
    fn record(&mut self, result: &EvaluationResult) {
        self.fired += result.fired.len();
        self.suppressed += result.suppressed;
    }
}

/// Reads measurements line by line until EOF and evaluates each one.
///
/// # Errors
///
/// Returns an error only if reading from `reader` fails. Bad lines and
/// failed evaluations are counted in the returned stats.
pub async fn ingest<R>(
    engine: Arc<AlertEngine>,
    reader: R,
    policy: RetryPolicy,
) -> anyhow::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        let measurement: Measurement = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                warn!(line = stats.lines, error = %e, "skipping malformed measurement");
                stats.invalid += 1;
                continue;
            }
        };
        stats.measurements += 1;

        match evaluate_with_retry(&engine, measurement, policy).await {
            Ok(result) => stats.record(&result),
            Err(e) => {
                error!(line = stats.lines, error = %e, "failed to evaluate measurement");
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

/// Ingests like [`ingest`] while writing each alert from `feed` to `out` as
/// one JSON line.
///
/// Alerts still buffered when the input ends are flushed before returning.
///
/// # Errors
///
/// Returns an error if reading or writing fails, or if the bus disconnects
/// `feed` before ingestion finishes. Alerts fired after that point were
/// persisted but never written to `out`.
pub async fn ingest_and_forward<R, W>(
    engine: &Arc<AlertEngine>,
    mut feed: AlertSubscription,
    reader: R,
    policy: RetryPolicy,
    mut out: W,
) -> anyhow::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ingestion = ingest(Arc::clone(engine), reader, policy);
    tokio::pin!(ingestion);

    loop {
        tokio::select! {
            stats = &mut ingestion => {
                let stats = stats?;
                while let Some(alert) = feed.try_recv() {
                    write_alert(&mut out, &alert).await?;
                }
                if feed.is_closed() {
                    return Err(feed_lost(engine));
                }
                return Ok(stats);
            }
            alert = feed.recv() => match alert {
                Some(alert) => write_alert(&mut out, &alert).await?,
                None => return Err(feed_lost(engine)),
            },
        }
    }
}

async fn write_alert<W>(out: &mut W, alert: &Alert) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(alert)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

fn feed_lost(engine: &AlertEngine) -> anyhow::Error {
    let disconnected = engine.bus().disconnected_count();
    error!(
        disconnected,
        "alert feed fell behind and was disconnected; raise engine.subscriber_buffer"
    );
    anyhow::anyhow!("alert feed disconnected before ingestion finished")
}

async fn evaluate_with_retry(
    engine: &Arc<AlertEngine>,
    measurement: Measurement,
    policy: RetryPolicy,
) -> Result<EvaluationResult, AlertError> {
    let measurement = Arc::new(measurement);
    let mut attempt = 0;
    loop {
        let result = {
            let engine = Arc::clone(engine);
            let measurement = Arc::clone(&measurement);
            tokio::task::spawn_blocking(move || engine.evaluate_measurement(&measurement))
                .await
                .map_err(|e| AlertError::TransientStorage {
                    reason: format!("evaluation task failed: {e}"),
                })?
        };

        match result {
            Err(e) if e.is_retryable() && attempt < policy.retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                debug!(
                    sensor_id = %measurement.sensor_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "retrying evaluation"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
