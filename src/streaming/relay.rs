//! Stream relay.
//!
//! # Responsibilities
//! - Open the upstream stream (with a deadline) in a dedicated task
//! - Frame and decode upstream chunks into `StreamEvent`s as they arrive
//! - Guarantee exactly one terminal event per stream
//! - Stop reading upstream as soon as the downstream consumer goes away
//!
//! # Design Decisions
//! - Events are forwarded through a bounded channel, so a slow client
//!   applies backpressure to the upstream read instead of buffering
//! - Malformed frames are skipped, never fatal
//! - Breaker-relevant failures (429, timeouts) are recorded; a successful
//!   open records success

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::{StreamConfig, UpstreamConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::timeouts::with_timeout;
use crate::streaming::event::{EventStream, StreamEvent};
use crate::streaming::frame::{decode_line, LineBuffer};
use crate::upstream::client::Upstream;
use crate::upstream::types::GenerateRequest;

/// How a relay run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream closed normally; `Done` was sent.
    Completed,
    /// Upstream failed; `Error` was sent.
    Failed,
    /// Downstream went away; no terminal event could be delivered.
    Cancelled,
}

/// Relay settings.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub open_timeout: Duration,
    pub idle_timeout: Duration,
    pub channel_capacity: usize,
    pub max_frame_bytes: usize,
}

impl RelaySettings {
    pub fn from_config(upstream: &UpstreamConfig, stream: &StreamConfig) -> Self {
        Self {
            open_timeout: upstream.request_timeout(),
            idle_timeout: upstream.stream_idle_timeout(),
            channel_capacity: stream.channel_capacity.max(1),
            max_frame_bytes: stream.max_frame_bytes,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&UpstreamConfig::default(), &StreamConfig::default())
    }
}

/// Converts upstream incremental output into downstream events.
#[derive(Clone)]
pub struct StreamRelay {
    breaker: Arc<CircuitBreaker>,
    settings: RelaySettings,
}

impl StreamRelay {
    pub fn new(breaker: Arc<CircuitBreaker>, settings: RelaySettings) -> Self {
        Self { breaker, settings }
    }

    /// Start a streaming generation and return its event stream.
    ///
    /// Admission checks are the caller's job; this only opens and relays.
    pub fn spawn(&self, upstream: Arc<dyn Upstream>, request: GenerateRequest) -> EventStream {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let relay = self.clone();

        tokio::spawn(async move {
            let opened = tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!("Downstream closed before upstream stream opened");
                    return;
                }
                opened = with_timeout(relay.settings.open_timeout, upstream.generate_stream(&request)) => opened,
            };

            let outcome = match opened {
                Ok(frames) => {
                    relay.breaker.record_success();
                    relay.relay(frames, &tx).await
                }
                Err(err) => relay.fail(&tx, err).await,
            };
            tracing::debug!(outcome = ?outcome, "Stream relay finished");
        });

        ReceiverStream::new(rx).boxed()
    }

    /// Relay already-open upstream frames into `tx` until a terminal event.
    pub async fn relay<S>(&self, mut frames: S, tx: &mpsc::Sender<StreamEvent>) -> RelayOutcome
    where
        S: Stream<Item = GatewayResult<Bytes>> + Unpin,
    {
        let mut lines = LineBuffer::new(self.settings.max_frame_bytes);

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    tracing::info!("Downstream disconnected, releasing upstream stream");
                    return RelayOutcome::Cancelled;
                }
                next = tokio::time::timeout(self.settings.idle_timeout, frames.next()) => next,
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(err))) => return self.fail(tx, err).await,
                Ok(None) => break,
                Err(_) => {
                    return self
                        .fail(tx, GatewayError::Timeout(self.settings.idle_timeout))
                        .await
                }
            };

            for line in lines.push(&chunk) {
                if !forward_line(&line, tx).await {
                    return RelayOutcome::Cancelled;
                }
            }
        }

        if let Some(rest) = lines.finish() {
            if !forward_line(&rest, tx).await {
                return RelayOutcome::Cancelled;
            }
        }

        if send(tx, StreamEvent::Done).await {
            RelayOutcome::Completed
        } else {
            RelayOutcome::Cancelled
        }
    }

    async fn fail(&self, tx: &mpsc::Sender<StreamEvent>, err: GatewayError) -> RelayOutcome {
        if err.is_breaker_relevant() {
            self.breaker.record_failure();
        }
        tracing::error!(error = %err, "Upstream stream failed");

        if send(tx, StreamEvent::Error(err.to_string())).await {
            RelayOutcome::Failed
        } else {
            RelayOutcome::Cancelled
        }
    }
}

/// Decode one line and forward its events. False once downstream is gone.
async fn forward_line(line: &[u8], tx: &mpsc::Sender<StreamEvent>) -> bool {
    match decode_line(line) {
        Ok(events) => {
            for event in events {
                if !send(tx, event).await {
                    return false;
                }
            }
            true
        }
        Err(err) => {
            tracing::debug!(error = %err, "Skipping upstream frame");
            true
        }
    }
}

async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    metrics::record_stream_event(event.kind());
    tx.send(event).await.is_ok()
}
