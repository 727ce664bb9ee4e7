//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Structured logging and metrics for channel activity."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::frame::SoftFrame;
use crate::line::{LineNumber, LineState};

/// Direction of the frame movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Frame sent out on the soft channel.
    Outbound,
    /// Frame received by a recorder-side peer.
    Inbound,
}

/// Emit a structured log entry for soft-channel activity.
pub fn log_frame(direction: FrameDirection, frame: &SoftFrame, bytes: usize) {
    match frame {
        SoftFrame::Ttl(event) => debug!(
            kind = "ttl",
            timestamp = event.timestamp,
            line = event.line.value(),
            state = event.state.wire(),
            bytes,
            direction = ?direction,
            "soft frame"
        ),
        SoftFrame::Text(event) => debug!(
            kind = "text",
            timestamp = event.timestamp,
            payload_len = event.payload.len(),
            bytes,
            direction = ?direction,
            "soft frame"
        ),
    }
}

/// Emit a structured log entry for a completed real-channel exchange.
pub fn log_trigger(endpoint: &str, line: LineNumber, state: LineState, reply: &str) {
    debug!(
        endpoint,
        line = line.value(),
        wire_line = line.real_wire(),
        state = state.wire(),
        reply,
        "real trigger acknowledged"
    );
}

/// Prometheus metric handles for soft and real channel activity.
pub struct SoftEventMetrics {
    frames_sent: IntCounterVec,
    acks_received: IntCounter,
    ack_timeouts: IntCounter,
    triggers_sent: IntCounter,
    ack_latency: Histogram,
}

impl SoftEventMetrics {
    /// Register channel metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let frames_sent = IntCounterVec::new(
            Opts::new("soft_frames_sent_total", "Soft frames transmitted"),
            &["kind"],
        )?;
        let acks_received = IntCounter::with_opts(Opts::new(
            "soft_acks_received_total",
            "Soft frame acknowledgements drained",
        ))?;
        let ack_timeouts = IntCounter::with_opts(Opts::new(
            "soft_ack_timeouts_total",
            "Acknowledgements that did not arrive in time",
        ))?;
        let triggers_sent = IntCounter::with_opts(Opts::new(
            "real_triggers_sent_total",
            "Real trigger requests that received a reply",
        ))?;
        let ack_latency = Histogram::with_opts(
            HistogramOpts::new(
                "soft_ack_latency_seconds",
                "Time between sending a soft frame and draining its acknowledgement",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0]),
        )?;

        registry.register(Box::new(frames_sent.clone()))?;
        registry.register(Box::new(acks_received.clone()))?;
        registry.register(Box::new(ack_timeouts.clone()))?;
        registry.register(Box::new(triggers_sent.clone()))?;
        registry.register(Box::new(ack_latency.clone()))?;

        Ok(Self {
            frames_sent,
            acks_received,
            ack_timeouts,
            triggers_sent,
            ack_latency,
        })
    }

    /// Record a transmitted frame.
    pub fn observe_sent(&self, frame: &SoftFrame) {
        self.frames_sent
            .with_label_values(&[frame.kind().as_str()])
            .inc();
    }

    /// Record a drained acknowledgement and its latency.
    pub fn observe_ack(&self, latency: Option<Duration>) {
        self.acks_received.inc();
        if let Some(latency) = latency {
            self.ack_latency.observe(latency.as_secs_f64());
        }
    }

    /// Record an acknowledgement timeout.
    pub fn observe_timeout(&self) {
        self.ack_timeouts.inc();
    }

    /// Record a completed real trigger.
    pub fn observe_trigger(&self) {
        self.triggers_sent.inc();
    }
}
