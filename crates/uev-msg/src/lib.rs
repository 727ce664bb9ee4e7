//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Soft-event wire protocol and synchronisation channels."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
//! Client side of the soft/real event protocol.
//!
//! A recorder receives "real" trigger events over a synchronous request/reply
//! channel and timestamped "soft" events over UDP. One real trigger paired
//! with a soft TTL frame on the same line and state lets the recorder map the
//! client clock onto its sample clock; later soft frames are placed using
//! that mapping.
//!
//! - [`frame`]: binary layouts for TTL/Text frames and the ACK reply
//! - [`soft`]: datagram channel with one-send-one-ACK draining
//! - [`real`]: request/reply trigger channel
//! - [`coordinator`]: sync pairs and unpaired soft events
//! - [`peer`]: minimal recorder-side responder for bring-up and tests
//! - [`script`]: replay of newline-delimited JSON event scripts
#![warn(missing_docs)]

use std::net::SocketAddr;
use std::time::Duration;

pub mod coordinator;
pub mod frame;
pub mod line;
pub mod logging;
pub mod peer;
pub mod real;
pub mod script;
pub mod soft;

/// Shared result type for channel and codec operations.
pub type Result<T> = std::result::Result<T, EventsError>;

/// Errors raised by the codec and the channels.
#[derive(Debug, thiserror::Error)]
pub enum EventsError {
    /// The local datagram endpoint could not be bound.
    #[error("unable to bind soft channel to {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// The request/reply connection could not be established.
    #[error("unable to connect real channel to {endpoint}: {reason}")]
    Connect {
        /// Endpoint that was requested.
        endpoint: String,
        /// Transport-specific failure description.
        reason: String,
    },
    /// A text payload or frame does not fit the wire format.
    #[error("payload of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge {
        /// Offending size.
        len: usize,
        /// Largest accepted size.
        max: usize,
    },
    /// No ACK arrived within the timeout.
    #[error("no acknowledgement received within {0:?}")]
    AckTimeout(Duration),
    /// An ACK datagram was not exactly eight bytes; oversize replies report
    /// the truncated receive length.
    #[error("malformed acknowledgement: expected 8 bytes, got {len}")]
    MalformedAck {
        /// Bytes received.
        len: usize,
    },
    /// A frame was truncated or internally inconsistent.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// Byte 0 of a frame named no known frame kind.
    #[error("unknown frame kind tag {0}")]
    UnknownFrameKind(u8),
    /// The real channel produced no usable reply.
    #[error("real channel protocol error: {0}")]
    Protocol(String),
    /// Wrapper for IO errors encountered on the soft channel.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for event script parse problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EventsError {
    /// Whether the error invalidates the session rather than a single event.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EventsError::Bind { .. }
                | EventsError::Connect { .. }
                | EventsError::Protocol(_)
                | EventsError::Io(_)
        )
    }
}

pub use coordinator::{SyncCoordinator, SyncCounters, SyncPair};
pub use frame::{
    decode_ack, decode_ttl, encode_ack, encode_text, encode_ttl, FrameKind, SoftFrame, TextEvent,
    TtlEvent,
};
pub use line::{LineNumber, LineState};
pub use logging::{log_frame, log_trigger, FrameDirection, SoftEventMetrics};
pub use peer::SoftEventPeer;
pub use real::{InMemoryRequester, RealChannel, RequestReply, ZmqRequester};
pub use script::{replay_script, ScriptEvent, ScriptRecord, ScriptSummary};
pub use soft::{Ack, SoftChannel};
pub use uev_common::config::TextFraming;
pub use uev_common::time::SessionClock;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_follows_session_rules() {
        assert!(EventsError::Protocol("no reply".into()).is_fatal());
        assert!(EventsError::Connect {
            endpoint: "tcp://x".into(),
            reason: "bad".into()
        }
        .is_fatal());
        assert!(!EventsError::AckTimeout(Duration::from_millis(5)).is_fatal());
        assert!(!EventsError::PayloadTooLarge { len: 70_000, max: 65_535 }.is_fatal());
        assert!(!EventsError::UnknownFrameKind(9).is_fatal());
    }
}
