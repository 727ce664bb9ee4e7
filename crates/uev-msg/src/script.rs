//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Replay of newline-delimited JSON event scripts."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::coordinator::SyncCoordinator;
use crate::line::{LineNumber, LineState};
use crate::real::RequestReply;
use crate::{EventsError, Result};

/// One event in a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptEvent {
    /// Real trigger plus soft TTL.
    Sync {
        /// Zero-based line.
        line: LineNumber,
        /// Level.
        state: LineState,
    },
    /// Soft-only TTL.
    Ttl {
        /// Zero-based line.
        line: LineNumber,
        /// Level.
        state: LineState,
    },
    /// Soft-only text annotation.
    Text {
        /// UTF-8 payload.
        payload: String,
    },
}

/// A script line: an optional pause followed by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    /// Pause before the event.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Event to emit.
    pub event: ScriptEvent,
}

/// Outcome of a replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScriptSummary {
    /// Records executed.
    pub events: usize,
    /// ACKs drained.
    pub acks: usize,
    /// ACKs that timed out.
    pub ack_timeouts: usize,
}

/// Replay events from a newline-delimited JSON file.
///
/// Each soft frame's ACK is drained before the next record runs. ACK
/// timeouts are counted and the replay continues; any other error stops it.
/// Blank lines and lines starting with `#` are skipped.
pub fn replay_script<T, P>(
    coordinator: &mut SyncCoordinator<'_, T>,
    path: P,
    ack_timeout: Duration,
) -> Result<ScriptSummary>
where
    T: RequestReply,
    P: AsRef<Path>,
{
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut summary = ScriptSummary::default();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: ScriptRecord = serde_json::from_str(trimmed)?;
        if let Some(delay) = record.delay_ms {
            std::thread::sleep(Duration::from_millis(delay));
        }
        match &record.event {
            ScriptEvent::Sync { line, state } => {
                coordinator.emit_sync(*line, *state)?;
            }
            ScriptEvent::Ttl { line, state } => {
                coordinator.emit_extra_ttl(*line, *state)?;
            }
            ScriptEvent::Text { payload } => {
                coordinator.emit_text(payload.as_bytes())?;
            }
        }
        summary.events += 1;
        match coordinator.drain_ack(ack_timeout) {
            Ok(_) => summary.acks += 1,
            Err(EventsError::AckTimeout(_)) => {
                warn!(event = summary.events, "script event was not acknowledged");
                summary.ack_timeouts += 1;
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        events = summary.events,
        acks = summary.acks,
        ack_timeouts = summary.ack_timeouts,
        "script replay finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::SoftEventPeer;
    use crate::real::{InMemoryRequester, RealChannel};
    use crate::soft::SoftChannel;
    use std::thread;
    use uev_common::config::TextFraming;
    use uev_common::time::SessionClock;

    #[test]
    fn records_parse_from_json() {
        let record: ScriptRecord =
            serde_json::from_str(r#"{"delay_ms":5,"event":{"kind":"sync","line":3,"state":true}}"#)
                .expect("parse");
        assert_eq!(record.delay_ms, Some(5));
        assert_eq!(
            record.event,
            ScriptEvent::Sync {
                line: LineNumber::new(3),
                state: LineState::High
            }
        );
    }

    #[test]
    fn replay_streams_records() {
        let mut peer =
            SoftEventPeer::bind("127.0.0.1:0".parse().expect("addr"), TextFraming::LengthPrefixed)
                .expect("peer");
        let peer_addr = peer.local_addr().expect("peer addr");
        let server = thread::spawn(move || {
            peer.serve(3, Duration::from_secs(2), |frame| frame.timestamp())
                .expect("serve")
                .len()
        });

        let temp = tempfile::NamedTempFile::new().expect("temp file");
        std::fs::write(
            temp.path(),
            r#"# warm-up
{"event":{"kind":"sync","line":3,"state":true}}

{"delay_ms":1,"event":{"kind":"text","payload":"stimulus on"}}
{"event":{"kind":"ttl","line":0,"state":false}}
"#,
        )
        .expect("write temp file");

        let requester = InMemoryRequester::new("ok");
        let mut real = RealChannel::with_transport(requester.clone());
        let mut soft = SoftChannel::open("127.0.0.1:0".parse().expect("addr"), peer_addr)
            .expect("soft channel");
        let mut coordinator = SyncCoordinator::new(&mut real, &mut soft, SessionClock::start());

        let summary =
            replay_script(&mut coordinator, temp.path(), Duration::from_secs(2)).expect("replay");
        assert_eq!(
            summary,
            ScriptSummary {
                events: 3,
                acks: 3,
                ack_timeouts: 0
            }
        );
        assert_eq!(requester.requests(), vec!["TTL Line=4 State=1".to_owned()]);
        assert_eq!(server.join().expect("server thread"), 3);
    }

    #[test]
    fn malformed_record_is_reported() {
        let temp = tempfile::NamedTempFile::new().expect("temp file");
        std::fs::write(temp.path(), "{\"event\":{\"kind\":\"blink\"}}\n").expect("write");
        let mut real = RealChannel::with_transport(InMemoryRequester::new("ok"));
        let mut soft = SoftChannel::open(
            "127.0.0.1:0".parse().expect("addr"),
            "127.0.0.1:9".parse().expect("addr"),
        )
        .expect("soft channel");
        let mut coordinator = SyncCoordinator::new(&mut real, &mut soft, SessionClock::start());
        assert!(matches!(
            replay_script(&mut coordinator, temp.path(), Duration::from_millis(10)),
            Err(EventsError::Json(_))
        ));
    }
}
