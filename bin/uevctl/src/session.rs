//! ---
//! uev_section: "05-networking-external-interfaces"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Demonstration session loop driven by uevctl run."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uev_common::config::SessionConfig;
use uev_msg::{Ack, EventsError, LineNumber, LineState, RequestReply, SyncCoordinator};

/// Totals for one `run` session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub groups: u32,
    pub acks: usize,
    pub ack_timeouts: usize,
}

impl SessionReport {
    fn tally(&mut self, outcome: Result<Ack, EventsError>, what: &str) -> Result<()> {
        match outcome {
            Ok(ack) => {
                info!(event = what, ack = ack.value, "recorder acknowledged");
                self.acks += 1;
                Ok(())
            }
            Err(EventsError::AckTimeout(waited)) => {
                warn!(event = what, waited_ms = waited.as_millis() as u64, "no ack from recorder");
                self.ack_timeouts += 1;
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("draining ack for {}", what)),
        }
    }
}

/// State used for the sync pair of `group`; alternates starting low.
pub fn sync_state(group: u32) -> LineState {
    LineState::from(group % 2 == 1)
}

/// Run the demonstration session.
///
/// Each group waits `intergroup_delay`, emits a sync pair and drains its ACK,
/// waits `soft_delay`, sends the text annotation and drains it, then sends an
/// on/off pair on the extra line back to back and drains both ACKs. ACK
/// timeouts are logged and counted; everything else aborts the session.
pub fn run_session<T: RequestReply>(
    coordinator: &mut SyncCoordinator<'_, T>,
    session: &SessionConfig,
    ack_timeout: Duration,
) -> Result<SessionReport> {
    let sync_line = LineNumber::new(session.sync_line);
    let extra_line = LineNumber::new(session.extra_line);
    let mut report = SessionReport::default();

    for group in 0..session.groups {
        thread::sleep(session.intergroup_delay);

        let pair = coordinator
            .emit_sync(sync_line, sync_state(group))
            .with_context(|| format!("sync pair for group {}", group))?;
        info!(group, reply = %pair.real_reply, soft_timestamp = pair.soft_timestamp, "sync sent");
        report.tally(coordinator.drain_ack(ack_timeout), "sync")?;

        thread::sleep(session.soft_delay);

        coordinator.emit_text(session.text_payload.as_bytes())?;
        report.tally(coordinator.drain_ack(ack_timeout), "text")?;

        coordinator.emit_extra_ttl(extra_line, LineState::High)?;
        coordinator.emit_extra_ttl(extra_line, LineState::Low)?;
        for outcome in coordinator.drain_acks(ack_timeout)? {
            report.tally(outcome, "extra ttl")?;
        }

        report.groups += 1;
    }

    info!(
        groups = report.groups,
        acks = report.acks,
        ack_timeouts = report.ack_timeouts,
        "session finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uev_common::config::TextFraming;
    use uev_common::time::SessionClock;
    use uev_msg::{InMemoryRequester, RealChannel, SoftChannel, SoftEventPeer, SoftFrame};

    fn quick_session(groups: u32) -> SessionConfig {
        SessionConfig {
            groups,
            intergroup_delay: Duration::from_millis(1),
            soft_delay: Duration::from_millis(1),
            text_payload: "trial marker".into(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn sync_state_alternates_from_low() {
        assert_eq!(sync_state(0), LineState::Low);
        assert_eq!(sync_state(1), LineState::High);
        assert_eq!(sync_state(2), LineState::Low);
    }

    #[test]
    fn session_sends_four_frames_per_group() {
        let mut peer = SoftEventPeer::bind("127.0.0.1:0".parse().unwrap(), TextFraming::LengthPrefixed)
            .expect("peer");
        let peer_addr = peer.local_addr().expect("peer addr");
        let recorder = thread::spawn(move || {
            peer.serve(8, Duration::from_secs(2), |frame| frame.timestamp())
                .expect("serve")
        });

        let requester = InMemoryRequester::new("TTL received");
        let mut real = RealChannel::with_transport(requester.clone());
        let mut soft = SoftChannel::open("127.0.0.1:0".parse().unwrap(), peer_addr).expect("soft");
        let mut coordinator = SyncCoordinator::new(&mut real, &mut soft, SessionClock::start());

        let report = run_session(&mut coordinator, &quick_session(2), Duration::from_secs(2))
            .expect("session");
        assert_eq!(
            report,
            SessionReport {
                groups: 2,
                acks: 8,
                ack_timeouts: 0
            }
        );
        assert_eq!(
            requester.requests(),
            vec!["TTL Line=4 State=0".to_owned(), "TTL Line=4 State=1".to_owned()]
        );

        let frames = recorder.join().expect("recorder thread");
        assert_eq!(frames.len(), 8);
        assert!(matches!(&frames[1], SoftFrame::Text(text) if text.text_lossy() == "trial marker"));
        let timestamps: Vec<f64> = frames.iter().map(SoftFrame::timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn silent_recorder_counts_timeouts() {
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").expect("silent peer");
        let mut real = RealChannel::with_transport(InMemoryRequester::new("ok"));
        let mut soft = SoftChannel::open(
            "127.0.0.1:0".parse().unwrap(),
            silent.local_addr().expect("addr"),
        )
        .expect("soft");
        let mut coordinator = SyncCoordinator::new(&mut real, &mut soft, SessionClock::start());

        let report = run_session(&mut coordinator, &quick_session(1), Duration::from_millis(20))
            .expect("session");
        assert_eq!(report.acks, 0);
        assert_eq!(report.ack_timeouts, 4);
        assert_eq!(coordinator.pending_acks(), 0);
    }
}
