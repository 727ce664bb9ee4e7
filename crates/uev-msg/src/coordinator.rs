//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Sequencing of sync pairs and unpaired soft events."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uev_common::time::{duration_to_micros, SessionClock};

use crate::line::{LineNumber, LineState};
use crate::real::{RealChannel, RequestReply};
use crate::soft::{Ack, SoftChannel};
use crate::{EventsError, Result};

/// A real trigger and its soft TTL twin, same line and state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPair {
    /// Line shared by both events.
    pub line: LineNumber,
    /// State shared by both events.
    pub state: LineState,
    /// Reply text from the real channel, logged but not interpreted.
    pub real_reply: String,
    /// Timestamp carried by the soft TTL frame.
    pub soft_timestamp: f64,
    /// Time between issuing the real request and transmitting the soft frame.
    pub gap: Duration,
}

/// Snapshot of coordinator activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounters {
    /// Completed sync pairs.
    pub sync_pairs: u64,
    /// Unpaired TTL frames sent.
    pub extra_ttl: u64,
    /// Text frames sent.
    pub text: u64,
    /// ACKs drained.
    pub acks: u64,
    /// ACKs that timed out.
    pub ack_timeouts: u64,
}

/// Orchestrates one session over a real and a soft channel it borrows.
///
/// Timestamps come from the coordinator's clock so a single time base
/// governs every soft frame of the session.
pub struct SyncCoordinator<'a, T: RequestReply> {
    real: &'a mut RealChannel<T>,
    soft: &'a mut SoftChannel,
    clock: SessionClock,
    counters: SyncCounters,
}

impl<'a, T: RequestReply> SyncCoordinator<'a, T> {
    /// Borrow both channels for the lifetime of the coordinator.
    pub fn new(
        real: &'a mut RealChannel<T>,
        soft: &'a mut SoftChannel,
        clock: SessionClock,
    ) -> Self {
        Self {
            real,
            soft,
            clock,
            counters: SyncCounters::default(),
        }
    }

    /// Send a real trigger, then immediately a soft TTL on the same line and state.
    ///
    /// The real request goes first: the recorder stamps the real event when
    /// it actually arrives, which is always after the request is issued, and
    /// the soft timestamp is captured right after the reply so the two sit
    /// as close as possible.
    pub fn emit_sync(&mut self, line: LineNumber, state: LineState) -> Result<SyncPair> {
        let started = Instant::now();
        let real_reply = self.real.send_trigger(line, state)?;
        let soft_timestamp = self.clock.now();
        self.soft.send_ttl_at(soft_timestamp, line, state)?;
        let gap = started.elapsed();
        self.counters.sync_pairs += 1;
        info!(
            line = line.value(),
            state = state.wire(),
            soft_timestamp,
            gap_us = duration_to_micros(gap),
            reply = %real_reply,
            "sync pair emitted"
        );
        Ok(SyncPair {
            line,
            state,
            real_reply,
            soft_timestamp,
            gap,
        })
    }

    /// Soft-only TTL transition; returns the timestamp sent.
    pub fn emit_extra_ttl(&mut self, line: LineNumber, state: LineState) -> Result<f64> {
        let timestamp = self.soft.send_ttl_at(self.clock.now(), line, state)?;
        self.counters.extra_ttl += 1;
        Ok(timestamp)
    }

    /// Soft-only text annotation; returns the timestamp sent.
    pub fn emit_text(&mut self, payload: &[u8]) -> Result<f64> {
        let timestamp = self.soft.send_text_at(self.clock.now(), payload)?;
        self.counters.text += 1;
        Ok(timestamp)
    }

    /// Drain one ACK from the soft channel.
    pub fn drain_ack(&mut self, timeout: Duration) -> Result<Ack> {
        let result = self.soft.drain_ack(timeout);
        self.record_drain(&result);
        result
    }

    /// Drain every outstanding ACK in send order.
    ///
    /// Timeouts are counted and collected rather than aborting, so one lost
    /// datagram does not leave later ACKs queued and misattributed. Any other
    /// error stops the drain.
    pub fn drain_acks(&mut self, timeout: Duration) -> Result<Vec<Result<Ack>>> {
        let mut outcomes = Vec::with_capacity(self.soft.pending_acks());
        while self.soft.pending_acks() > 0 {
            match self.drain_ack(timeout) {
                Err(EventsError::AckTimeout(elapsed)) => {
                    outcomes.push(Err(EventsError::AckTimeout(elapsed)));
                }
                Err(err) => return Err(err),
                Ok(ack) => outcomes.push(Ok(ack)),
            }
        }
        Ok(outcomes)
    }

    fn record_drain(&mut self, result: &Result<Ack>) {
        match result {
            Ok(_) => self.counters.acks += 1,
            Err(EventsError::AckTimeout(_)) => self.counters.ack_timeouts += 1,
            Err(err) => warn!(error = %err, "ack drain failed"),
        }
    }

    /// Frames whose ACK has not been drained.
    pub fn pending_acks(&self) -> usize {
        self.soft.pending_acks()
    }

    /// Session clock reading.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Return the current counters snapshot.
    pub fn counters(&self) -> SyncCounters {
        self.counters
    }
}
