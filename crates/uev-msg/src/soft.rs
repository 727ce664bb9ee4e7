//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Datagram channel for soft events and their acknowledgements."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
//! Soft channel over UDP.
//!
//! Every frame sent makes the recorder queue exactly one ACK datagram at our
//! bound endpoint. ACKs are read back strictly in send order, one per frame;
//! draining fewer than were sent leaves stale ACKs that will be attributed
//! to later frames. Nothing is retried.
//!
//! A frame whose ACK times out is abandoned, but its reply may still turn up
//! later. Until that window closes, late replies found before the next send
//! are discarded, and any ACK matched while an abandoned reply is outstanding
//! is flagged [`Ack::possibly_stale`].

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uev_common::config::{TextFraming, MAX_DATAGRAM_LEN};
use uev_common::time::{duration_to_micros, SessionClock};

use crate::frame::{decode_ack, FrameKind, SoftFrame, ACK_LEN};
use crate::line::{LineNumber, LineState};
use crate::logging::{log_frame, FrameDirection, SoftEventMetrics};
use crate::{EventsError, Result};

/// One byte larger than an ACK, so an oversize reply shows up as a length
/// mismatch instead of being truncated into a valid-looking ACK.
const RECV_BUFFER_LEN: usize = ACK_LEN + 1;

/// Reply to a soft frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ack {
    /// Opaque value sent by the recorder.
    pub value: f64,
    /// Kind of the frame this ACK was matched to, if one was pending.
    pub kind: Option<FrameKind>,
    /// Timestamp carried by the matched frame.
    pub frame_timestamp: Option<f64>,
    /// Time from transmission of the matched frame to draining this ACK.
    pub latency: Option<Duration>,
    /// An earlier frame was abandoned recently, so this value may be that
    /// frame's late reply rather than the reply to the matched frame.
    pub possibly_stale: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingAck {
    kind: FrameKind,
    timestamp: f64,
    sent_at: Instant,
}

/// Owns the UDP socket for one session; the socket closes on drop.
pub struct SoftChannel {
    socket: UdpSocket,
    remote: SocketAddr,
    clock: SessionClock,
    framing: TextFraming,
    pending: VecDeque<PendingAck>,
    /// Deadlines until which a late reply to an abandoned frame is expected.
    abandoned: VecDeque<Instant>,
    metrics: Option<Arc<SoftEventMetrics>>,
}

impl std::fmt::Debug for SoftChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftChannel")
            .field("local", &self.socket.local_addr().ok())
            .field("remote", &self.remote)
            .field("framing", &self.framing)
            .field("pending", &self.pending.len())
            .field("abandoned", &self.abandoned.len())
            .finish()
    }
}

impl SoftChannel {
    /// Bind `local_bind_addr` so replies can reach us and remember `remote_addr`.
    pub fn open(local_bind_addr: SocketAddr, remote_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local_bind_addr).map_err(|source| EventsError::Bind {
            addr: local_bind_addr,
            source,
        })?;
        let local = socket.local_addr()?;
        debug!(local = %local, remote = %remote_addr, "soft channel bound");
        Ok(Self {
            socket,
            remote: remote_addr,
            clock: SessionClock::start(),
            framing: TextFraming::default(),
            pending: VecDeque::new(),
            abandoned: VecDeque::new(),
            metrics: None,
        })
    }

    /// Replace the clock used by [`send_ttl`](Self::send_ttl) and [`send_text`](Self::send_text).
    pub fn with_clock(mut self, clock: SessionClock) -> Self {
        self.clock = clock;
        self
    }

    /// Select the text frame layout.
    pub fn with_framing(mut self, framing: TextFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Attach metric handles.
    pub fn with_metrics(mut self, metrics: Arc<SoftEventMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Recorder endpoint.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Text frame layout in use.
    pub fn framing(&self) -> TextFraming {
        self.framing
    }

    /// Frames sent whose ACK has not been drained yet.
    pub fn pending_acks(&self) -> usize {
        self.pending.len()
    }

    /// Abandoned frames whose late reply may still arrive.
    pub fn abandoned_acks(&mut self) -> usize {
        self.expire_abandoned();
        self.abandoned.len()
    }

    /// Send a TTL frame stamped with the channel clock; returns the timestamp used.
    pub fn send_ttl(&mut self, line: LineNumber, state: LineState) -> Result<f64> {
        let timestamp = self.clock.now();
        self.send_ttl_at(timestamp, line, state)
    }

    /// Send a TTL frame with a caller-captured timestamp.
    pub fn send_ttl_at(&mut self, timestamp: f64, line: LineNumber, state: LineState) -> Result<f64> {
        self.send_frame(&SoftFrame::ttl(timestamp, line, state))?;
        Ok(timestamp)
    }

    /// Send a text frame stamped with the channel clock; returns the timestamp used.
    pub fn send_text(&mut self, payload: &[u8]) -> Result<f64> {
        let timestamp = self.clock.now();
        self.send_text_at(timestamp, payload)
    }

    /// Send a text frame with a caller-captured timestamp.
    pub fn send_text_at(&mut self, timestamp: f64, payload: &[u8]) -> Result<f64> {
        let frame = SoftFrame::text(timestamp, bytes::Bytes::copy_from_slice(payload));
        self.send_frame(&frame)?;
        Ok(timestamp)
    }

    /// Encode and transmit any frame. Oversized frames are rejected before
    /// anything is written, leaving the pending queue untouched.
    pub fn send_frame(&mut self, frame: &SoftFrame) -> Result<()> {
        let bytes = frame.encode(self.framing)?;
        if bytes.len() > MAX_DATAGRAM_LEN {
            return Err(EventsError::PayloadTooLarge {
                len: bytes.len(),
                max: MAX_DATAGRAM_LEN,
            });
        }
        self.expire_abandoned();
        if self.pending.is_empty() && !self.abandoned.is_empty() {
            self.discard_late_acks()?;
        }
        let written = self.socket.send_to(&bytes, self.remote)?;
        if written != bytes.len() {
            return Err(EventsError::Io(std::io::Error::new(
                ErrorKind::WriteZero,
                format!("short datagram write: {} of {} bytes", written, bytes.len()),
            )));
        }
        self.pending.push_back(PendingAck {
            kind: frame.kind(),
            timestamp: frame.timestamp(),
            sent_at: Instant::now(),
        });
        log_frame(FrameDirection::Outbound, frame, written);
        if let Some(metrics) = &self.metrics {
            metrics.observe_sent(frame);
        }
        Ok(())
    }

    /// Block until one ACK arrives or `timeout` elapses.
    ///
    /// The ACK is attributed to the oldest pending frame. On timeout that
    /// frame is abandoned: its correlation is lost, a late reply to it is
    /// expected for up to another `timeout`, and the channel stays usable.
    /// A datagram that is not exactly eight bytes fails with
    /// [`EventsError::MalformedAck`] and still consumes the pending frame.
    pub fn drain_ack(&mut self, timeout: Duration) -> Result<Ack> {
        self.expire_abandoned();
        let mut buffer = [0u8; RECV_BUFFER_LEN];
        match self.recv_with_timeout(&mut buffer, timeout) {
            Ok((len, from)) => {
                let matched = self.pending.pop_front();
                if len != ACK_LEN {
                    return Err(EventsError::MalformedAck { len });
                }
                let value = decode_ack(&buffer[..len])?;
                let possibly_stale = matched.is_some() && !self.abandoned.is_empty();
                if from != self.remote {
                    debug!(from = %from, expected = %self.remote, "ack from unexpected address");
                }
                let latency = matched.map(|pending| pending.sent_at.elapsed());
                if let Some(metrics) = &self.metrics {
                    metrics.observe_ack(latency);
                }
                debug!(
                    ack = value,
                    kind = matched.map(|p| p.kind.as_str()).unwrap_or("unmatched"),
                    frame_timestamp = matched.map(|p| p.timestamp),
                    latency_us = latency.map(duration_to_micros),
                    outstanding = self.pending.len(),
                    possibly_stale,
                    "soft ack drained"
                );
                Ok(Ack {
                    value,
                    kind: matched.map(|p| p.kind),
                    frame_timestamp: matched.map(|p| p.timestamp),
                    latency,
                    possibly_stale,
                })
            }
            Err(err) if is_timeout(&err) => {
                let lost = self.pending.pop_front();
                if lost.is_some() {
                    let now = Instant::now();
                    self.abandoned.push_back(now.checked_add(timeout).unwrap_or(now));
                }
                if let Some(metrics) = &self.metrics {
                    metrics.observe_timeout();
                }
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    kind = lost.map(|p| p.kind.as_str()).unwrap_or("none"),
                    frame_timestamp = lost.map(|p| p.timestamp),
                    "soft ack timed out"
                );
                Err(EventsError::AckTimeout(timeout))
            }
            Err(err) => Err(EventsError::Io(err)),
        }
    }

    /// Drain one ACK per pending frame in send order, stopping at the first failure.
    pub fn drain_pending(&mut self, timeout: Duration) -> Result<Vec<Ack>> {
        let mut acks = Vec::with_capacity(self.pending.len());
        while !self.pending.is_empty() {
            acks.push(self.drain_ack(timeout)?);
        }
        Ok(acks)
    }

    fn expire_abandoned(&mut self) {
        let now = Instant::now();
        while self.abandoned.front().is_some_and(|deadline| *deadline <= now) {
            self.abandoned.pop_front();
        }
    }

    /// With nothing pending, any queued datagram can only be a late reply to
    /// an abandoned frame. Read those without blocking and drop them.
    fn discard_late_acks(&mut self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_LEN];
        self.socket.set_nonblocking(true)?;
        let outcome = loop {
            if self.abandoned.is_empty() {
                break Ok(());
            }
            match self.socket.recv_from(&mut buffer) {
                Ok((len, from)) => {
                    self.abandoned.pop_front();
                    warn!(
                        from = %from,
                        bytes = len,
                        ack = (len == ACK_LEN).then(|| decode_ack(&buffer[..len]).ok()).flatten(),
                        "discarded late ack for an abandoned frame"
                    );
                }
                Err(err) if is_timeout(&err) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.socket.set_nonblocking(false)?;
        Ok(outcome?)
    }

    fn recv_with_timeout(
        &self,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> std::io::Result<(usize, SocketAddr)> {
        if timeout.is_zero() {
            // set_read_timeout rejects a zero duration; poll once instead.
            self.socket.set_nonblocking(true)?;
            let result = self.socket.recv_from(buffer);
            self.socket.set_nonblocking(false)?;
            return result;
        }
        self.socket.set_read_timeout(Some(timeout))?;
        self.socket.recv_from(buffer)
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
