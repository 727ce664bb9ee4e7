//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Recorder-side soft event responder for bring-up and tests."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
//! Minimal stand-in for the recorder's soft-event endpoint.
//!
//! It decodes frames and answers each with an 8-byte ACK. It does no clock
//! estimation; the ACK value is whatever the caller's closure returns.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::{debug, warn};
use uev_common::config::TextFraming;

use crate::frame::{encode_ack, SoftFrame};
use crate::logging::{log_frame, FrameDirection};
use crate::{EventsError, Result};

const PEER_BUFFER_LEN: usize = 65_536;
const PREALLOCATED_FRAMES: usize = 64;

/// Bound UDP endpoint that receives soft frames and replies with ACKs.
#[derive(Debug)]
pub struct SoftEventPeer {
    socket: UdpSocket,
    framing: TextFraming,
    buffer: Vec<u8>,
}

impl SoftEventPeer {
    /// Bind the recorder-side endpoint.
    pub fn bind(addr: SocketAddr, framing: TextFraming) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| EventsError::Bind { addr, source })?;
        Ok(Self {
            socket,
            framing,
            buffer: vec![0u8; PEER_BUFFER_LEN],
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait up to `timeout` for one datagram. `Ok(None)` means nothing arrived.
    ///
    /// A datagram that fails to decode is returned as an error; the sender
    /// gets no ACK for it.
    pub fn await_frame(&mut self, timeout: Duration) -> Result<Option<(SoftFrame, SocketAddr)>> {
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let (len, from) = match self.socket.recv_from(&mut self.buffer) {
            Ok(received) => received,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None)
            }
            Err(err) => return Err(err.into()),
        };
        let frame = SoftFrame::decode(&self.buffer[..len], self.framing)?;
        log_frame(FrameDirection::Inbound, &frame, len);
        Ok(Some((frame, from)))
    }

    /// Send an ACK datagram to `to`.
    pub fn reply_ack(&self, to: SocketAddr, value: f64) -> Result<()> {
        self.socket.send_to(&encode_ack(value), to)?;
        Ok(())
    }

    /// Answer frames until `limit` is reached or nothing arrives within
    /// `idle`; `None` means no limit. Frames are not retained.
    ///
    /// Undecodable datagrams are logged and skipped. Returns the number of
    /// frames answered.
    pub fn respond<F>(&mut self, limit: Option<usize>, idle: Duration, mut ack_for: F) -> Result<usize>
    where
        F: FnMut(&SoftFrame) -> f64,
    {
        let mut answered = 0usize;
        while limit.map_or(true, |limit| answered < limit) {
            match self.await_frame(idle) {
                Ok(Some((frame, from))) => {
                    let value = ack_for(&frame);
                    self.reply_ack(from, value)?;
                    debug!(to = %from, ack = value, "peer replied");
                    answered += 1;
                }
                Ok(None) => break,
                Err(err @ EventsError::Io(_)) => return Err(err),
                Err(err) => warn!(error = %err, "dropping undecodable datagram"),
            }
        }
        Ok(answered)
    }

    /// Answer up to `count` frames like [`respond`](Self::respond) and return them.
    pub fn serve<F>(&mut self, count: usize, timeout: Duration, mut ack_for: F) -> Result<Vec<SoftFrame>>
    where
        F: FnMut(&SoftFrame) -> f64,
    {
        let mut served = Vec::with_capacity(count.min(PREALLOCATED_FRAMES));
        self.respond(Some(count), timeout, |frame| {
            served.push(frame.clone());
            ack_for(frame)
        })?;
        Ok(served)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode_ack, encode_text, encode_ttl};
    use crate::line::{LineNumber, LineState};

    fn peer() -> SoftEventPeer {
        SoftEventPeer::bind("127.0.0.1:0".parse().expect("addr"), TextFraming::LengthPrefixed)
            .expect("bind")
    }

    #[test]
    fn await_frame_times_out_quietly() {
        let mut peer = peer();
        assert!(peer
            .await_frame(Duration::from_millis(10))
            .expect("no error")
            .is_none());
    }

    #[test]
    fn unbounded_serve_on_idle_peer_returns_empty() {
        let mut peer = peer();
        let served = peer
            .serve(usize::MAX, Duration::from_millis(10), |_| 0.0)
            .expect("serve");
        assert!(served.is_empty());
        assert_eq!(
            peer.respond(None, Duration::from_millis(10), |_| 0.0)
                .expect("respond"),
            0
        );
    }

    #[test]
    fn respond_without_limit_counts_until_idle() {
        let mut peer = peer();
        let target = peer.local_addr().expect("addr");
        let client = UdpSocket::bind("127.0.0.1:0").expect("client");
        for i in 0..3u8 {
            client
                .send_to(&encode_ttl(f64::from(i), LineNumber::new(i), LineState::High), target)
                .expect("ttl");
        }
        let answered = peer
            .respond(None, Duration::from_millis(200), |frame| frame.timestamp())
            .expect("respond");
        assert_eq!(answered, 3);
    }

    #[test]
    fn serve_echoes_timestamps_and_skips_garbage() {
        let mut peer = peer();
        let target = peer.local_addr().expect("addr");
        let client = UdpSocket::bind("127.0.0.1:0").expect("client");
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");

        client
            .send_to(&encode_ttl(1.25, LineNumber::new(4), LineState::High), target)
            .expect("ttl");
        client.send_to(&[9, 0, 0], target).expect("garbage");
        client
            .send_to(&encode_text(2.5, b"note").expect("text"), target)
            .expect("text");

        let served = peer
            .serve(2, Duration::from_millis(500), |frame| frame.timestamp())
            .expect("serve");
        assert_eq!(served.len(), 2);

        let mut buf = [0u8; 16];
        let (len, _) = client.recv_from(&mut buf).expect("ack 1");
        assert_eq!(decode_ack(&buf[..len]).expect("ack"), 1.25);
        let (len, _) = client.recv_from(&mut buf).expect("ack 2");
        assert_eq!(decode_ack(&buf[..len]).expect("ack"), 2.5);
    }
}
