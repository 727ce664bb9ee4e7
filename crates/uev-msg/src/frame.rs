//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Binary codec for soft-event frames and acknowledgements."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
//! Soft-event frame layouts.
//!
//! ```text
//! TTL   [u8 kind=1][f64 le timestamp][u8 line][u8 state]            11 bytes
//! Text  [u8 kind=2][f64 le timestamp][u16 be length][payload]       11 + n bytes
//! Text  [u8 kind=2][f64 le timestamp][payload]                       9 + n bytes (datagram-bounded)
//! ACK   [f64 le]                                                     8 bytes
//! ```
//!
//! The timestamp and ACK are little-endian, the text length is big-endian.
//! The two orders differ on purpose and must stay that way.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uev_common::config::{TextFraming, MAX_TEXT_PAYLOAD};

use crate::line::{LineNumber, LineState};
use crate::{EventsError, Result};

/// Size of a TTL frame on the wire.
pub const TTL_FRAME_LEN: usize = 11;
/// Kind tag plus timestamp.
pub const FRAME_HEADER_LEN: usize = 9;
/// Header plus the 16-bit text length.
pub const TEXT_HEADER_LEN: usize = 11;
/// Size of an ACK reply.
pub const ACK_LEN: usize = 8;

/// Frame kind tag carried in byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Digital line transition.
    Ttl,
    /// Free-form text annotation.
    Text,
}

impl FrameKind {
    /// Wire tag.
    pub const fn tag(self) -> u8 {
        match self {
            FrameKind::Ttl => 1,
            FrameKind::Text => 2,
        }
    }

    /// Map a wire tag back to a kind.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(FrameKind::Ttl),
            2 => Ok(FrameKind::Text),
            other => Err(EventsError::UnknownFrameKind(other)),
        }
    }

    /// Static label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            FrameKind::Ttl => "ttl",
            FrameKind::Text => "text",
        }
    }
}

/// Soft TTL transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlEvent {
    /// Client timestamp in seconds.
    pub timestamp: f64,
    /// Line that changed.
    pub line: LineNumber,
    /// New level.
    pub state: LineState,
}

/// Soft text annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEvent {
    /// Client timestamp in seconds.
    pub timestamp: f64,
    /// Raw payload bytes, no terminator.
    pub payload: Bytes,
}

impl TextEvent {
    /// Payload as UTF-8, replacing invalid sequences.
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A soft-channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftFrame {
    /// See [`TtlEvent`].
    Ttl(TtlEvent),
    /// See [`TextEvent`].
    Text(TextEvent),
}

impl SoftFrame {
    /// Build a TTL frame.
    pub fn ttl(timestamp: f64, line: LineNumber, state: LineState) -> Self {
        SoftFrame::Ttl(TtlEvent {
            timestamp,
            line,
            state,
        })
    }

    /// Build a text frame.
    pub fn text(timestamp: f64, payload: impl Into<Bytes>) -> Self {
        SoftFrame::Text(TextEvent {
            timestamp,
            payload: payload.into(),
        })
    }

    /// Kind of this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            SoftFrame::Ttl(_) => FrameKind::Ttl,
            SoftFrame::Text(_) => FrameKind::Text,
        }
    }

    /// Client timestamp carried by the frame.
    pub fn timestamp(&self) -> f64 {
        match self {
            SoftFrame::Ttl(event) => event.timestamp,
            SoftFrame::Text(event) => event.timestamp,
        }
    }

    /// Serialize to the wire layout.
    pub fn encode(&self, framing: TextFraming) -> Result<Bytes> {
        match self {
            SoftFrame::Ttl(event) => Ok(Bytes::copy_from_slice(&encode_ttl(
                event.timestamp,
                event.line,
                event.state,
            ))),
            SoftFrame::Text(event) => encode_text_framed(event.timestamp, &event.payload, framing),
        }
    }

    /// Parse a datagram, dispatching on the kind tag in byte 0.
    pub fn decode(bytes: &[u8], framing: TextFraming) -> Result<Self> {
        let Some(&tag) = bytes.first() else {
            return Err(EventsError::MalformedFrame("empty datagram".into()));
        };
        match FrameKind::from_tag(tag)? {
            FrameKind::Ttl => decode_ttl(bytes).map(SoftFrame::Ttl),
            FrameKind::Text => decode_text(bytes, framing).map(SoftFrame::Text),
        }
    }
}

/// Encode a TTL frame.
pub fn encode_ttl(timestamp: f64, line: LineNumber, state: LineState) -> [u8; TTL_FRAME_LEN] {
    let mut frame = [0u8; TTL_FRAME_LEN];
    let mut cursor = &mut frame[..];
    cursor.put_u8(FrameKind::Ttl.tag());
    cursor.put_f64_le(timestamp);
    cursor.put_u8(line.soft_wire());
    cursor.put_u8(state.wire());
    frame
}

/// Encode a length-prefixed text frame.
pub fn encode_text(timestamp: f64, payload: &[u8]) -> Result<Bytes> {
    encode_text_framed(timestamp, payload, TextFraming::LengthPrefixed)
}

fn encode_text_framed(timestamp: f64, payload: &[u8], framing: TextFraming) -> Result<Bytes> {
    if payload.len() > MAX_TEXT_PAYLOAD {
        return Err(EventsError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_TEXT_PAYLOAD,
        });
    }
    let mut frame = BytesMut::with_capacity(TEXT_HEADER_LEN + payload.len());
    frame.put_u8(FrameKind::Text.tag());
    frame.put_f64_le(timestamp);
    if framing == TextFraming::LengthPrefixed {
        frame.put_u16(payload.len() as u16);
    }
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Decode a TTL frame.
pub fn decode_ttl(bytes: &[u8]) -> Result<TtlEvent> {
    if bytes.len() < TTL_FRAME_LEN {
        return Err(EventsError::MalformedFrame(format!(
            "ttl frame needs {} bytes, got {}",
            TTL_FRAME_LEN,
            bytes.len()
        )));
    }
    let mut buf = bytes;
    let tag = buf.get_u8();
    if FrameKind::from_tag(tag)? != FrameKind::Ttl {
        return Err(EventsError::MalformedFrame(format!(
            "expected ttl frame, found kind tag {}",
            tag
        )));
    }
    let timestamp = buf.get_f64_le();
    let line = LineNumber::new(buf.get_u8());
    let state = LineState::from_wire(buf.get_u8());
    Ok(TtlEvent {
        timestamp,
        line,
        state,
    })
}

fn decode_text(bytes: &[u8], framing: TextFraming) -> Result<TextEvent> {
    let header = match framing {
        TextFraming::LengthPrefixed => TEXT_HEADER_LEN,
        TextFraming::DatagramBounded => FRAME_HEADER_LEN,
    };
    if bytes.len() < header {
        return Err(EventsError::MalformedFrame(format!(
            "text frame needs at least {} bytes, got {}",
            header,
            bytes.len()
        )));
    }
    let mut buf = &bytes[1..];
    let timestamp = buf.get_f64_le();
    let payload = match framing {
        TextFraming::LengthPrefixed => {
            let declared = usize::from(buf.get_u16());
            if buf.remaining() < declared {
                return Err(EventsError::MalformedFrame(format!(
                    "text length field says {} bytes, datagram carries {}",
                    declared,
                    buf.remaining()
                )));
            }
            Bytes::copy_from_slice(&buf[..declared])
        }
        TextFraming::DatagramBounded => Bytes::copy_from_slice(buf),
    };
    Ok(TextEvent { timestamp, payload })
}

/// Encode an ACK reply.
pub fn encode_ack(value: f64) -> [u8; ACK_LEN] {
    value.to_le_bytes()
}

/// Decode an ACK reply; trailing bytes are ignored.
pub fn decode_ack(bytes: &[u8]) -> Result<f64> {
    if bytes.len() < ACK_LEN {
        return Err(EventsError::MalformedAck { len: bytes.len() });
    }
    let mut buf = bytes;
    Ok(buf.get_f64_le())
}
