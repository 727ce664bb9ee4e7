//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Synchronous request/reply channel for real trigger events."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::line::{LineNumber, LineState};
use crate::logging::{log_trigger, SoftEventMetrics};
use crate::{EventsError, Result};

/// One blocking request followed by exactly one reply.
pub trait RequestReply: Send {
    /// Send `message` and block until the peer answers.
    fn request(&mut self, message: &str) -> Result<String>;
    /// Human-readable endpoint for logging.
    fn endpoint(&self) -> &str;
}

/// ZeroMQ REQ socket. Fields drop in order, so the socket closes before its context.
pub struct ZmqRequester {
    socket: zmq::Socket,
    _context: zmq::Context,
    endpoint: String,
}

impl ZmqRequester {
    /// Connect to `host:port` or a full `tcp://host:port` endpoint.
    ///
    /// ZeroMQ connects lazily, so an absent peer is not detected here; only
    /// invalid endpoints and socket setup failures are.
    pub fn connect(remote_addr: &str) -> Result<Self> {
        let endpoint = normalize_endpoint(remote_addr);
        let connect_err = |err: zmq::Error| EventsError::Connect {
            endpoint: endpoint.clone(),
            reason: err.to_string(),
        };
        let context = zmq::Context::new();
        let socket = context.socket(zmq::REQ).map_err(connect_err)?;
        socket.set_linger(0).map_err(connect_err)?;
        socket.connect(&endpoint).map_err(connect_err)?;
        debug!(endpoint = %endpoint, "real channel connected");
        Ok(Self {
            socket,
            _context: context,
            endpoint,
        })
    }
}

impl RequestReply for ZmqRequester {
    fn request(&mut self, message: &str) -> Result<String> {
        self.socket
            .send(message, 0)
            .map_err(|err| EventsError::Protocol(format!("send failed: {}", err)))?;
        match self.socket.recv_string(0) {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(raw)) => Err(EventsError::Protocol(format!(
                "reply of {} bytes is not valid UTF-8",
                raw.len()
            ))),
            Err(err) => Err(EventsError::Protocol(format!("no reply: {}", err))),
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn normalize_endpoint(remote_addr: &str) -> String {
    let trimmed = remote_addr.trim();
    if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("tcp://{}", trimmed)
    }
}

/// In-memory request/reply peer that records every request.
#[derive(Clone)]
pub struct InMemoryRequester {
    requests: Arc<Mutex<Vec<String>>>,
    reply: Option<String>,
}

impl InMemoryRequester {
    /// Answer every request with `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            requests: Arc::default(),
            reply: Some(reply.into()),
        }
    }

    /// Record requests but never answer, as if the peer went away.
    pub fn silent() -> Self {
        Self {
            requests: Arc::default(),
            reply: None,
        }
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl RequestReply for InMemoryRequester {
    fn request(&mut self, message: &str) -> Result<String> {
        self.requests.lock().push(message.to_owned());
        self.reply
            .clone()
            .ok_or_else(|| EventsError::Protocol("peer did not reply".into()))
    }

    fn endpoint(&self) -> &str {
        "in_memory"
    }
}

/// Trigger channel translating 0-based lines to the peer's 1-based convention.
///
/// At most one request is in flight. If an exchange fails the underlying
/// synchronous socket is left mid-exchange, so the channel refuses further
/// triggers until it is reopened.
pub struct RealChannel<T: RequestReply = ZmqRequester> {
    transport: T,
    poisoned: bool,
    metrics: Option<Arc<SoftEventMetrics>>,
}

impl RealChannel<ZmqRequester> {
    /// Connect to the recorder's request/reply endpoint.
    pub fn open(remote_addr: &str) -> Result<Self> {
        Ok(Self::with_transport(ZmqRequester::connect(remote_addr)?))
    }
}

impl<T: RequestReply> RealChannel<T> {
    /// Wrap an existing transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            poisoned: false,
            metrics: None,
        }
    }

    /// Attach metric handles.
    pub fn with_metrics(mut self, metrics: Arc<SoftEventMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wire text for a trigger.
    pub fn format_trigger(line: LineNumber, state: LineState) -> String {
        format!("TTL Line={} State={}", line.real_wire(), state.wire())
    }

    /// Send one trigger and wait for its reply.
    pub fn send_trigger(&mut self, line: LineNumber, state: LineState) -> Result<String> {
        if self.poisoned {
            return Err(EventsError::Protocol(
                "previous request never completed; reopen the real channel".into(),
            ));
        }
        let message = Self::format_trigger(line, state);
        self.poisoned = true;
        match self.transport.request(&message) {
            Ok(reply) => {
                self.poisoned = false;
                log_trigger(self.transport.endpoint(), line, state, &reply);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_trigger();
                }
                Ok(reply)
            }
            Err(err) => {
                error!(endpoint = self.transport.endpoint(), request = %message, error = %err, "real trigger failed");
                Err(err)
            }
        }
    }

    /// Whether a failed exchange has made the channel unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Endpoint of the underlying transport.
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
