//! UDP control-channel receiver.
//!
//! Binds a UDP socket, decodes each datagram with [`OscCodec`], and
//! dispatches every decoded message to all handlers whose address pattern
//! matches. Dispatch is synchronous and in arrival order; handlers are
//! expected to be cheap (store a value, flip a flag) so the socket loop
//! keeps up with the sender.
//!
//! Malformed packets are counted and logged, never fatal: the listener
//! survives any byte sequence thrown at its port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, trace, warn};

use crate::error::FramecastError;
use crate::osc::codec::OscCodec;
use crate::osc::message::ControlMessage;
use crate::osc::pattern::AddressPattern;

/// How long `stop` waits for the socket loop to drain before aborting it.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Handler invoked for each matching control message.
pub type ControlHandler = Box<dyn Fn(&ControlMessage) + Send + Sync + 'static>;

// ── ControlStats ─────────────────────────────────────────────────

/// Listener counters, updated by the socket loop.
#[derive(Debug, Default)]
pub struct ControlStats {
    pub packets_received: AtomicU64,
    pub packets_malformed: AtomicU64,
    pub messages_dispatched: AtomicU64,
    pub messages_unmatched: AtomicU64,
}

impl ControlStats {
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_malformed(&self) -> u64 {
        self.packets_malformed.load(Ordering::Relaxed)
    }

    pub fn messages_dispatched(&self) -> u64 {
        self.messages_dispatched.load(Ordering::Relaxed)
    }

    pub fn messages_unmatched(&self) -> u64 {
        self.messages_unmatched.load(Ordering::Relaxed)
    }
}

struct HandlerRegistration {
    pattern: AddressPattern,
    handler: ControlHandler,
}

enum ReceiverState {
    Stopped,
    Listening {
        local_addr: SocketAddr,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
}

// ── ControlReceiver ──────────────────────────────────────────────

/// UDP listener that routes control messages to registered handlers.
///
/// # Lifetime
///
/// Register handlers with [`on`](Self::on) while stopped, then call
/// [`start`](Self::start). [`stop`](Self::stop) is idempotent and the
/// receiver can be restarted afterwards.
pub struct ControlReceiver {
    handlers: Vec<Arc<HandlerRegistration>>,
    state: ReceiverState,
    stats: Arc<ControlStats>,
    drain_timeout: Duration,
}

impl ControlReceiver {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            state: ReceiverState::Stopped,
            stats: Arc::new(ControlStats::default()),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Override how long `stop` waits for in-flight packets.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Register `handler` for every message whose address matches `pattern`.
    ///
    /// Handlers can only be added while the receiver is stopped. A message
    /// matching several patterns invokes every matching handler, in
    /// registration order.
    pub fn on(
        &mut self,
        pattern: &str,
        handler: impl Fn(&ControlMessage) + Send + Sync + 'static,
    ) -> Result<(), FramecastError> {
        if matches!(self.state, ReceiverState::Listening { .. }) {
            return Err(FramecastError::AlreadyListening);
        }
        let pattern = AddressPattern::parse(pattern)?;
        self.handlers.push(Arc::new(HandlerRegistration {
            pattern,
            handler: Box::new(handler),
        }));
        Ok(())
    }

    /// Bind `bind` and start the socket loop.
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn start(&mut self, bind: SocketAddr) -> Result<SocketAddr, FramecastError> {
        if matches!(self.state, ReceiverState::Listening { .. }) {
            return Err(FramecastError::AlreadyListening);
        }

        let socket = UdpSocket::bind(bind).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                FramecastError::AddressInUse(bind)
            } else {
                FramecastError::Io(e)
            }
        })?;
        let local_addr = socket.local_addr()?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(socket_loop(
            UdpFramed::new(socket, OscCodec),
            self.handlers.clone(),
            Arc::clone(&self.stats),
            cancel.clone(),
        ));

        info!(%local_addr, "control receiver listening");
        self.state = ReceiverState::Listening {
            local_addr,
            cancel,
            task,
        };
        Ok(local_addr)
    }

    /// Stop the socket loop.
    ///
    /// Waits up to the drain timeout for the loop to observe cancellation,
    /// then aborts it. Calling `stop` on a stopped receiver is a no-op.
    pub async fn stop(&mut self) -> Result<(), FramecastError> {
        let state = std::mem::replace(&mut self.state, ReceiverState::Stopped);
        let ReceiverState::Listening {
            local_addr,
            cancel,
            task,
        } = state
        else {
            return Ok(());
        };

        cancel.cancel();
        if tokio::time::timeout(self.drain_timeout, task).await.is_err() {
            warn!(%local_addr, "socket loop did not drain in time, aborting");
        }
        info!(%local_addr, "control receiver stopped");
        Ok(())
    }

    /// Whether the socket loop is running.
    pub fn is_listening(&self) -> bool {
        matches!(self.state, ReceiverState::Listening { .. })
    }

    /// The bound address, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.state {
            ReceiverState::Listening { local_addr, .. } => Some(local_addr),
            ReceiverState::Stopped => None,
        }
    }

    pub fn stats(&self) -> &ControlStats {
        &self.stats
    }
}

impl Default for ControlReceiver {
    fn default() -> Self {
        Self::new()
    }
}

async fn socket_loop(
    mut framed: UdpFramed<OscCodec>,
    handlers: Vec<Arc<HandlerRegistration>>,
    stats: Arc<ControlStats>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = framed.next() => match next {
                Some(Ok((messages, peer))) => {
                    stats.packets_received.fetch_add(1, Ordering::Relaxed);
                    for message in &messages {
                        dispatch(&handlers, &stats, message, peer);
                    }
                }
                Some(Err(FramecastError::Decode(e))) => {
                    stats.packets_malformed.fetch_add(1, Ordering::Relaxed);
                    debug!("dropping malformed packet: {e}");
                }
                Some(Err(e)) => {
                    // Transient socket errors (e.g. ICMP port unreachable on
                    // some platforms) do not stop the loop.
                    debug!("socket error: {e}");
                }
                None => break,
            },
        }
    }
}

fn dispatch(
    handlers: &[Arc<HandlerRegistration>],
    stats: &ControlStats,
    message: &ControlMessage,
    peer: SocketAddr,
) {
    let mut matched = false;
    for registration in handlers {
        if registration.pattern.matches(message.address()) {
            (registration.handler)(message);
            matched = true;
        }
    }
    if matched {
        stats.messages_dispatched.fetch_add(1, Ordering::Relaxed);
        trace!(%peer, address = message.address(), "dispatched control message");
    } else {
        stats.messages_unmatched.fetch_add(1, Ordering::Relaxed);
        trace!(%peer, address = message.address(), "no handler for control message");
    }
}
