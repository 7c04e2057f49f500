//! Process-level facade.
//!
//! [`Framecast`] bundles a slot ring, a publisher, a subscriber factory and
//! a control receiver behind one handle with sensible defaults, so a host
//! application can push frames and react to control messages without wiring
//! the pieces itself. Everything it does is also available piecemeal through
//! the underlying modules.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::FramecastError;
use crate::frame::Frame;
use crate::osc::message::ControlMessage;
use crate::publisher::{DEFAULT_DEGRADED_THRESHOLD, Publisher};
use crate::receiver::{ControlReceiver, ControlStats, DEFAULT_DRAIN_TIMEOUT};
use crate::slot::ring::{SlotHandle, SlotRing};
use crate::slot::shm_unix::{ShmBackend, default_namespace_dir};
use crate::subscriber::{DEFAULT_HEARTBEAT_STALENESS, Subscriber, Subscription};

// ── FramecastConfig ──────────────────────────────────────────────

/// Configuration for a [`Framecast`] instance.
#[derive(Debug, Clone)]
pub struct FramecastConfig {
    /// Directory holding the shared slot regions. All processes that want
    /// to exchange frames must agree on it.
    pub namespace: PathBuf,
    /// Maximum number of slots this process may publish at once.
    pub ring_capacity: usize,
    /// Consecutive dropped frames before `publish_frame` reports
    /// `PublisherDegraded`.
    pub degraded_threshold: u32,
    /// How long `stop_control_listener` waits for in-flight packets.
    pub drain_timeout: Duration,
    /// Producer silence tolerated before subscriptions probe liveness.
    pub heartbeat_staleness: Duration,
}

impl Default for FramecastConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace_dir(),
            ring_capacity: 16,
            degraded_threshold: DEFAULT_DEGRADED_THRESHOLD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            heartbeat_staleness: DEFAULT_HEARTBEAT_STALENESS,
        }
    }
}

// ── Framecast ────────────────────────────────────────────────────

/// One-stop handle for publishing frames, subscribing to slots and
/// receiving control messages.
pub struct Framecast {
    config: FramecastConfig,
    ring: SlotRing,
    publisher: Publisher,
    subscriber: Subscriber,
    receiver: ControlReceiver,
}

impl Framecast {
    pub fn new() -> Result<Self, FramecastError> {
        Self::with_config(FramecastConfig::default())
    }

    pub fn with_config(config: FramecastConfig) -> Result<Self, FramecastError> {
        let backend = Arc::new(ShmBackend::new(config.namespace.clone())?);
        let ring = SlotRing::new(
            Arc::clone(&backend) as Arc<dyn crate::slot::backend::SlotBackend>,
            config.ring_capacity,
        );
        let publisher = Publisher::with_threshold(config.degraded_threshold);
        let subscriber =
            Subscriber::new(backend).with_heartbeat_staleness(config.heartbeat_staleness);
        let receiver = ControlReceiver::new().with_drain_timeout(config.drain_timeout);

        info!(namespace = %config.namespace.display(), "framecast initialised");
        Ok(Self {
            config,
            ring,
            publisher,
            subscriber,
            receiver,
        })
    }

    pub fn config(&self) -> &FramecastConfig {
        &self.config
    }

    // ── Publishing ───────────────────────────────────────────────

    /// Publish `frame` into the named slot, creating or resizing the slot
    /// as needed.
    ///
    /// The first call for a name opens the slot with the frame's geometry;
    /// a later call with different geometry resizes it (invalidating
    /// consumer mappings) and then publishes.
    pub fn publish_frame(&self, slot: &str, frame: &Frame<'_>) -> Result<(), FramecastError> {
        let handle = match self.ring.get(slot) {
            Some(handle) => {
                if handle.width() != frame.width || handle.height() != frame.height {
                    self.ring.resize(&handle, frame.width, frame.height)?;
                }
                handle
            }
            None => self
                .ring
                .open(slot, frame.width, frame.height, frame.format)?,
        };
        self.publisher.publish(&handle, frame)
    }

    /// Handle for an already-published slot.
    pub fn slot(&self, name: &str) -> Option<SlotHandle> {
        self.ring.get(name)
    }

    pub fn ring(&self) -> &SlotRing {
        &self.ring
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    // ── Subscribing ──────────────────────────────────────────────

    /// Attach to a slot published by this or any other process sharing the
    /// namespace directory.
    pub fn subscribe_frame(&self, slot: &str) -> Result<Subscription, FramecastError> {
        self.subscriber.attach(slot)
    }

    // ── Control channel ──────────────────────────────────────────

    /// Register a control handler; see [`ControlReceiver::on`].
    pub fn on_control(
        &mut self,
        pattern: &str,
        handler: impl Fn(&ControlMessage) + Send + Sync + 'static,
    ) -> Result<(), FramecastError> {
        self.receiver.on(pattern, handler)
    }

    /// Start the control listener on `bind`, returning the bound address.
    pub async fn start_control_listener(
        &mut self,
        bind: SocketAddr,
    ) -> Result<SocketAddr, FramecastError> {
        self.receiver.start(bind).await
    }

    /// Stop the control listener. Idempotent.
    pub async fn stop_control_listener(&mut self) -> Result<(), FramecastError> {
        self.receiver.stop().await
    }

    pub fn control_stats(&self) -> &ControlStats {
        self.receiver.stats()
    }

    // ── Shutdown ─────────────────────────────────────────────────

    /// Stop the listener and close every published slot.
    pub async fn shutdown(&mut self) -> Result<(), FramecastError> {
        self.receiver.stop().await?;
        self.ring.close_all()?;
        info!("framecast shut down");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::osc::codec::encode_message;
    use crate::osc::message::ControlArg;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service() -> (tempfile::TempDir, Framecast) {
        let dir = tempfile::tempdir().unwrap();
        let config = FramecastConfig {
            namespace: dir.path().to_path_buf(),
            ..FramecastConfig::default()
        };
        (dir, Framecast::with_config(config).unwrap())
    }

    #[test]
    fn publish_frame_auto_opens_and_resizes() {
        let (_dir, fc) = service();
        let pixels = vec![1u8; 4 * 4 * 4];
        let frame = Frame::new(4, 4, PixelFormat::Bgra8, &pixels).unwrap();
        fc.publish_frame("cam1", &frame).unwrap();

        let handle = fc.slot("cam1").unwrap();
        assert_eq!((handle.width(), handle.height()), (4, 4));
        assert_eq!(handle.generation(), 1);

        let pixels = vec![2u8; 8 * 8 * 4];
        let frame = Frame::new(8, 8, PixelFormat::Bgra8, &pixels).unwrap();
        fc.publish_frame("cam1", &frame).unwrap();
        assert_eq!((handle.width(), handle.height()), (8, 8));
    }

    #[test]
    fn publish_then_subscribe_in_process() {
        let (_dir, fc) = service();
        let pixels = vec![7u8; 4 * 4 * 4];
        let frame = Frame::new(4, 4, PixelFormat::Rgba8, &pixels).unwrap();
        fc.publish_frame("cam1", &frame).unwrap();

        let mut sub = fc.subscribe_frame("cam1").unwrap();
        let got = sub.poll().unwrap().unwrap();
        assert_eq!(got.pixels, pixels);
        assert_eq!(got.format, PixelFormat::Rgba8);
    }

    #[tokio::test]
    async fn control_round_trip_through_facade() {
        let (_dir, mut fc) = service();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            fc.on_control("/camera/*", move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        let addr = fc
            .start_control_listener(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg = ControlMessage::new("/camera/zoom", vec![ControlArg::Float(1.5)]).unwrap();
        sender.send_to(&encode_message(&msg), addr).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::Relaxed) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        fc.shutdown().await.unwrap();
        assert!(fc.ring().is_empty());
    }
}
