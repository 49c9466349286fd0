/// Network capture for the sandbox bridge
///
/// Frames are read on a blocking thread, queued, decoded by an async worker
/// and handed to every registered handler whose layer types appear in the
/// packet. Dispatch is best-effort: when the queue is full frames are dropped
/// and counted.

pub mod backend;
pub mod dns;
pub mod dns_wire;
pub mod packet;

pub use backend::{default_backend, CaptureBackend, DisabledBackend, PacketSource};
#[cfg(feature = "live-capture")]
pub use backend::PcapBackend;
#[cfg(not(feature = "live-capture"))]
pub use backend::UnavailableBackend;
pub use dns::DnsAnalyzer;
pub use packet::{LayerType, Packet};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to activate capture on {interface}: {message}")]
    Activate { interface: String, message: String },

    #[error("Capture read failed: {0}")]
    Read(String),

    #[error("Capture already started")]
    AlreadyStarted,
}

/// Receives decoded packets from a running capture.
pub trait PacketHandler: Send {
    /// Layers this handler wants; a packet is delivered if it carries any.
    fn layer_types(&self) -> Vec<LayerType>;
    fn handle(&mut self, packet: &Packet);
}

type SharedHandler = Arc<Mutex<dyn PacketHandler>>;

#[derive(Clone)]
struct Registration {
    layers: Vec<LayerType>,
    handler: SharedHandler,
}

#[derive(Debug, Default)]
struct Counters {
    seen: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    undecodable: AtomicU64,
}

/// Snapshot of capture counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub seen: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub undecodable: u64,
}

pub struct PacketCapture {
    interface: String,
    backend: Arc<dyn CaptureBackend>,
    queue_capacity: usize,
    handlers: Vec<Registration>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    started: bool,
    reader: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PacketCapture {
    pub fn new(interface: impl Into<String>, backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            interface: interface.into(),
            backend,
            queue_capacity: 4096,
            handlers: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            started: false,
            reader: None,
            worker: None,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Register a handler and get back a shared handle to read its state
    /// after the capture is closed. Handlers registered after `start` are
    /// not dispatched to.
    pub fn register_handler<H>(&mut self, handler: H) -> Arc<Mutex<H>>
    where
        H: PacketHandler + 'static,
    {
        if self.started {
            warn!(interface = %self.interface, "Handler registered after capture start is ignored");
        }
        let layers = handler.layer_types();
        let shared = Arc::new(Mutex::new(handler));
        self.handlers.push(Registration {
            layers,
            handler: shared.clone(),
        });
        shared
    }

    /// Open the backend and spawn the reader thread and dispatch worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.started {
            return Err(CaptureError::AlreadyStarted);
        }
        let source = self.backend.open(&self.interface)?;
        self.started = true;

        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let stop = self.stop.clone();
        let counters = self.counters.clone();
        self.reader = Some(tokio::task::spawn_blocking(move || {
            read_loop(source, tx, stop, counters)
        }));

        let handlers = self.handlers.clone();
        let counters = self.counters.clone();
        self.worker = Some(tokio::spawn(dispatch_loop(rx, handlers, counters)));

        info!(interface = %self.interface, handlers = self.handlers.len(), "Packet capture started");
        Ok(())
    }

    /// Stop reading and wait until every queued packet has been dispatched.
    /// Safe to call more than once and on a capture that never started.
    pub async fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);

        let reader = self.reader.take();
        let worker = self.worker.take();
        if reader.is_none() && worker.is_none() {
            return;
        }

        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                error!("Capture reader task failed: {}", e);
            }
        }
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Capture dispatch task failed: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            interface = %self.interface,
            seen = stats.seen,
            dispatched = stats.dispatched,
            dropped = stats.dropped,
            undecodable = stats.undecodable,
            "Packet capture closed"
        );
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            seen: self.counters.seen.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            undecodable: self.counters.undecodable.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PacketCapture {
    fn drop(&mut self) {
        // The reader exits at its next timeout; the worker follows once the
        // queue's sender is gone.
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn read_loop(
    mut source: Box<dyn PacketSource>,
    tx: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    while !stop.load(Ordering::SeqCst) {
        match source.next_packet() {
            Ok(Some(frame)) => {
                counters.seen.fetch_add(1, Ordering::Relaxed);
                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("Packet capture stopped: {}", e);
                break;
            }
        }
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Vec<u8>>,
    handlers: Vec<Registration>,
    counters: Arc<Counters>,
) {
    while let Some(frame) = rx.recv().await {
        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                counters.undecodable.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping undecodable frame ({} bytes): {}", frame.len(), e);
                continue;
            }
        };

        let mut delivered = false;
        for registration in &handlers {
            if registration.layers.iter().any(|l| packet.has_layer(*l)) {
                registration.handler.lock().await.handle(&packet);
                delivered = true;
            }
        }
        if delivered {
            counters.dispatched.fetch_add(1, Ordering::Relaxed);
        }
    }
}
