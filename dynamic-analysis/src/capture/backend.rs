//! Packet sources.
//!
//! A [`CaptureBackend`] opens a [`PacketSource`] on an interface. Live capture
//! uses libpcap and is only available with the `live-capture` feature. A build
//! without it cannot activate capture; running without traffic at all takes an
//! explicit `CAPTURE_ENABLED=false`, which selects the [`DisabledBackend`].

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::CaptureConfig;

use super::CaptureError;

/// A blocking stream of raw link-layer frames.
pub trait PacketSource: Send + 'static {
    /// Wait for the next frame. `Ok(None)` means the read timed out with
    /// nothing captured; callers use it to check for shutdown.
    fn next_packet(&mut self) -> Result<Option<Vec<u8>>, CaptureError>;
}

pub trait CaptureBackend: Send + Sync {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError>;
}

/// Backend for runs with capture switched off. Yields no traffic.
#[derive(Debug, Clone)]
pub struct DisabledBackend {
    read_timeout: Duration,
}

impl DisabledBackend {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl CaptureBackend for DisabledBackend {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
        warn!(
            interface,
            "Packet capture is disabled; DNS correlation will be empty"
        );
        Ok(Box::new(IdleSource {
            read_timeout: self.read_timeout,
        }))
    }
}

struct IdleSource {
    read_timeout: Duration,
}

impl PacketSource for IdleSource {
    fn next_packet(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        std::thread::sleep(self.read_timeout);
        Ok(None)
    }
}

/// Stands in for live capture in builds without libpcap support.
#[cfg(not(feature = "live-capture"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBackend;

#[cfg(not(feature = "live-capture"))]
impl CaptureBackend for UnavailableBackend {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
        Err(CaptureError::Activate {
            interface: interface.to_string(),
            message: "live capture is not compiled in (build with --features live-capture, \
                      or set CAPTURE_ENABLED=false)"
                .to_string(),
        })
    }
}

#[cfg(feature = "live-capture")]
pub use self::live::PcapBackend;

#[cfg(feature = "live-capture")]
mod live {
    use super::*;

    /// libpcap capture on a network interface.
    #[derive(Debug, Clone)]
    pub struct PcapBackend {
        snaplen: i32,
        read_timeout_ms: i32,
        promiscuous: bool,
    }

    impl PcapBackend {
        pub fn new(config: &CaptureConfig) -> Self {
            Self {
                snaplen: config.snaplen,
                read_timeout_ms: config.read_timeout_ms,
                promiscuous: config.promiscuous,
            }
        }
    }

    impl CaptureBackend for PcapBackend {
        fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
            let activate_error = |e: pcap::Error| CaptureError::Activate {
                interface: interface.to_string(),
                message: e.to_string(),
            };

            let capture = pcap::Capture::from_device(interface)
                .map_err(activate_error)?
                .promisc(self.promiscuous)
                .snaplen(self.snaplen)
                .timeout(self.read_timeout_ms)
                .immediate_mode(true)
                .open()
                .map_err(activate_error)?;

            Ok(Box::new(PcapSource { capture }))
        }
    }

    struct PcapSource {
        capture: pcap::Capture<pcap::Active>,
    }

    impl PacketSource for PcapSource {
        fn next_packet(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
            match self.capture.next_packet() {
                Ok(packet) => Ok(Some(packet.data.to_vec())),
                Err(pcap::Error::TimeoutExpired) => Ok(None),
                Err(e) => Err(CaptureError::Read(e.to_string())),
            }
        }
    }
}

/// The backend for `config` in this build.
pub fn default_backend(config: &CaptureConfig) -> Arc<dyn CaptureBackend> {
    if !config.enabled {
        return Arc::new(DisabledBackend::new(Duration::from_millis(
            config.read_timeout_ms.max(1) as u64,
        )));
    }

    #[cfg(feature = "live-capture")]
    {
        Arc::new(PcapBackend::new(config))
    }
    #[cfg(not(feature = "live-capture"))]
    {
        Arc::new(UnavailableBackend)
    }
}
