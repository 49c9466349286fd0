//! Decoding of captured Ethernet frames into the layers handlers subscribe to.

use std::net::IpAddr;

use etherparse::err::packet::SliceError;
use etherparse::{LinkSlice, NetSlice, SlicedPacket, TransportSlice};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dns_wire::DnsMessage;

const DNS_PORT: u16 = 53;

/// Protocol layers a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerType {
    Ethernet,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Dns,
}

/// A decoded frame.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub layers: Vec<LayerType>,
    pub source: Option<IpAddr>,
    pub destination: Option<IpAddr>,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    /// Present when the frame is UDP to or from port 53 and its payload
    /// decodes as a DNS message.
    pub dns: Option<DnsMessage>,
}

impl Packet {
    pub fn decode(frame: &[u8]) -> Result<Self, SliceError> {
        let sliced = SlicedPacket::from_ethernet(frame)?;
        let mut packet = Packet::default();

        if matches!(sliced.link, Some(LinkSlice::Ethernet2(_))) {
            packet.layers.push(LayerType::Ethernet);
        }

        match &sliced.net {
            Some(NetSlice::Ipv4(ipv4)) => {
                packet.layers.push(LayerType::Ipv4);
                packet.source = Some(IpAddr::V4(ipv4.header().source_addr()));
                packet.destination = Some(IpAddr::V4(ipv4.header().destination_addr()));
            }
            Some(NetSlice::Ipv6(ipv6)) => {
                packet.layers.push(LayerType::Ipv6);
                packet.source = Some(IpAddr::V6(ipv6.header().source_addr()));
                packet.destination = Some(IpAddr::V6(ipv6.header().destination_addr()));
            }
            _ => {}
        }

        match &sliced.transport {
            Some(TransportSlice::Tcp(tcp)) => {
                packet.layers.push(LayerType::Tcp);
                packet.source_port = Some(tcp.source_port());
                packet.destination_port = Some(tcp.destination_port());
            }
            Some(TransportSlice::Udp(udp)) => {
                packet.layers.push(LayerType::Udp);
                packet.source_port = Some(udp.source_port());
                packet.destination_port = Some(udp.destination_port());

                if udp.source_port() == DNS_PORT || udp.destination_port() == DNS_PORT {
                    match DnsMessage::decode(udp.payload()) {
                        Ok(message) => {
                            packet.layers.push(LayerType::Dns);
                            packet.dns = Some(message);
                        }
                        Err(e) => debug!("Ignoring undecodable DNS payload: {}", e),
                    }
                }
            }
            _ => {}
        }

        Ok(packet)
    }

    pub fn has_layer(&self, layer: LayerType) -> bool {
        self.layers.contains(&layer)
    }
}
