//! DNS messages as the correlator sees them.
//!
//! Wire decoding is done by `hickory-proto`; this module reduces a decoded
//! message to header flags, the question section and the answer section.
//! Authority and additional records are dropped.

use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::error::ProtoError;
use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::{Name, RData, Record};
use thiserror::Error;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_HTTPS: u16 = 65;
pub const TYPE_ANY: u16 = 255;

pub const CLASS_IN: u16 = 1;
pub const CLASS_CH: u16 = 3;
pub const CLASS_HS: u16 = 4;
pub const CLASS_ANY: u16 = 255;

#[derive(Debug, Error)]
pub enum DnsDecodeError {
    #[error("malformed DNS message: {0}")]
    Malformed(#[from] ProtoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    /// CNAME, NS and PTR targets.
    Name(String),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub data: RecordData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub id: u16,
    pub is_response: bool,
    pub rcode: u8,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

impl DnsMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, DnsDecodeError> {
        let message = Message::from_vec(bytes)?;

        let questions = message
            .queries()
            .iter()
            .map(|q| DnsQuestion {
                name: name_text(q.name()),
                qtype: u16::from(q.query_type()),
                qclass: u16::from(q.query_class()),
            })
            .collect();

        Ok(Self {
            id: message.id(),
            is_response: message.message_type() == MessageType::Response,
            rcode: (u16::from(message.response_code()) & 0x000f) as u8,
            questions,
            answers: message.answers().iter().map(answer).collect(),
        })
    }
}

fn answer(record: &Record) -> DnsRecord {
    let data = match record.data() {
        Some(RData::A(a)) => RecordData::A(a.0),
        Some(RData::AAAA(aaaa)) => RecordData::Aaaa(aaaa.0),
        Some(RData::CNAME(target)) => RecordData::Name(name_text(&target.0)),
        Some(RData::NS(target)) => RecordData::Name(name_text(&target.0)),
        Some(RData::PTR(target)) => RecordData::Name(name_text(&target.0)),
        _ => RecordData::Other,
    };

    DnsRecord {
        name: name_text(record.name()),
        rtype: u16::from(record.record_type()),
        class: u16::from(record.dns_class()),
        ttl: record.ttl(),
        data,
    }
}

/// Dotted name without the trailing root dot; the root itself is `.`.
fn name_text(name: &Name) -> String {
    let ascii = name.to_ascii();
    match ascii.trim_end_matches('.') {
        "" => ".".to_string(),
        trimmed => trimmed.to_string(),
    }
}

pub fn class_name(class: u16) -> String {
    match class {
        CLASS_IN => "IN".to_string(),
        CLASS_CH => "CH".to_string(),
        CLASS_HS => "HS".to_string(),
        CLASS_ANY => "ANY".to_string(),
        other => format!("CLASS{}", other),
    }
}

pub fn type_name(rtype: u16) -> String {
    match rtype {
        TYPE_A => "A".to_string(),
        TYPE_NS => "NS".to_string(),
        TYPE_CNAME => "CNAME".to_string(),
        TYPE_SOA => "SOA".to_string(),
        TYPE_PTR => "PTR".to_string(),
        TYPE_MX => "MX".to_string(),
        TYPE_TXT => "TXT".to_string(),
        TYPE_AAAA => "AAAA".to_string(),
        TYPE_SRV => "SRV".to_string(),
        TYPE_HTTPS => "HTTPS".to_string(),
        TYPE_ANY => "ANY".to_string(),
        other => format!("TYPE{}", other),
    }
}
