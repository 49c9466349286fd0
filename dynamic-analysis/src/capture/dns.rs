//! DNS correlation for captured traffic.
//!
//! Tracks which names the sandbox asked about and which addresses those
//! names resolved to, so sockets found in the syscall trace can be labelled
//! with the hostnames the package used to reach them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::models::DnsQuestionRecord;
use crate::utils::normalize_ip;

use super::dns_wire::{class_name, type_name, DnsMessage, RecordData, TYPE_A, TYPE_AAAA};
use super::packet::{LayerType, Packet};
use super::PacketHandler;

#[derive(Debug, Default)]
pub struct DnsAnalyzer {
    /// (class, name) -> record types asked for.
    questions: BTreeMap<(String, String), BTreeSet<String>>,
    /// Normalized address -> names that resolved to it.
    resolved: HashMap<String, BTreeSet<String>>,
}

impl DnsAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one DNS message into the indexes.
    pub fn record(&mut self, message: &DnsMessage) {
        if !message.is_response {
            for question in &message.questions {
                self.questions
                    .entry((class_name(question.qclass), question.name.clone()))
                    .or_default()
                    .insert(type_name(question.qtype));
            }
            return;
        }

        let hostnames: BTreeSet<&str> = message
            .questions
            .iter()
            .filter(|q| q.qtype == TYPE_A || q.qtype == TYPE_AAAA)
            .map(|q| q.name.as_str())
            .collect();
        if hostnames.is_empty() {
            return;
        }

        for answer in &message.answers {
            let address = match &answer.data {
                RecordData::A(v4) => v4.to_string(),
                RecordData::Aaaa(v6) => v6.to_string(),
                _ => continue,
            };
            let Some(address) = normalize_ip(&address) else {
                continue;
            };
            debug!(%address, names = ?hostnames, "DNS answer");
            let names = self.resolved.entry(address).or_default();
            names.extend(hostnames.iter().map(|h| h.to_string()));
        }
    }

    /// Names that resolved to `address`, sorted. Empty for unknown or
    /// unparsable addresses.
    pub fn hostnames(&self, address: &str) -> Vec<String> {
        normalize_ip(address)
            .and_then(|addr| self.resolved.get(&addr))
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every question seen, ordered by (class, name).
    pub fn questions(&self) -> Vec<DnsQuestionRecord> {
        self.questions
            .iter()
            .map(|((class, name), types)| DnsQuestionRecord {
                class: class.clone(),
                name: name.clone(),
                types: types.iter().cloned().collect(),
            })
            .collect()
    }
}

impl PacketHandler for DnsAnalyzer {
    fn layer_types(&self) -> Vec<LayerType> {
        vec![LayerType::Dns]
    }

    fn handle(&mut self, packet: &Packet) {
        if let Some(message) = &packet.dns {
            self.record(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::dns_wire::testing::{query, response};
    use crate::capture::dns_wire::TYPE_TXT;
    use pretty_assertions::assert_eq;
    use std::net::IpAddr;

    fn decode(bytes: &[u8]) -> DnsMessage {
        DnsMessage::decode(bytes).unwrap()
    }

    #[test]
    fn test_query_then_response_resolves_hostname() {
        let mut dns = DnsAnalyzer::new();
        dns.record(&decode(&query(1, "example.com", &[TYPE_A, TYPE_AAAA])));
        let addr: IpAddr = "93.184.216.34".parse().unwrap();
        dns.record(&decode(&response(1, "example.com", TYPE_A, &[addr])));

        assert_eq!(dns.hostnames("93.184.216.34"), vec!["example.com"]);
        assert_eq!(dns.hostnames("::ffff:93.184.216.34"), vec!["example.com"]);
        assert!(dns.hostnames("1.1.1.1").is_empty());
        assert!(dns.hostnames("not an address").is_empty());

        assert_eq!(
            dns.questions(),
            vec![DnsQuestionRecord {
                class: "IN".into(),
                name: "example.com".into(),
                types: vec!["A".into(), "AAAA".into()],
            }]
        );
    }

    #[test]
    fn test_ipv6_answers_are_normalized() {
        let mut dns = DnsAnalyzer::new();
        let addr: IpAddr = "2606:2800:220:1:248:1893:25c8:1946".parse().unwrap();
        dns.record(&decode(&response(2, "example.com", TYPE_AAAA, &[addr])));

        assert_eq!(
            dns.hostnames("2606:2800:0220:0001:0248:1893:25c8:1946"),
            vec!["example.com"]
        );
    }

    #[test]
    fn test_multiple_names_for_one_address() {
        let mut dns = DnsAnalyzer::new();
        let addr: IpAddr = "151.101.1.63".parse().unwrap();
        dns.record(&decode(&response(3, "registry.npmjs.org", TYPE_A, &[addr])));
        dns.record(&decode(&response(4, "pypi.org", TYPE_A, &[addr])));

        assert_eq!(dns.hostnames("151.101.1.63"), vec!["pypi.org", "registry.npmjs.org"]);
    }

    #[test]
    fn test_non_address_questions_do_not_resolve() {
        let mut dns = DnsAnalyzer::new();
        // An A answer to a TXT question is not trusted as a resolution.
        let addr: IpAddr = "10.1.1.1".parse().unwrap();
        dns.record(&decode(&response(5, "example.org", TYPE_TXT, &[addr])));
        assert!(dns.hostnames("10.1.1.1").is_empty());
        // Responses do not count as questions.
        assert!(dns.questions().is_empty());
    }

    #[test]
    fn test_handler_ignores_packets_without_dns() {
        let mut dns = DnsAnalyzer::new();
        dns.handle(&Packet::default());
        assert!(dns.questions().is_empty());
        assert_eq!(dns.layer_types(), vec![LayerType::Dns]);
    }
}
