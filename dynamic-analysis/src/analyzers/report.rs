//! Assembly of per-phase results.

use chrono::{DateTime, Utc};
use shared::RunPhase;

use crate::capture::DnsAnalyzer;
use crate::models::{AnalysisResult, Status};
use crate::sandbox::RunResult;
use crate::strace::StraceResult;

/// Combine a finished run, its parsed trace and the phase's DNS view.
///
/// Socket hostnames are looked up here rather than during parsing, once all
/// DNS traffic for the phase has been seen.
pub fn build_result(
    phase: RunPhase,
    run: &RunResult,
    trace: StraceResult,
    dns: &DnsAnalyzer,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> AnalysisResult {
    let sockets = trace
        .sockets
        .into_iter()
        .map(|mut socket| {
            socket.hostnames = dns.hostnames(&socket.address);
            socket
        })
        .collect();

    AnalysisResult {
        phase,
        status: Status::from(run.status()),
        files: trace.files,
        sockets,
        commands: trace.commands,
        dns: dns.questions(),
        stdout_bytes: run.stdout().len(),
        stderr_bytes: run.stderr().len(),
        started_at,
        finished_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::dns_wire::testing::{query, response};
    use crate::capture::dns_wire::{DnsMessage, TYPE_A};
    use crate::models::SocketRecord;
    use crate::sandbox::RunStatus;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn test_sockets_joined_with_dns() {
        let mut dns = DnsAnalyzer::new();
        dns.record(&DnsMessage::decode(&query(1, "example.com", &[TYPE_A])).unwrap());
        let addr = "93.184.216.34".parse().unwrap();
        dns.record(&DnsMessage::decode(&response(1, "example.com", TYPE_A, &[addr])).unwrap());

        let trace = StraceResult {
            sockets: vec![
                SocketRecord {
                    address: "10.0.0.1".into(),
                    port: 53,
                    hostnames: Vec::new(),
                },
                SocketRecord {
                    address: "93.184.216.34".into(),
                    port: 443,
                    hostnames: Vec::new(),
                },
            ],
            ..Default::default()
        };
        let run = RunResult::new(
            RunStatus::Failure,
            b"out".to_vec(),
            b"error!".to_vec(),
            PathBuf::from("/logs/runsc.log.boot"),
        );
        let now = Utc::now();

        let result = build_result(RunPhase::Install, &run, trace, &dns, now, now);
        assert_eq!(result.status, Status::ErrorAnalysis);
        assert!(result.socket("10.0.0.1", 53).unwrap().hostnames.is_empty());
        assert_eq!(
            result.socket("93.184.216.34", 443).unwrap().hostnames,
            vec!["example.com"]
        );
        assert_eq!(result.dns.len(), 1);
        assert_eq!((result.stdout_bytes, result.stderr_bytes), (3, 6));
    }
}
