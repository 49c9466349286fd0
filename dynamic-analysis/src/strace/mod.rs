/// Syscall trace parsing
///
/// Turns the gVisor strace log written during a sandbox run into file,
/// socket and command records. Parsing is tolerant: anything that does not
/// look like a traced syscall exit is skipped and never aborts the parse.

pub mod extract;
pub mod patterns;

pub use extract::{ExtractError, SyscallEvent};

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead};

use tracing::{debug, error, warn};

use crate::models::{CommandRecord, FileAccessRecord, SocketRecord};
use crate::utils::is_pseudo_path;

/// Records extracted from one trace log, each collection sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StraceResult {
    pub files: Vec<FileAccessRecord>,
    /// Hostnames are left empty; they are joined in from DNS at report time.
    pub sockets: Vec<SocketRecord>,
    pub commands: Vec<CommandRecord>,
}

/// Accumulation state for one parse.
#[derive(Default)]
struct ParseSession {
    files: BTreeMap<String, FileAccessRecord>,
    sockets: BTreeSet<(String, u16)>,
    commands: BTreeSet<CommandRecord>,
    lines: usize,
    events: usize,
}

impl ParseSession {
    fn line(&mut self, line: &str) {
        self.lines += 1;

        let Some(caps) = patterns::LINE.captures(line) else {
            return;
        };
        if &caps[3] != "X" {
            return;
        }

        let syscall = &caps[4];
        let Some(extractor) = extract::extractor_for(syscall) else {
            return;
        };

        match extractor(&caps[5]) {
            Ok(Some(event)) => self.apply(event),
            Ok(None) => {}
            Err(e) if e.is_fatal_to_event() => {
                error!(syscall, pid = &caps[1], error = %e, "Dropping unparsable syscall");
            }
            Err(e) => {
                warn!(syscall, pid = &caps[1], error = %e, "Skipping malformed syscall arguments");
            }
        }
    }

    fn apply(&mut self, event: SyscallEvent) {
        self.events += 1;
        match event {
            SyscallEvent::File {
                path,
                read,
                write,
                delete,
            } => {
                if path.is_empty() || is_pseudo_path(&path) {
                    return;
                }
                self.files
                    .entry(path.clone())
                    .or_insert_with(|| FileAccessRecord::new(path))
                    .merge(read, write, delete);
            }
            SyscallEvent::Socket { address, port } => {
                self.sockets.insert((address, port));
            }
            SyscallEvent::Command { argv, env } => {
                self.commands.insert(CommandRecord { argv, env });
            }
        }
    }

    fn finish(self) -> StraceResult {
        debug!(
            lines = self.lines,
            events = self.events,
            files = self.files.len(),
            sockets = self.sockets.len(),
            commands = self.commands.len(),
            "Parsed syscall trace"
        );

        StraceResult {
            files: self.files.into_values().collect(),
            sockets: self
                .sockets
                .into_iter()
                .map(|(address, port)| SocketRecord {
                    address,
                    port,
                    hostnames: Vec::new(),
                })
                .collect(),
            commands: self.commands.into_iter().collect(),
        }
    }
}

/// Parse a trace log. Only I/O errors from `reader` are reported; the
/// content itself can never make the parse fail.
pub fn parse<R: BufRead>(mut reader: R) -> io::Result<StraceResult> {
    let mut session = ParseSession::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        session.line(line.trim_end_matches(['\n', '\r']));
    }

    Ok(session.finish())
}
