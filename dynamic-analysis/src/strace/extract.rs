//! Per-syscall argument extraction.

use std::collections::HashMap;

use lazy_static::lazy_static;
use thiserror::Error;

use crate::utils::{clean_path, is_pseudo_path, resolve_at};

use super::patterns;

/// What one traced syscall tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallEvent {
    File {
        path: String,
        read: bool,
        write: bool,
        delete: bool,
    },
    Socket {
        address: String,
        port: u16,
    },
    Command {
        argv: Vec<String>,
        env: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("arguments do not match the {0} pattern")]
    Mismatch(&'static str),

    #[error("port {0} out of range")]
    Port(String),

    #[error("undecodable execve arrays: {0}")]
    Json(#[from] serde_json::Error),

    #[error("execve arguments are missing the {0} array")]
    MissingArray(&'static str),
}

impl ExtractError {
    /// Errors that lose the whole event rather than a malformed line.
    pub fn is_fatal_to_event(&self) -> bool {
        matches!(self, ExtractError::Json(_) | ExtractError::MissingArray(_))
    }
}

pub type Extractor = fn(&str) -> Result<Option<SyscallEvent>, ExtractError>;

lazy_static! {
    static ref EXTRACTORS: HashMap<&'static str, Extractor> = {
        let mut table: HashMap<&'static str, Extractor> = HashMap::new();
        table.insert("creat", creat);
        table.insert("open", open);
        table.insert("openat", openat);
        table.insert("stat", stat);
        table.insert("fstat", stat);
        table.insert("lstat", stat);
        table.insert("newfstatat", newfstatat);
        table.insert("unlink", unlink);
        table.insert("unlinkat", unlinkat);
        table.insert("execve", execve);
        table.insert("connect", socket);
        table.insert("bind", socket);
        table
    };
}

pub fn extractor_for(syscall: &str) -> Option<Extractor> {
    EXTRACTORS.get(syscall).copied()
}

fn file(path: String, read: bool, write: bool, delete: bool) -> Option<SyscallEvent> {
    Some(SyscallEvent::File {
        path,
        read,
        write,
        delete,
    })
}

/// Lexically cleaned form of a path argument. Empty arguments and fd
/// descriptions are passed through for the parser to discard.
fn traced_path(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || is_pseudo_path(raw) {
        raw.to_string()
    } else {
        clean_path(raw)
    }
}

/// Read/write intent of `open(2)` flags.
fn open_mode(flags: &str) -> (bool, bool) {
    let mut read = false;
    let mut write = false;
    for flag in flags.split('|').map(str::trim) {
        match flag {
            "O_RDONLY" => read = true,
            "O_WRONLY" | "O_CREAT" => write = true,
            "O_RDWR" => {
                read = true;
                write = true;
            }
            _ => {}
        }
    }
    (read, write)
}

fn creat(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let caps = patterns::FIRST_PATH
        .captures(args)
        .ok_or(ExtractError::Mismatch("creat"))?;
    Ok(file(traced_path(&caps[1]), false, true, false))
}

fn open(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let caps = patterns::OPEN
        .captures(args)
        .ok_or(ExtractError::Mismatch("open"))?;
    let (read, write) = open_mode(&caps[2]);
    Ok(file(traced_path(&caps[1]), read, write, false))
}

fn openat(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let caps = patterns::OPENAT
        .captures(args)
        .ok_or(ExtractError::Mismatch("openat"))?;
    let (read, write) = open_mode(&caps[3]);
    let path = resolve_at(caps[1].trim(), caps[2].trim());
    Ok(file(path, read, write, false))
}

fn stat(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let caps = patterns::FIRST_PATH
        .captures(args)
        .ok_or(ExtractError::Mismatch("stat"))?;
    Ok(file(traced_path(&caps[1]), true, false, false))
}

fn newfstatat(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let caps = patterns::NEWFSTATAT
        .captures(args)
        .ok_or(ExtractError::Mismatch("newfstatat"))?;
    let path = resolve_at(caps[1].trim(), caps[2].trim());
    Ok(file(path, true, false, false))
}

fn unlink(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let caps = patterns::UNLINK
        .captures(args)
        .ok_or(ExtractError::Mismatch("unlink"))?;
    Ok(file(traced_path(&caps[1]), false, false, true))
}

fn unlinkat(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let caps = patterns::UNLINKAT
        .captures(args)
        .ok_or(ExtractError::Mismatch("unlinkat"))?;
    let path = resolve_at(caps[1].trim(), caps[2].trim());
    Ok(file(path, false, false, true))
}

/// Decode the JSON string array starting at the first `[` at or after
/// `from`. Returns the array and the offset just past it.
fn string_array(
    args: &str,
    from: usize,
    which: &'static str,
) -> Result<(Vec<String>, usize), ExtractError> {
    let start = args
        .get(from..)
        .and_then(|rest| rest.find('['))
        .map(|i| from + i)
        .ok_or(ExtractError::MissingArray(which))?;

    let mut stream =
        serde_json::Deserializer::from_str(&args[start..]).into_iter::<Vec<String>>();
    let values = stream.next().ok_or(ExtractError::MissingArray(which))??;
    Ok((values, start + stream.byte_offset()))
}

fn execve(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let (argv, end) = string_array(args, 0, "argv")?;
    let (env, _) = string_array(args, end, "env")?;
    Ok(Some(SyscallEvent::Command { argv, env }))
}

fn socket(args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
    let family = patterns::SOCKADDR_FAMILY
        .captures(args)
        .ok_or(ExtractError::Mismatch("sockaddr"))?;
    if !matches!(&family[1], "AF_INET" | "AF_INET6") {
        return Ok(None);
    }

    let caps = patterns::SOCKADDR_INET
        .captures(args)
        .ok_or(ExtractError::Mismatch("inet sockaddr"))?;
    let port = caps[2]
        .parse::<u16>()
        .map_err(|_| ExtractError::Port(caps[2].to_string()))?;

    Ok(Some(SyscallEvent::Socket {
        address: caps[1].to_string(),
        port,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(syscall: &str, args: &str) -> Result<Option<SyscallEvent>, ExtractError> {
        extractor_for(syscall).unwrap()(args)
    }

    fn file_event(path: &str, read: bool, write: bool, delete: bool) -> Option<SyscallEvent> {
        file(path.to_string(), read, write, delete)
    }

    #[test]
    fn test_open_flags() {
        assert_eq!(open_mode("O_RDONLY|O_CLOEXEC"), (true, false));
        assert_eq!(open_mode("O_WRONLY|O_CREAT|O_TRUNC"), (false, true));
        assert_eq!(open_mode("O_RDWR"), (true, true));
        assert_eq!(open_mode("O_CREAT"), (false, true));
        assert_eq!(open_mode("O_DIRECTORY"), (false, false));
    }

    #[test]
    fn test_plain_paths_are_cleaned() {
        assert_eq!(
            run("open", "0x7f00 /tmp//x, O_RDONLY, 0o0) = 3 (0x3)").unwrap(),
            file_event("/tmp/x", true, false, false)
        );
        assert_eq!(
            run("unlink", "0x7f00 /tmp/./x) = 0 (0x0)").unwrap(),
            file_event("/tmp/x", false, false, true)
        );
        assert_eq!(
            run("stat", "0x7f00 /app/lib/../package.json, 0x7f10 {dev=1}) = 0").unwrap(),
            file_event("/app/package.json", true, false, false)
        );
    }

    #[test]
    fn test_open_and_creat() {
        assert_eq!(
            run("open", "0x7f00 /etc/hosts, O_RDONLY|O_CLOEXEC, 0o0) = 3 (0x3)").unwrap(),
            file_event("/etc/hosts", true, false, false)
        );
        assert_eq!(
            run("creat", "0x7f00 /tmp/out, 0o644) = 3 (0x3)").unwrap(),
            file_event("/tmp/out", false, true, false)
        );
    }

    #[test]
    fn test_openat_resolves_relative_paths() {
        assert_eq!(
            run("openat", "AT_FDCWD /app, 0x7f00 lib/../index.js, O_RDONLY, 0o0) = 3 (0x3)").unwrap(),
            file_event("/app/index.js", true, false, false)
        );
        assert_eq!(
            run("openat", "AT_FDCWD /app, 0x7f00 /etc/passwd, O_RDONLY, 0o0) = 3 (0x3)").unwrap(),
            file_event("/etc/passwd", true, false, false)
        );
    }

    #[test]
    fn test_stat_family() {
        let expected = file_event("/usr/lib/node", true, false, false);
        for syscall in ["stat", "lstat", "fstat"] {
            assert_eq!(run(syscall, "0x7f00 /usr/lib/node, 0x7f10 {dev=1}) = 0").unwrap(), expected);
        }
        // Empty path with AT_EMPTY_PATH refers to the directory itself.
        assert_eq!(
            run("newfstatat", "0x3 /app/node_modules, 0x7f00 , 0x7f10 {dev=1}, 0x1000) = 0").unwrap(),
            file_event("/app/node_modules", true, false, false)
        );
    }

    #[test]
    fn test_unlink_family() {
        assert_eq!(
            run("unlink", "0x7f00 /tmp/payload.sh) = 0 (0x0)").unwrap(),
            file_event("/tmp/payload.sh", false, false, true)
        );
        assert_eq!(
            run("unlinkat", "AT_FDCWD /tmp, 0x7f00 build, 0x200) = 0 (0x0)").unwrap(),
            file_event("/tmp/build", false, false, true)
        );
    }

    #[test]
    fn test_execve_arrays() {
        let args = r#"0x7f00 /usr/bin/node, 0x7f10 ["node", "-e", "x"], 0x7f20 ["HOME=/root"]) = 0"#;
        assert_eq!(
            run("execve", args).unwrap(),
            Some(SyscallEvent::Command {
                argv: vec!["node".into(), "-e".into(), "x".into()],
                env: vec!["HOME=/root".into()],
            })
        );
    }

    #[test]
    fn test_execve_bracket_inside_argument() {
        let args = r#"0x7f00 /usr/bin/node, 0x7f10 ["node", "-e", "console.log([1])"], 0x7f20 ["A=[x]"]) = 0"#;
        assert_eq!(
            run("execve", args).unwrap(),
            Some(SyscallEvent::Command {
                argv: vec!["node".into(), "-e".into(), "console.log([1])".into()],
                env: vec!["A=[x]".into()],
            })
        );
    }

    #[test]
    fn test_execve_bad_json_is_fatal_to_event() {
        let err = run("execve", r#"0x7f00 /bin/sh, 0x7f10 ["sh", "-c], 0x7f20 []"#).unwrap_err();
        assert!(err.is_fatal_to_event());

        let err = run("execve", r#"0x7f00 /bin/sh, 0x7f10 ["sh"]) = 0"#).unwrap_err();
        assert!(matches!(err, ExtractError::MissingArray("env")));
    }

    #[test]
    fn test_socket_families() {
        assert_eq!(
            run("connect", "0x3 socket:[2], 0x7f00 {Family: AF_INET, Addr: 93.184.216.34, Port: 443}, 0x10) = 0").unwrap(),
            Some(SyscallEvent::Socket { address: "93.184.216.34".into(), port: 443 })
        );
        assert_eq!(
            run("bind", "0x3 socket:[2], 0x7f00 {Family: AF_INET6, Addr: ::, Port: 8080}, 0x1c) = 0").unwrap(),
            Some(SyscallEvent::Socket { address: "::".into(), port: 8080 })
        );
        assert_eq!(
            run("connect", r#"0x3 socket:[2], 0x7f00 {Family: AF_UNIX, Addr: "/var/run/nscd/socket"}, 0x6e) = -1"#).unwrap(),
            None
        );
        assert_eq!(
            run("connect", "0x3 socket:[2], 0x7f00 {Family: AF_NETLINK, PortID: 0, Groups: 0}, 0xc) = 0").unwrap(),
            None
        );
    }

    #[test]
    fn test_socket_mismatches() {
        assert!(matches!(
            run("connect", "0x3 socket:[2], 0x0, 0x10) = -1 EFAULT"),
            Err(ExtractError::Mismatch(_))
        ));
        assert!(matches!(
            run("connect", "0x3 socket:[2], 0x7f00 {Family: AF_INET, Addr: 10.0.0.1, Port: 99999}, 0x10) = 0"),
            Err(ExtractError::Port(_))
        ));
    }

    #[test]
    fn test_unknown_syscall_has_no_extractor() {
        assert!(extractor_for("read").is_none());
        assert!(extractor_for("execve").is_some());
    }
}
