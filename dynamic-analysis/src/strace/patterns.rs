use lazy_static::lazy_static;
use regex::Regex;

const HEX: &str = r"[0-9a-fA-F]{1,4}";
const IPV4: &str = r"(?:\d{1,3}\.){3}\d{1,3}";

/// IPv6 text forms, tried in order: uncompressed, compressed before an IPv4
/// suffix, compressed in the middle with an IPv4 suffix, fully compressed.
///
/// The last form does not bound the number of groups, so strings with too
/// many segments (`1:2:3:4:5:6:7:8::9`) are accepted.
fn ipv6_pattern() -> String {
    let uncompressed = format!("(?:{HEX}:){{7}}{HEX}");
    let leading_v4 = format!("::(?:ffff(?::0{{1,4}})?:)?{IPV4}");
    let middle_v4 = format!("(?:{HEX}:){{1,4}}:{IPV4}");
    let compressed = format!("(?:{HEX}(?::{HEX})*)?::(?:{HEX}(?::{HEX})*)?");
    format!("(?:{uncompressed}|{leading_v4}|{middle_v4}|{compressed})")
}

fn ip_pattern() -> String {
    format!("(?:{IPV4}|{})", ipv6_pattern())
}

lazy_static! {
    /// `<timestamp> <thread> strace.go:<n>] [<pid>(:<tid>)] <process> <E|X> <syscall>(<args>)`
    pub static ref LINE: Regex = Regex::new(
        r"strace\.go:\d+\] \[\s*(\d+)(?::\s*\d+)?\] (\S+|.+?) (E|X) (\w+)\((.*)\)"
    ).unwrap();

    pub static ref OPEN: Regex = Regex::new(r"^\S+ ([^,]+), ([^,]+)").unwrap();
    pub static ref OPENAT: Regex = Regex::new(r"^\S+ ([^,]*), \S+ ([^,]*), ([^,]+)").unwrap();
    /// stat, fstat, lstat and creat: the first argument is the path.
    pub static ref FIRST_PATH: Regex = Regex::new(r"^\S+ ([^,]+),").unwrap();
    pub static ref NEWFSTATAT: Regex = Regex::new(r"^\S+ ([^,]*), \S+ ([^,]*),").unwrap();
    pub static ref UNLINK: Regex = Regex::new(r"^\S+ ([^)]+)").unwrap();
    pub static ref UNLINKAT: Regex = Regex::new(r"^\S+ ([^,]+), \S+ ([^,]*)").unwrap();

    pub static ref SOCKADDR_FAMILY: Regex = Regex::new(r"\{Family: ([A-Z0-9_]+)").unwrap();
    pub static ref SOCKADDR_INET: Regex = Regex::new(
        &format!(r"Addr: ({}), Port: (\d+)", ip_pattern())
    ).unwrap();
}
