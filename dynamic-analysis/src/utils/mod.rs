//! Path and address helpers shared by the trace parser and the DNS correlator.

use std::net::IpAddr;

/// Lexically clean a slash-separated path.
///
/// Collapses repeated separators, removes `.` elements and resolves `..`
/// against the preceding element. `..` never climbs above the root of an
/// absolute path. An empty input cleans to `.`.
pub fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for element in path.split('/') {
        match element {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Resolve `path` against `dir` the way `*at` syscalls do.
///
/// Absolute paths pass through untouched apart from cleaning. An empty
/// `path` (as used with `AT_EMPTY_PATH`) refers to `dir` itself.
pub fn resolve_at(dir: &str, path: &str) -> String {
    if path.starts_with('/') {
        clean_path(path)
    } else if path.is_empty() {
        clean_path(dir)
    } else {
        clean_path(&format!("{}/{}", dir, path))
    }
}

/// True for fd descriptions the runtime prints in place of a path
/// (`socket:[12]`, `pipe:[3]`, `anon_inode:[eventfd]`).
pub fn is_pseudo_path(path: &str) -> bool {
    !path.starts_with('/') && path.contains(":[")
}

/// Canonical textual form of an IP address, or `None` if `address` is not one.
///
/// IPv4-mapped IPv6 addresses are reduced to their IPv4 form so that
/// `::ffff:93.184.216.34` and `93.184.216.34` compare equal.
pub fn normalize_ip(address: &str) -> Option<String> {
    let trimmed = address.trim().trim_start_matches('[').trim_end_matches(']');
    let ip: IpAddr = trimmed.parse().ok()?;
    let canonical = match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };
    Some(canonical.to_string())
}
