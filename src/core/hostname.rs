//! Hostname lookup and sanitisation.
//!
//! Store keys embed the local hostname. Characters that collide with key
//! separators or match-all tokens (`-`, `.`, `*`, `>`) are replaced with
//! underscores so a hostname is always a single opaque key segment.

use std::net::UdpSocket;

/// The sanitised local hostname.
///
/// Falls back to the first routable local IPv4 address when the OS refuses
/// to report a hostname, then applies [`sanitize`].
pub fn hostname() -> String {
    let raw = gethostname::gethostname();
    let name = raw.to_string_lossy();
    if name.is_empty() {
        return sanitize(&local_ipv4());
    }
    sanitize(&name)
}

/// Replace `- . * >` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '-' | '.' | '*' | '>' => '_',
            other => other,
        })
        .collect()
}

/// Best-effort local IPv4 address.
///
/// Uses a connected UDP socket to learn the address the kernel would route
/// from; no packet is sent. Returns an empty string when no interface is
/// routable.
pub fn local_ipv4() -> String {
    let Ok(socket) = UdpSocket::bind("0.0.0.0:0") else {
        return String::new();
    };
    if socket.connect("8.8.8.8:53").is_err() {
        return String::new();
    }
    match socket.local_addr() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_separator_characters() {
        assert_eq!(sanitize("a-b.c"), "a_b_c");
        assert_eq!(sanitize("node*>x"), "node__x");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn hostname_is_sanitised() {
        let name = hostname();
        assert!(!name.contains('-'));
        assert!(!name.contains('.'));
        assert!(!name.contains('*'));
        assert!(!name.contains('>'));
    }
}
