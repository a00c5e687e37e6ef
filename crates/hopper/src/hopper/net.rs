use std::borrow::Cow;

/// Normalize a bind/listen address.
///
/// Configs commonly use the shorthand `":PORT"` to mean "bind on all
/// interfaces". Tokio's bind APIs do not accept `":PORT"`, so it is
/// normalized to `"0.0.0.0:PORT"`.
pub fn normalize_bind_addr(addr: &str) -> Cow<'_, str> {
    let addr = addr.trim();
    if addr.starts_with(':') {
        Cow::Owned(format!("0.0.0.0{addr}"))
    } else {
        Cow::Borrowed(addr)
    }
}

/// Splits `host:port`, requiring a valid port. IPv6 hosts may be bracketed
/// (`[::1]:25565`); the brackets are stripped from the returned host.
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host, port))
}

/// Splits the advertised hostname at the first NUL byte. The prefix is the
/// logical hostname; the remainder, separator included, is a vendor-mod
/// suffix that must survive any rewrite verbatim.
pub fn split_hostname_tail(raw: &str) -> (&str, &str) {
    match raw.find('\0') {
        Some(i) => raw.split_at(i),
        None => (raw, ""),
    }
}
