use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::hopper::config::PreambleVersion;

/// HAProxy PROXY protocol v2 signature.
const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Version 2, PROXY command.
const V2_COMMAND_PROXY: u8 = 0x21;

/// AF_INET / AF_INET6, each combined with the STREAM transport nibble.
const V2_FAMILY_TCP4: u8 = 0x11;
const V2_FAMILY_TCP6: u8 = 0x21;

const V2_ADDR_LEN_TCP4: u16 = 12;
const V2_ADDR_LEN_TCP6: u16 = 36;

#[derive(Debug, Error)]
pub enum PreambleError {
    #[error("mixed address families: source {source_addr}, destination {destination_addr}")]
    MixedFamilies {
        source_addr: SocketAddr,
        destination_addr: SocketAddr,
    },
}

/// Encodes the connection preamble written to the upstream socket before any
/// protocol bytes. `source` is the original client, `destination` the
/// upstream as dialed.
///
/// Both endpoints must share one address family; a zeroed family field on
/// the wire would not be accepted by upstreams, so mixed families are
/// refused here instead.
pub fn encode(
    version: PreambleVersion,
    source: SocketAddr,
    destination: SocketAddr,
) -> Result<Vec<u8>, PreambleError> {
    let v6 = match (source.ip(), destination.ip()) {
        (IpAddr::V4(_), IpAddr::V4(_)) => false,
        (IpAddr::V6(_), IpAddr::V6(_)) => true,
        _ => {
            return Err(PreambleError::MixedFamilies {
                source_addr: source,
                destination_addr: destination,
            })
        }
    };

    match version {
        PreambleVersion::Disabled => Ok(Vec::new()),
        PreambleVersion::V1 => Ok(encode_v1(v6, source, destination)),
        PreambleVersion::V2 => Ok(encode_v2(v6, source, destination)),
    }
}

fn encode_v1(v6: bool, source: SocketAddr, destination: SocketAddr) -> Vec<u8> {
    let transport = if v6 { "TCP6" } else { "TCP4" };
    format!(
        "PROXY {transport} {} {} {} {}\r\n",
        source.ip(),
        destination.ip(),
        source.port(),
        destination.port()
    )
    .into_bytes()
}

fn encode_v2(v6: bool, source: SocketAddr, destination: SocketAddr) -> Vec<u8> {
    let (family, addr_len) = if v6 {
        (V2_FAMILY_TCP6, V2_ADDR_LEN_TCP6)
    } else {
        (V2_FAMILY_TCP4, V2_ADDR_LEN_TCP4)
    };

    let mut buf = Vec::with_capacity(16 + addr_len as usize);
    buf.extend_from_slice(&V2_SIGNATURE);
    buf.push(V2_COMMAND_PROXY);
    buf.push(family);
    buf.extend_from_slice(&addr_len.to_be_bytes());

    match (source.ip(), destination.ip()) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            buf.extend_from_slice(&s.octets());
            buf.extend_from_slice(&d.octets());
        }
        (IpAddr::V6(s), IpAddr::V6(d)) => {
            buf.extend_from_slice(&s.octets());
            buf.extend_from_slice(&d.octets());
        }
        _ => unreachable!("family checked by encode"),
    }
    buf.extend_from_slice(&source.port().to_be_bytes());
    buf.extend_from_slice(&destination.port().to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_text_form() {
        let h = encode(
            PreambleVersion::V1,
            "192.168.1.9:51234".parse().unwrap(),
            "10.0.0.2:25565".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(h, b"PROXY TCP4 192.168.1.9 10.0.0.2 51234 25565\r\n");

        let h = encode(
            PreambleVersion::V1,
            "[2001:db8::1]:51234".parse().unwrap(),
            "[2001:db8::2]:25565".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(h, b"PROXY TCP6 2001:db8::1 2001:db8::2 51234 25565\r\n");
    }

    #[test]
    fn v2_binary_form_tcp4() {
        let h = encode(
            PreambleVersion::V2,
            "192.168.1.9:51234".parse().unwrap(),
            "10.0.0.2:25565".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(h.len(), 28);
        assert_eq!(&h[..12], &V2_SIGNATURE);
        assert_eq!(h[12], V2_COMMAND_PROXY);
        assert_eq!(h[13], V2_FAMILY_TCP4);
        assert_eq!(u16::from_be_bytes([h[14], h[15]]), V2_ADDR_LEN_TCP4);
        assert_eq!(&h[16..20], &[192, 168, 1, 9]);
        assert_eq!(&h[20..24], &[10, 0, 0, 2]);
        assert_eq!(u16::from_be_bytes([h[24], h[25]]), 51234);
        assert_eq!(u16::from_be_bytes([h[26], h[27]]), 25565);
    }

    #[test]
    fn v2_binary_form_tcp6() {
        let h = encode(
            PreambleVersion::V2,
            "[2001:db8::1]:51234".parse().unwrap(),
            "[2001:db8::2]:25565".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(h.len(), 52);
        assert_eq!(h[13], V2_FAMILY_TCP6);
        assert_eq!(u16::from_be_bytes([h[14], h[15]]), V2_ADDR_LEN_TCP6);
    }

    #[test]
    fn mixed_families_are_refused() {
        let err = encode(
            PreambleVersion::V2,
            "192.168.1.9:51234".parse().unwrap(),
            "[2001:db8::2]:25565".parse().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, PreambleError::MixedFamilies { .. }));
    }
}
