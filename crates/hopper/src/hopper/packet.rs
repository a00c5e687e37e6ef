use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::hopper::codec::{ByteReader, ByteWriter, CodecError};

/// Handshake state, C2S.
pub const HANDSHAKE_PACKET_ID: i32 = 0x00;
/// Login state, S2C.
pub const DISCONNECT_PACKET_ID: i32 = 0x00;

pub const NEXT_STATE_STATUS: i32 = 1;
pub const NEXT_STATE_LOGIN: i32 = 2;

/// First byte of a legacy server-list ping. A modern frame starting with
/// 0xFE would declare a body of 254+ bytes, far larger than any real
/// handshake, so the byte reliably marks the legacy form.
const LEGACY_PING_HEAD: u8 = 0xFE;

/// `FE 01 FA`, then the UTF-16BE string "MC|PingHost" with its i16
/// code-unit count. Fixed for every 1.6-era client.
pub(crate) const LEGACY_PING_MAGIC: [u8; 27] = [
    0xFE, 0x01, 0xFA, 0x00, 0x0B, 0x00, 0x4D, 0x00, 0x43, 0x00, 0x7C, 0x00, 0x50, 0x00, 0x69,
    0x00, 0x6E, 0x00, 0x67, 0x00, 0x48, 0x00, 0x6F, 0x00, 0x73, 0x00, 0x74,
];

#[derive(Debug, Error)]
pub enum PacketError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unexpected packet id {got}, should be handshake packet id {expected}")]
    UnexpectedPacketId { got: i32, expected: i32 },
    #[error("packet field length mismatch: total len {declared}, read len {read}")]
    LengthMismatch { declared: i32, read: usize },
    #[error("legacy ping header mismatch")]
    BadLegacyHeader,
    #[error("legacy ping port {0} out of range")]
    PortOutOfRange(i32),
}

/// The first client packet, in either of its two wire forms.
///
/// The legacy form is read-only: forwarding always re-serializes the modern
/// layout. Only the modern form carries a next-state discriminator, so
/// disconnect packets can only ever answer a modern handshake.
#[derive(Debug, Clone)]
pub enum Handshake {
    Modern(ModernHandshake),
    Legacy(LegacyPing),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModernHandshake {
    pub protocol: i32,
    pub hostname: String,
    pub port: u16,
    pub next_state: i32,
}

/// Pre-1.7 server-list ping. `protocol` is a single byte and there is no
/// next-state field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPing {
    pub protocol: u8,
    pub hostname: String,
    pub port: u16,
}

impl Handshake {
    pub fn hostname(&self) -> &str {
        match self {
            Handshake::Modern(p) => &p.hostname,
            Handshake::Legacy(p) => &p.hostname,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Handshake::Modern(p) => p.port,
            Handshake::Legacy(p) => p.port,
        }
    }

    pub fn set_hostname(&mut self, hostname: String) {
        match self {
            Handshake::Modern(p) => p.hostname = hostname,
            Handshake::Legacy(p) => p.hostname = hostname,
        }
    }

    pub fn set_port(&mut self, port: u16) {
        match self {
            Handshake::Modern(p) => p.port = port,
            Handshake::Legacy(p) => p.port = port,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Handshake::Legacy(_))
    }

    /// `None` for the legacy form.
    pub fn next_state(&self) -> Option<i32> {
        match self {
            Handshake::Modern(p) => Some(p.next_state),
            Handshake::Legacy(_) => None,
        }
    }
}

/// Reads the initial client packet, discriminating on a one-byte peek.
///
/// The peek buffer never holds stale data afterwards: both forms consume at
/// least the peeked byte.
pub async fn read_handshake<R: AsyncRead + Unpin>(
    r: &mut ByteReader<R>,
) -> Result<Handshake, PacketError> {
    let head = r.peek_u8().await?;
    if head == LEGACY_PING_HEAD {
        read_legacy_ping(r).await.map(Handshake::Legacy)
    } else {
        read_modern_handshake(r).await.map(Handshake::Modern)
    }
}

async fn read_modern_handshake<R: AsyncRead + Unpin>(
    r: &mut ByteReader<R>,
) -> Result<ModernHandshake, PacketError> {
    let packet_len = r.read_var_int().await?;
    if packet_len < 0 {
        return Err(CodecError::NegativeLength(packet_len).into());
    }
    let body = r.read_exact(packet_len as usize).await?;
    let mut body_reader = ByteReader::new(body.as_slice());

    let packet_id = body_reader.read_var_int().await?;
    if packet_id != HANDSHAKE_PACKET_ID {
        return Err(PacketError::UnexpectedPacketId {
            got: packet_id,
            expected: HANDSHAKE_PACKET_ID,
        });
    }

    let protocol = body_reader.read_var_int().await?;
    let hostname = body_reader.read_string().await?;
    let port = body_reader.read_u16().await?;
    let next_state = body_reader.read_var_int().await?;

    if body_reader.consumed() != packet_len as usize {
        return Err(PacketError::LengthMismatch {
            declared: packet_len,
            read: body_reader.consumed(),
        });
    }

    Ok(ModernHandshake {
        protocol,
        hostname,
        port,
        next_state,
    })
}

async fn read_legacy_ping<R: AsyncRead + Unpin>(
    r: &mut ByteReader<R>,
) -> Result<LegacyPing, PacketError> {
    let head = r.read_exact(LEGACY_PING_MAGIC.len()).await?;
    if head != LEGACY_PING_MAGIC {
        return Err(PacketError::BadLegacyHeader);
    }

    // Declared length of the rest of the packet; clients are not consistent
    // about it, so it is read and ignored.
    let _remaining_len = r.read_i16().await?;

    let protocol = r.read_u8().await?;
    let hostname = r.read_utf16_be_string().await?;
    let port = r.read_i32().await?;
    if !(0..=i32::from(u16::MAX)).contains(&port) {
        return Err(PacketError::PortOutOfRange(port));
    }

    Ok(LegacyPing {
        protocol,
        hostname,
        port: port as u16,
    })
}

/// Serializes the handshake in the modern layout and flushes it to `w`.
///
/// A legacy handshake is promoted: its one-byte protocol widens and the
/// next-state becomes `status`, which is what a server-list ping asks for.
pub async fn write_handshake<W: AsyncWrite + Unpin>(
    w: &mut W,
    handshake: &Handshake,
) -> io::Result<()> {
    let (protocol, hostname, port, next_state) = match handshake {
        Handshake::Modern(p) => (p.protocol, p.hostname.as_str(), p.port, p.next_state),
        Handshake::Legacy(p) => (
            i32::from(p.protocol),
            p.hostname.as_str(),
            p.port,
            NEXT_STATE_STATUS,
        ),
    };

    let mut body = ByteWriter::new();
    body.put_var_int(HANDSHAKE_PACKET_ID);
    body.put_var_int(protocol);
    body.put_string(hostname);
    body.put_u16(port);
    body.put_var_int(next_state);
    write_framed(w, body).await
}

/// Modern disconnect packet for the login state, carrying a JSON reason.
pub async fn write_disconnect<W: AsyncWrite + Unpin>(
    w: &mut W,
    reason_json: &str,
) -> io::Result<()> {
    let mut body = ByteWriter::new();
    body.put_var_int(DISCONNECT_PACKET_ID);
    body.put_string(reason_json);
    write_framed(w, body).await
}

async fn write_framed<W: AsyncWrite + Unpin>(w: &mut W, body: ByteWriter) -> io::Result<()> {
    let mut out = ByteWriter::new();
    out.put_var_int(body.written() as i32);
    out.put_bytes(body.as_bytes());
    out.flush_to(w).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_modern(host: &str, port: u16, protocol: i32, next_state: i32) -> Vec<u8> {
        let mut body = ByteWriter::new();
        body.put_var_int(HANDSHAKE_PACKET_ID);
        body.put_var_int(protocol);
        body.put_string(host);
        body.put_u16(port);
        body.put_var_int(next_state);

        let mut out = ByteWriter::new();
        out.put_var_int(body.written() as i32);
        out.put_bytes(body.as_bytes());
        out.as_bytes().to_vec()
    }

    fn build_legacy(host: &str, port: i32, protocol: u8) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_bytes(&LEGACY_PING_MAGIC);
        let mut rest = ByteWriter::new();
        rest.put_u8(protocol);
        rest.put_utf16_be_string(host);
        rest.put_i32(port);
        w.put_i16(rest.written() as i16);
        w.put_bytes(rest.as_bytes());
        w.as_bytes().to_vec()
    }

    async fn parse(data: &[u8]) -> Result<Handshake, PacketError> {
        let mut r = ByteReader::new(data);
        read_handshake(&mut r).await
    }

    #[tokio::test]
    async fn modern_handshake_parses() {
        let data = build_modern("mc.example.com", 25565, 763, NEXT_STATE_LOGIN);
        let hs = parse(&data).await.unwrap();
        assert!(!hs.is_legacy());
        assert_eq!(hs.hostname(), "mc.example.com");
        assert_eq!(hs.port(), 25565);
        assert_eq!(hs.next_state(), Some(NEXT_STATE_LOGIN));
    }

    #[tokio::test]
    async fn modern_rejects_unexpected_packet_id() {
        let mut body = ByteWriter::new();
        body.put_var_int(0x01);
        body.put_var_int(763);
        body.put_string("mc.example.com");
        body.put_u16(25565);
        body.put_var_int(1);
        let mut out = ByteWriter::new();
        out.put_var_int(body.written() as i32);
        out.put_bytes(body.as_bytes());

        let err = parse(out.as_bytes()).await.unwrap_err();
        assert!(matches!(err, PacketError::UnexpectedPacketId { got: 1, .. }));
    }

    #[tokio::test]
    async fn modern_rejects_length_mismatch() {
        let mut data = build_modern("mc.example.com", 25565, 763, 1);
        // Declare one extra byte and append it; body parsing then stops short
        // of the declared frame end.
        data[0] += 1;
        data.push(0x00);
        let err = parse(&data).await.unwrap_err();
        assert!(matches!(err, PacketError::LengthMismatch { .. }));
    }

    #[tokio::test]
    async fn legacy_ping_parses() {
        let data = build_legacy("example.com", 25565, 74);
        let hs = parse(&data).await.unwrap();
        assert!(hs.is_legacy());
        assert_eq!(hs.hostname(), "example.com");
        assert_eq!(hs.port(), 25565);
        assert_eq!(hs.next_state(), None);
    }

    #[tokio::test]
    async fn legacy_rejects_bad_magic() {
        let mut data = build_legacy("example.com", 25565, 74);
        data[4] = 0x0C;
        let err = parse(&data).await.unwrap_err();
        assert!(matches!(err, PacketError::BadLegacyHeader));
    }

    #[tokio::test]
    async fn legacy_rejects_out_of_range_port() {
        let err = parse(&build_legacy("example.com", 65536, 74))
            .await
            .unwrap_err();
        assert!(matches!(err, PacketError::PortOutOfRange(65536)));

        let err = parse(&build_legacy("example.com", -1, 74)).await.unwrap_err();
        assert!(matches!(err, PacketError::PortOutOfRange(-1)));
    }

    #[tokio::test]
    async fn rewrite_reserializes_byte_exact() {
        let mut hs = parse(&build_modern("a.example.com\u{0}FML3", 7777, 763, 2))
            .await
            .unwrap();
        hs.set_hostname("real.host\u{0}FML3".into());
        hs.set_port(20001);

        let mut out = Vec::new();
        write_handshake(&mut out, &hs).await.unwrap();
        assert_eq!(out, build_modern("real.host\u{0}FML3", 20001, 763, 2));
    }

    #[tokio::test]
    async fn legacy_forwards_as_modern_status() {
        let hs = parse(&build_legacy("example.com", 25565, 74)).await.unwrap();
        let mut out = Vec::new();
        write_handshake(&mut out, &hs).await.unwrap();
        assert_eq!(out, build_modern("example.com", 25565, 74, NEXT_STATE_STATUS));
    }

    #[tokio::test]
    async fn disconnect_packet_layout() {
        let mut out = Vec::new();
        write_disconnect(&mut out, r#"{"text":"no"}"#).await.unwrap();

        let mut r = ByteReader::new(out.as_slice());
        let len = r.read_var_int().await.unwrap();
        let body = r.read_exact(len as usize).await.unwrap();
        let mut br = ByteReader::new(body.as_slice());
        assert_eq!(br.read_var_int().await.unwrap(), DISCONNECT_PACKET_ID);
        assert_eq!(br.read_string().await.unwrap(), r#"{"text":"no"}"#);
        assert_eq!(br.consumed(), len as usize);
    }
}
