use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("var-int spans more than 5 bytes")]
    VarIntTooLarge,
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
}

const VAR_INT_SEGMENT_BITS: u8 = 0x7F;
const VAR_INT_CONTINUE_BIT: u8 = 0x80;

/// Big-endian byte reader over any `AsyncRead` (a socket or an in-memory
/// packet body alike), with single-byte lookahead and a consumed-bytes
/// counter.
///
/// `peek_u8` buffers at most one byte; the buffered byte is handed back by
/// the next read, so the counter only advances when bytes are actually
/// consumed.
pub struct ByteReader<R> {
    inner: R,
    peeked: Option<u8>,
    consumed: usize,
}

impl<R: AsyncRead + Unpin> ByteReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            peeked: None,
            consumed: 0,
        }
    }

    /// Bytes consumed so far. Peeked-but-unread bytes are not counted.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Returns the next byte without consuming it. Idempotent until the next
    /// read.
    pub async fn peek_u8(&mut self) -> Result<u8, CodecError> {
        if let Some(b) = self.peeked {
            return Ok(b);
        }
        let b = self.inner.read_u8().await?;
        self.peeked = Some(b);
        Ok(b)
    }

    /// Reads exactly `n` bytes; a short read is an error.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; n];
        let mut off = 0;
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            off = 1;
        }
        self.inner.read_exact(&mut buf[off..]).await?;
        self.consumed += n;
        Ok(buf)
    }

    pub async fn read_u8(&mut self) -> Result<u8, CodecError> {
        let b = self.read_exact(1).await?;
        Ok(b[0])
    }

    pub async fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.read_exact(2).await?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub async fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.read_u16().await? as i16)
    }

    pub async fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.read_exact(4).await?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub async fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_u32().await? as i32)
    }

    /// 7-bit little-endian groups with an MSB continuation bit, at most 5
    /// bytes for a 32-bit value.
    pub async fn read_var_int(&mut self) -> Result<i32, CodecError> {
        let mut value: i32 = 0;
        let mut position = 0;
        loop {
            let b = self.read_u8().await?;
            value |= ((b & VAR_INT_SEGMENT_BITS) as i32) << position;
            if b & VAR_INT_CONTINUE_BIT == 0 {
                break;
            }
            position += 7;
            if position >= 32 {
                return Err(CodecError::VarIntTooLarge);
            }
        }
        Ok(value)
    }

    /// Var-int byte length, then that many bytes. The bytes are taken as
    /// UTF-8 without further validation (lossy conversion).
    pub async fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_var_int().await?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        let b = self.read_exact(len as usize).await?;
        Ok(String::from_utf8_lossy(&b).into_owned())
    }

    /// i16 code-unit count, then 2x count bytes decoded as UTF-16BE.
    pub async fn read_utf16_be_string(&mut self) -> Result<String, CodecError> {
        let count = self.read_i16().await?;
        if count < 0 {
            return Err(CodecError::NegativeLength(count as i32));
        }
        let b = self.read_exact(count as usize * 2).await?;
        let units: Vec<u16> = b
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Big-endian byte encoder backed by a growable buffer. Writes are
/// infallible; the buffer is pushed to the destination socket in one
/// `flush_to` so captured bytes never trail behind a downstream write.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes encoded so far.
    pub fn written(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn put_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i16(&mut self, v: i16) {
        self.put_u16(v as u16);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put_u32(v as u32);
    }

    /// Minimal-length var-int encoding. Negative values take the full 5
    /// bytes (the logical right shift drags the sign bit out).
    pub fn put_var_int(&mut self, mut v: i32) {
        loop {
            if v & !(VAR_INT_SEGMENT_BITS as i32) == 0 {
                self.buf.push(v as u8);
                return;
            }
            self.buf
                .push((v as u8 & VAR_INT_SEGMENT_BITS) | VAR_INT_CONTINUE_BIT);
            v = ((v as u32) >> 7) as i32;
        }
    }

    pub fn put_string(&mut self, s: &str) {
        self.put_var_int(s.len() as i32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_utf16_be_string(&mut self, s: &str) {
        let units: Vec<u16> = s.encode_utf16().collect();
        self.put_i16(units.len() as i16);
        for u in units {
            self.buf.extend_from_slice(&u.to_be_bytes());
        }
    }

    /// Writes the buffered bytes to `w` and flushes it, clearing the buffer.
    pub async fn flush_to<W: AsyncWrite + Unpin>(&mut self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.buf).await?;
        w.flush().await?;
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_back_var_int(bytes: &[u8]) -> Result<i32, CodecError> {
        let mut r = ByteReader::new(bytes);
        r.read_var_int().await
    }

    #[tokio::test]
    async fn var_int_round_trip_and_lengths() {
        let cases: &[(i32, usize)] = &[
            (0, 1),
            (1, 1),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            (2097151, 3),
            (2097152, 4),
            (268435455, 4),
            (268435456, 5),
            (i32::MAX, 5),
            (-1, 5),
        ];
        for &(v, len) in cases {
            let mut w = ByteWriter::new();
            w.put_var_int(v);
            assert_eq!(w.written(), len, "encoding length of {v}");
            assert_eq!(read_back_var_int(w.as_bytes()).await.unwrap(), v);
        }
    }

    #[tokio::test]
    async fn var_int_overflow_is_rejected() {
        let err = read_back_var_int(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF])
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::VarIntTooLarge));
    }

    #[tokio::test]
    async fn string_round_trip() {
        for s in ["", "mc.example.com", "héllo wörld", "地图"] {
            let mut w = ByteWriter::new();
            w.put_string(s);
            let mut r = ByteReader::new(w.as_bytes());
            assert_eq!(r.read_string().await.unwrap(), s);
            assert_eq!(r.consumed(), w.written());
        }
    }

    #[tokio::test]
    async fn utf16_be_round_trip() {
        for s in ["", "MC|PingHost", "mc.example.com", "ünïcødé"] {
            let mut w = ByteWriter::new();
            w.put_utf16_be_string(s);
            let mut r = ByteReader::new(w.as_bytes());
            assert_eq!(r.read_utf16_be_string().await.unwrap(), s);
        }
    }

    #[tokio::test]
    async fn peek_is_idempotent_and_uncounted() {
        let data = [0xFE, 0x01, 0xFA];
        let mut r = ByteReader::new(&data[..]);
        assert_eq!(r.peek_u8().await.unwrap(), 0xFE);
        assert_eq!(r.peek_u8().await.unwrap(), 0xFE);
        assert_eq!(r.consumed(), 0);
        assert_eq!(r.read_u8().await.unwrap(), 0xFE);
        assert_eq!(r.consumed(), 1);
        assert_eq!(r.read_u8().await.unwrap(), 0x01);
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        let mut r = ByteReader::new(&[0x01, 0x02][..]);
        assert!(r.read_u32().await.is_err());
    }

    #[tokio::test]
    async fn fixed_width_round_trip() {
        let mut w = ByteWriter::new();
        w.put_u8(0xAB);
        w.put_u16(0x1234);
        w.put_i16(-2);
        w.put_u32(0xDEADBEEF);
        w.put_i32(-65536);
        let mut r = ByteReader::new(w.as_bytes());
        assert_eq!(r.read_u8().await.unwrap(), 0xAB);
        assert_eq!(r.read_u16().await.unwrap(), 0x1234);
        assert_eq!(r.read_i16().await.unwrap(), -2);
        assert_eq!(r.read_u32().await.unwrap(), 0xDEADBEEF);
        assert_eq!(r.read_i32().await.unwrap(), -65536);
    }
}
