//! Primitive read/write operations shared by both IPC endpoints: a `u32`
//! length-prefixed frame wrapping little-endian integers and
//! length-prefixed strings. Kept as free functions over any
//! `AsyncRead`/`AsyncWrite` rather than a `Codec` trait object, since every
//! caller already knows at compile time whether it's reading a request or a
//! reply.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame this process will allocate a buffer for. Generous enough
/// for any message this protocol defines (the largest is a hostid list),
/// small enough that a corrupt length prefix can't be used to exhaust
/// memory.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame length {0} exceeds max {MAX_FRAME_LEN}")]
    FrameTooLarge(u32),
    #[error("unknown message code {0}")]
    UnknownCode(u8),
    #[error("truncated message: expected more bytes for {0}")]
    Truncated(&'static str),
    #[error("string field was not valid utf-8")]
    InvalidUtf8,
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Reads one length-prefixed frame into an owned buffer.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u32_le().await?;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes `payload` as one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> Result<()> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| CodecError::FrameTooLarge(u32::MAX))?;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }
    w.write_u32_le(len).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// A cursor over an in-memory frame buffer, used by each message type's
/// `decode` to walk the payload after `read_frame` hands it over.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(CodecError::Truncated(field))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32> {
        let bytes = self.take(4, field)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn u64(&mut self, field: &'static str) -> Result<u64> {
        let bytes = self.take(8, field)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn i32(&mut self, field: &'static str) -> Result<i32> {
        Ok(self.u32(field)? as i32)
    }

    pub fn string(&mut self, field: &'static str) -> Result<String> {
        let len = self.u32(field)? as usize;
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated(field))?;
        let slice = self.buf.get(self.pos..end).ok_or(CodecError::Truncated(field))?;
        self.pos = end;
        Ok(slice)
    }
}

/// A growable little-endian payload builder, the write-side counterpart of
/// [`Reader`].
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.u32(v as u32)
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
