//! Versioned serialization envelope
//!
//! Every stored item is prefixed with a 4-byte big-endian header: the high
//! bit flags an item that was deleted while it was being backed up, the low
//! 16 bits hold the format version, and the bits in between are reserved.
//! A deleted item never carries a payload.

use std::io::{self, Read};
use thiserror::Error;

/// Length of the header in bytes
pub const HEADER_LEN: usize = 4;

const DELETED_FLAG: u32 = 1 << 31;
const VERSION_MASK: u32 = 0x0000_FFFF;

/// Serialization envelope errors
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("item deleted in flight cannot carry a payload")]
    DeletedWithPayload,

    #[error("envelope header truncated: got {0} of 4 bytes")]
    TruncatedHeader(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for envelope operations
pub type SerializationResult<T> = Result<T, SerializationError>;

/// Header contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SerializationFormat {
    pub version: u16,
    pub deleted_in_flight: bool,
}

impl SerializationFormat {
    /// Format for a live item
    pub fn new(version: u16) -> Self {
        Self {
            version,
            deleted_in_flight: false,
        }
    }

    /// Format for an item deleted while it was being read
    pub fn deleted(version: u16) -> Self {
        Self {
            version,
            deleted_in_flight: true,
        }
    }

    /// Encodes the header
    pub fn to_header(&self) -> [u8; HEADER_LEN] {
        let mut word = u32::from(self.version);
        if self.deleted_in_flight {
            word |= DELETED_FLAG;
        }
        word.to_be_bytes()
    }

    /// Decodes a header, ignoring reserved bits
    pub fn from_header(header: [u8; HEADER_LEN]) -> Self {
        let word = u32::from_be_bytes(header);
        Self {
            version: (word & VERSION_MASK) as u16,
            deleted_in_flight: word & DELETED_FLAG != 0,
        }
    }
}

/// Prefixes `payload` with the header for `format`
pub fn encode(format: SerializationFormat, payload: &[u8]) -> SerializationResult<Vec<u8>> {
    if format.deleted_in_flight && !payload.is_empty() {
        return Err(SerializationError::DeletedWithPayload);
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&format.to_header());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Splits encoded bytes into the format and the payload
pub fn decode(bytes: &[u8]) -> SerializationResult<(SerializationFormat, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(SerializationError::TruncatedHeader(bytes.len()));
    }

    let (header, payload) = bytes.split_at(HEADER_LEN);
    let mut fixed = [0u8; HEADER_LEN];
    fixed.copy_from_slice(header);
    Ok((SerializationFormat::from_header(fixed), payload))
}

/// Reader that emits the header followed by the payload
pub struct VersionedBackupReader<R> {
    header: [u8; HEADER_LEN],
    written: usize,
    payload: Option<R>,
}

impl<R: Read> VersionedBackupReader<R> {
    /// Creates the reader; a deleted item must not be given a payload
    pub fn new(format: SerializationFormat, payload: Option<R>) -> SerializationResult<Self> {
        if format.deleted_in_flight && payload.is_some() {
            return Err(SerializationError::DeletedWithPayload);
        }

        Ok(Self {
            header: format.to_header(),
            written: 0,
            payload,
        })
    }
}

impl<R: Read> Read for VersionedBackupReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.written < HEADER_LEN {
            let n = (HEADER_LEN - self.written).min(buf.len());
            buf[..n].copy_from_slice(&self.header[self.written..self.written + n]);
            self.written += n;
            return Ok(n);
        }

        match self.payload.as_mut() {
            Some(payload) => payload.read(buf),
            None => Ok(0),
        }
    }
}

/// Reader that strips and parses the header before yielding the payload
pub struct VersionedRestoreReader<R> {
    format: SerializationFormat,
    inner: R,
}

impl<R: Read> VersionedRestoreReader<R> {
    /// Reads the header from `inner`
    pub fn new(mut inner: R) -> SerializationResult<Self> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            match inner.read(&mut header[filled..]) {
                Ok(0) => return Err(SerializationError::TruncatedHeader(filled)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self {
            format: SerializationFormat::from_header(header),
            inner,
        })
    }

    /// Parsed header
    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Returns the underlying reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for VersionedRestoreReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
