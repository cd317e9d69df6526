//! Client side of the SBEFIFO command channel.
//!
//! A request is written to the FIFO device in one go and the whole reply is
//! read back in one go. Replies end with a trailer:
//!
//! ```text
//! | payload | 0xC0DE0000 | cmd | status | ffdc ... | offset |
//!           ^-------------- offset words ----------^
//! ```
//!
//! `offset` is a big endian word count from the end of the reply back to the
//! header. A non-zero status carries first failure data (FFDC), which is kept
//! in the context until the next operation.

use std::io::{self, Read, Write};

use scroll::{Pread, BE};

/// Room reserved for first failure data on top of the expected reply.
const MAX_FFDC_SIZE: usize = 0x2000;

/// Magic in the upper half of the reply header.
const HEADER_MAGIC: u32 = 0xC0DE_0000;

/// Header, status and offset words.
const MIN_REPLY_LEN: usize = 3 * 4;

/// Errors of a SBEFIFO operation.
#[derive(thiserror::Error, Debug)]
pub enum SbefifoError {
    /// The FIFO device failed.
    #[error("SBEFIFO device error")]
    Io(#[from] io::Error),
    /// There is nothing to send.
    #[error("Refusing to send an empty request")]
    EmptyRequest,
    /// The device accepted only part of the request.
    #[error("Short write to the SBEFIFO: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted.
        written: usize,
        /// Bytes in the request.
        expected: usize,
    },
    /// The expected reply size does not fit into memory.
    #[error("Can not allocate a SBEFIFO reply buffer for {0} bytes")]
    ReplyTooLarge(usize),
    /// The reply can not hold header, status and offset.
    #[error("SBEFIFO reply of {0} bytes is too short")]
    ShortReply(usize),
    /// The trailer points outside the reply.
    #[error("SBEFIFO reply of {len} bytes has an invalid header offset of {words} words")]
    BadOffset {
        /// Length of the reply.
        len: usize,
        /// The offset found in the trailer.
        words: u32,
    },
    /// The reply does not answer the request.
    #[error("Expected SBEFIFO header {expected:#010x}, found {found:#010x}")]
    BadHeader {
        /// The header belonging to the request.
        expected: u32,
        /// The header in the reply.
        found: u32,
    },
    /// The reply could not be decoded.
    #[error("Malformed SBEFIFO reply")]
    Malformed(#[from] scroll::Error),
    /// The SBE failed the request. The FFDC is available from the context.
    #[error("SBE reported status {0:#010x}")]
    Status(u32),
}

/// First failure data of the last failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ffdc {
    /// The status word of the reply.
    pub status: u32,
    /// The data following the status word.
    pub data: Vec<u8>,
}

/// A connection to one SBEFIFO device.
#[derive(Debug)]
pub struct SbefifoContext<D> {
    device: D,
    ffdc: Option<Ffdc>,
}

impl<D: Read + Write> SbefifoContext<D> {
    /// Wraps an opened FIFO device.
    pub fn new(device: D) -> Self {
        Self { device, ffdc: None }
    }

    /// The first failure data of the last operation, if it failed in the SBE.
    pub fn ffdc(&self) -> Option<&Ffdc> {
        self.ffdc.as_ref()
    }

    /// The underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Consumes the context, returning the device.
    pub fn into_inner(self) -> D {
        self.device
    }

    /// Sends `msg` as command `cmd` and returns the reply payload.
    ///
    /// `expected_len` is a hint for the payload size, the reply buffer is
    /// sized from it.
    pub fn operation(&mut self, msg: &[u8], cmd: u16, expected_len: usize) -> Result<Vec<u8>, SbefifoError> {
        self.ffdc = None;

        if msg.is_empty() {
            return Err(SbefifoError::EmptyRequest);
        }

        let buflen = expected_len
            .checked_add(MAX_FFDC_SIZE + 3)
            .map(|len| len & !3)
            .ok_or(SbefifoError::ReplyTooLarge(expected_len))?;
        let mut buf = vec![0u8; buflen];

        tracing::debug!("request: cmd={:#06x}, len={}", cmd, msg.len());

        let written = self.device.write(msg)?;
        if written != msg.len() {
            return Err(SbefifoError::ShortWrite {
                written,
                expected: msg.len(),
            });
        }

        let len = self.device.read(&mut buf)?;
        buf.truncate(len);

        if len < MIN_REPLY_LEN {
            tracing::debug!("reply: cmd={:#06x}, len={}", cmd, len);
            return Err(SbefifoError::ShortReply(len));
        }

        let words: u32 = buf.pread_with(len - 4, BE)?;
        let offset = (words as usize)
            .checked_mul(4)
            .filter(|&back| back >= MIN_REPLY_LEN && back <= len)
            .map(|back| len - back)
            .ok_or(SbefifoError::BadOffset { len, words })?;

        let header: u32 = buf.pread_with(offset, BE)?;
        let status: u32 = buf.pread_with(offset + 4, BE)?;

        let expected = HEADER_MAGIC | u32::from(cmd);
        if header != expected {
            tracing::debug!("reply: cmd={:#06x}, len={}, header={:#010x}", cmd, len, header);
            return Err(SbefifoError::BadHeader {
                expected,
                found: header,
            });
        }

        tracing::debug!("reply: cmd={:#06x}, len={}, status={:#010x}", cmd, len, status);

        if status != 0 {
            self.ffdc = Some(Ffdc {
                status,
                data: buf[offset + 8..len - 4].to_vec(),
            });
            return Err(SbefifoError::Status(status));
        }

        buf.truncate(offset);
        Ok(buf)
    }
}
