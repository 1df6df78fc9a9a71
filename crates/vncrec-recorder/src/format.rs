// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Binary recording format
//
// A recording is a plain sequence of frame records with no file-level header or footer:
//   flag:u8 (1 = from client, 0 = from server) | timestamp_ms:u32 | length:u32 | payload
// All integers are big-endian.
//
// Container packages bundle an event transcript with a video track:
//   json_length:u32 | json (UTF-8) | video (remaining bytes)

pub mod transcript;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// Size of the frame record header in bytes
pub const FRAME_HEADER_SIZE: usize = 9;

/// Direction flags
pub const FLAG_SERVER: u8 = 0;
pub const FLAG_CLIENT: u8 = 1;

/// Size of the container JSON length prefix
pub const CONTAINER_PREFIX_SIZE: usize = 4;

/// Fixed 9-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub from_client: bool,
    /// Milliseconds since recording start
    pub timestamp_ms: u32,
    /// Payload length in bytes
    pub len: u32,
}

impl FrameHeader {
    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u8(if self.from_client { FLAG_CLIENT } else { FLAG_SERVER })?;
        w.write_u32::<BigEndian>(self.timestamp_ms)?;
        w.write_u32::<BigEndian>(self.len)?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
        let flag = r.read_u8()?;
        let timestamp_ms = r.read_u32::<BigEndian>()?;
        let len = r.read_u32::<BigEndian>()?;
        Ok(Self {
            from_client: flag == FLAG_CLIENT,
            timestamp_ms,
            len,
        })
    }

    /// Parse a header from the start of `buf`, if enough bytes are present
    pub fn peek(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            from_client: buf[0] == FLAG_CLIENT,
            timestamp_ms: BigEndian::read_u32(&buf[1..5]),
            len: BigEndian::read_u32(&buf[5..9]),
        })
    }
}

/// One captured protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub from_client: bool,
    /// Milliseconds since recording start, non-decreasing within a recording
    pub timestamp_ms: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(from_client: bool, timestamp_ms: u32, payload: Vec<u8>) -> Self {
        Self {
            from_client,
            timestamp_ms,
            payload,
        }
    }

    pub fn server(timestamp_ms: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(false, timestamp_ms, payload.into())
    }

    pub fn client(timestamp_ms: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(true, timestamp_ms, payload.into())
    }

    pub fn header(&self) -> io::Result<FrameHeader> {
        let len = u32::try_from(self.payload.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Frame payload too large: {} bytes", self.payload.len()),
            )
        })?;
        Ok(FrameHeader {
            from_client: self.from_client,
            timestamp_ms: self.timestamp_ms,
            len,
        })
    }

    /// Serialized size of this frame record
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        self.header()?.write_to(&mut w)?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
        let header = FrameHeader::read_from(&mut r)?;
        let mut payload = vec![0u8; header.len as usize];
        r.read_exact(&mut payload)?;
        Ok(Self::new(header.from_client, header.timestamp_ms, payload))
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

/// Outcome of a resumable decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecode {
    /// A complete frame was decoded from the first `consumed` bytes
    Frame { frame: Frame, consumed: usize },
    /// At least `needed` more bytes must arrive before a frame can be decoded
    Incomplete { needed: usize },
}

/// Attempt to decode one frame from the start of `buf`
///
/// Never consumes partial data: an incomplete header or payload is reported as
/// `Incomplete` and the caller retries once more bytes are buffered.
pub fn decode_frame(buf: &[u8]) -> FrameDecode {
    let Some(header) = FrameHeader::peek(buf) else {
        return FrameDecode::Incomplete {
            needed: FRAME_HEADER_SIZE - buf.len(),
        };
    };

    let total = FRAME_HEADER_SIZE + header.len as usize;
    if buf.len() < total {
        return FrameDecode::Incomplete {
            needed: total - buf.len(),
        };
    }

    FrameDecode::Frame {
        frame: Frame::new(
            header.from_client,
            header.timestamp_ms,
            buf[FRAME_HEADER_SIZE..total].to_vec(),
        ),
        consumed: total,
    }
}

/// Serialize a frame sequence into the binary recording format
pub fn write_frames<W: Write>(frames: &[Frame], mut w: W) -> io::Result<()> {
    for frame in frames {
        frame.write_to(&mut w)?;
    }
    Ok(())
}

/// Bundle JSON and video bytes into a container package
pub fn pack_container(json: &[u8], video: &[u8]) -> Result<Vec<u8>> {
    let json_len = u32::try_from(json.len()).map_err(|_| Error::InvalidContainer {
        message: format!("JSON section too large: {} bytes", json.len()),
    })?;

    let mut buf = Vec::with_capacity(CONTAINER_PREFIX_SIZE + json.len() + video.len());
    buf.write_u32::<BigEndian>(json_len)?;
    buf.extend_from_slice(json);
    buf.extend_from_slice(video);
    Ok(buf)
}

/// Split a container package into its JSON and video sections
pub fn unpack_container(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    if bytes.len() < CONTAINER_PREFIX_SIZE {
        return Err(Error::InvalidContainer {
            message: format!("package is only {} bytes long", bytes.len()),
        });
    }

    let json_len = BigEndian::read_u32(&bytes[..CONTAINER_PREFIX_SIZE]) as usize;
    let rest = &bytes[CONTAINER_PREFIX_SIZE..];
    if json_len > rest.len() {
        return Err(Error::InvalidContainer {
            message: format!(
                "declared JSON length {} exceeds remaining {} bytes",
                json_len,
                rest.len()
            ),
        });
    }

    Ok(rest.split_at(json_len))
}
