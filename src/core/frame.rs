// GQTP frame header layout (24 bytes, big-endian) and request framing helpers.
use bytes::{BufMut, Bytes, BytesMut};

use crate::core::error::{Error, ErrorKind};

pub const PROTOCOL: u8 = 0xc7;
pub const FRAME_HEADER_LEN: usize = 24;
pub const MAX_BODY_ABS: usize = 1024 * 1024 * 1024;

pub const FLAG_MORE: u8 = 0x01;
pub const FLAG_TAIL: u8 = 0x02;
pub const FLAG_HEAD: u8 = 0x04;
pub const FLAG_QUIET: u8 = 0x08;
pub const FLAG_QUIT: u8 = 0x10;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum QueryType {
    #[default]
    None = 0,
    Tsv = 1,
    Json = 2,
    Xml = 3,
    Msgpack = 4,
}

impl QueryType {
    fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(QueryType::None),
            1 => Ok(QueryType::Tsv),
            2 => Ok(QueryType::Json),
            3 => Ok(QueryType::Xml),
            4 => Ok(QueryType::Msgpack),
            _ => Err(Error::new(ErrorKind::InvalidResponse)
                .with_message(format!("unknown gqtp query type: {value}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FrameHeader {
    pub query_type: QueryType,
    pub key_length: u16,
    pub level: u8,
    pub flags: u8,
    pub status: u16,
    pub size: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl FrameHeader {
    pub fn request(size: u32) -> Self {
        Self {
            flags: FLAG_TAIL,
            size,
            ..Self::default()
        }
    }

    /// Server status reinterpreted as the signed return code used in headers.
    pub fn return_code(&self) -> i64 {
        i64::from(self.status as i16)
    }

    pub fn has_more(&self) -> bool {
        self.flags & FLAG_MORE != 0
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0] = PROTOCOL;
        buf[1] = self.query_type as u8;
        write_u16(&mut buf, 2, self.key_length);
        buf[4] = self.level;
        buf[5] = self.flags;
        write_u16(&mut buf, 6, self.status);
        write_u32(&mut buf, 8, self.size);
        write_u32(&mut buf, 12, self.opaque);
        write_u64(&mut buf, 16, self.cas);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(
                Error::new(ErrorKind::InvalidResponse).with_message("gqtp header too small")
            );
        }
        if buf[0] != PROTOCOL {
            return Err(Error::new(ErrorKind::InvalidResponse)
                .with_message(format!("bad gqtp protocol byte: {:#04x}", buf[0])));
        }
        let header = Self {
            query_type: QueryType::from_u8(buf[1])?,
            key_length: read_u16(buf, 2),
            level: buf[4],
            flags: buf[5],
            status: read_u16(buf, 6),
            size: read_u32(buf, 8),
            opaque: read_u32(buf, 12),
            cas: read_u64(buf, 16),
        };
        if header.size as usize > MAX_BODY_ABS {
            return Err(Error::new(ErrorKind::InvalidResponse)
                .with_message(format!("gqtp body size {} exceeds limit", header.size)));
        }
        Ok(header)
    }
}

/// Header followed by `payload`, ready to be written to the socket.
pub fn encode_request(payload: &[u8]) -> Result<Bytes, Error> {
    let size = u32::try_from(payload.len()).map_err(|_| {
        Error::new(ErrorKind::Usage).with_message("command is too large for a gqtp frame")
    })?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_slice(&FrameHeader::request(size).encode());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(out)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(out)
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}
