//! C6 wire messages. Grounded on `spec.md` §4.5 (opcode table) and on the
//! teacher's `serve`/`coding` message-enum pattern (`paste`-generated
//! dispatch over a fixed opcode set).

use bytes::{Buf, BufMut, Bytes};

use crate::coding::{decode_u64, encode_u64, Decode, DecodeError, Encode, EncodeError};

macro_rules! opcode_enum {
    ($($variant:ident = $code:expr),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u64)]
        pub enum Opcode {
            $($variant = $code),+
        }

        impl Opcode {
            pub fn from_u64(v: u64) -> Result<Self, DecodeError> {
                match v {
                    $($code => Ok(Self::$variant),)+
                    _ => Err(DecodeError::InvalidValue),
                }
            }
        }
    };
}

opcode_enum! {
    RequestStream = 1,
    RequestDatagram = 2,
    FinDatagram = 3,
    RequestRepair = 4,
    Fragment = 5,
    Post = 6,
    Accept = 7,
    StartPoint = 8,
    Subscribe = 9,
    Notify = 10,
    CachePolicy = 11,
    WarpHeader = 12,
    ObjectHeader = 13,
    RushHeader = 14,
}

fn encode_bytes<W: BufMut>(data: &Bytes, w: &mut W) -> Result<(), EncodeError> {
    encode_u64(data.len() as u64, w)?;
    w.put_slice(data);
    Ok(())
}

fn decode_bytes<R: Buf>(r: &mut R) -> Result<Bytes, DecodeError> {
    let len = decode_u64(r)? as usize;
    Decode::decode_remaining(r, len)?;
    Ok(r.copy_to_bytes(len))
}

fn encode_string<W: BufMut>(s: &str, w: &mut W) -> Result<(), EncodeError> {
    encode_u64(s.len() as u64, w)?;
    w.put_slice(s.as_bytes());
    Ok(())
}

fn decode_string<R: Buf>(r: &mut R) -> Result<String, DecodeError> {
    let len = decode_u64(r)? as usize;
    Decode::decode_remaining(r, len)?;
    let mut buf = vec![0u8; len];
    r.copy_to_slice(&mut buf);
    String::from_utf8(buf).map_err(|_| DecodeError::InvalidValue)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    SingleStream,
    Warp,
    Rush,
    Datagram,
}

impl TransportMode {
    fn to_u64(self) -> u64 {
        match self {
            Self::SingleStream => 0,
            Self::Warp => 1,
            Self::Rush => 2,
            Self::Datagram => 3,
        }
    }

    fn from_u64(v: u64) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::SingleStream),
            1 => Ok(Self::Warp),
            2 => Ok(Self::Rush),
            3 => Ok(Self::Datagram),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CachePolicy {
    pub duration_max_ms: u64,
}

/// One decoded control-stream message, `spec.md` §4.5's opcode table.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RequestStream { url: String },
    RequestDatagram { url: String },
    FinDatagram { final_group: u64, final_object: u64 },
    RequestRepair { group: u64, object: u64, offset: u64, last: bool, length: u64 },
    Fragment {
        group: u64,
        object: u64,
        nb_objects_previous_group: u64,
        offset: u64,
        last: bool,
        flags: u8,
        data: Bytes,
    },
    Post { url: String, transport: TransportMode, cache_policy: CachePolicy, start_group: u64, start_object: u64 },
    Accept { transport: TransportMode, media_id: u64 },
    StartPoint { group: u64, object: u64 },
    Subscribe { url_prefix: String },
    Notify { url: String },
    CachePolicy { cache_policy: CachePolicy },
    WarpHeader { media_id: u64, group: u64 },
    ObjectHeader { object_id: u64, nb_objects_previous_group: u64, flags: u8, data: Bytes },
    RushHeader { media_id: u64, group: u64, object_id: u64 },
}

impl Message {
    fn opcode(&self) -> Opcode {
        match self {
            Self::RequestStream { .. } => Opcode::RequestStream,
            Self::RequestDatagram { .. } => Opcode::RequestDatagram,
            Self::FinDatagram { .. } => Opcode::FinDatagram,
            Self::RequestRepair { .. } => Opcode::RequestRepair,
            Self::Fragment { .. } => Opcode::Fragment,
            Self::Post { .. } => Opcode::Post,
            Self::Accept { .. } => Opcode::Accept,
            Self::StartPoint { .. } => Opcode::StartPoint,
            Self::Subscribe { .. } => Opcode::Subscribe,
            Self::Notify { .. } => Opcode::Notify,
            Self::CachePolicy { .. } => Opcode::CachePolicy,
            Self::WarpHeader { .. } => Opcode::WarpHeader,
            Self::ObjectHeader { .. } => Opcode::ObjectHeader,
            Self::RushHeader { .. } => Opcode::RushHeader,
        }
    }

    /// Encode the payload (opcode + fields) without the outer 2-byte
    /// length prefix; `encode_framed` adds that.
    fn encode_payload<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        encode_u64(self.opcode() as u64, w)?;
        match self {
            Self::RequestStream { url } | Self::RequestDatagram { url } => encode_string(url, w),
            Self::FinDatagram { final_group, final_object } => {
                encode_u64(*final_group, w)?;
                encode_u64(*final_object, w)
            }
            Self::RequestRepair { group, object, offset, last, length } => {
                encode_u64(*group, w)?;
                encode_u64(*object, w)?;
                encode_u64(*offset, w)?;
                w.put_u8(*last as u8);
                encode_u64(*length, w)
            }
            Self::Fragment { group, object, nb_objects_previous_group, offset, last, flags, data } => {
                encode_u64(*group, w)?;
                encode_u64(*object, w)?;
                encode_u64(*nb_objects_previous_group, w)?;
                encode_u64(*offset, w)?;
                w.put_u8(*last as u8);
                w.put_u8(*flags);
                encode_bytes(data, w)
            }
            Self::Post { url, transport, cache_policy, start_group, start_object } => {
                encode_string(url, w)?;
                encode_u64(transport.to_u64(), w)?;
                encode_u64(cache_policy.duration_max_ms, w)?;
                encode_u64(*start_group, w)?;
                encode_u64(*start_object, w)
            }
            Self::Accept { transport, media_id } => {
                encode_u64(transport.to_u64(), w)?;
                encode_u64(*media_id, w)
            }
            Self::StartPoint { group, object } => {
                encode_u64(*group, w)?;
                encode_u64(*object, w)
            }
            Self::Subscribe { url_prefix } => encode_string(url_prefix, w),
            Self::Notify { url } => encode_string(url, w),
            Self::CachePolicy { cache_policy } => encode_u64(cache_policy.duration_max_ms, w),
            Self::WarpHeader { media_id, group } => {
                encode_u64(*media_id, w)?;
                encode_u64(*group, w)
            }
            Self::ObjectHeader { object_id, nb_objects_previous_group, flags, data } => {
                encode_u64(*object_id, w)?;
                encode_u64(*nb_objects_previous_group, w)?;
                w.put_u8(*flags);
                encode_bytes(data, w)
            }
            Self::RushHeader { media_id, group, object_id } => {
                encode_u64(*media_id, w)?;
                encode_u64(*group, w)?;
                encode_u64(*object_id, w)
            }
        }
    }

    /// A 2-byte big-endian length prefix followed by the payload
    /// (`spec.md` §4.5, "Message framing").
    pub fn encode_framed(&self, w: &mut bytes::BytesMut) -> Result<(), EncodeError> {
        let mut payload = bytes::BytesMut::new();
        self.encode_payload(&mut payload)?;
        if payload.len() > u16::MAX as usize {
            return Err(EncodeError::BoundsExceeded);
        }
        w.put_u16(payload.len() as u16);
        w.put_slice(&payload);
        Ok(())
    }

    /// Decode a framed message, consuming exactly the length-prefixed
    /// bytes if a complete frame is available; returns `Ok(None)` if the
    /// buffer doesn't yet hold a full frame.
    pub fn decode_framed<R: Buf>(r: &mut R) -> Result<Option<Self>, DecodeError> {
        if r.remaining() < 2 {
            return Ok(None);
        }
        let len = u16::from_be_bytes([r.chunk()[0], r.chunk()[1]]) as usize;
        if r.remaining() < 2 + len {
            return Ok(None);
        }
        r.advance(2);
        let mut payload = r.copy_to_bytes(len);
        Self::decode_payload(&mut payload).map(Some)
    }

    fn decode_payload<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        let opcode = Opcode::from_u64(decode_u64(r)?)?;
        Ok(match opcode {
            Opcode::RequestStream => Self::RequestStream { url: decode_string(r)? },
            Opcode::RequestDatagram => Self::RequestDatagram { url: decode_string(r)? },
            Opcode::FinDatagram => Self::FinDatagram {
                final_group: decode_u64(r)?,
                final_object: decode_u64(r)?,
            },
            Opcode::RequestRepair => {
                let group = decode_u64(r)?;
                let object = decode_u64(r)?;
                let offset = decode_u64(r)?;
                Decode::decode_remaining(r, 1)?;
                let last = r.get_u8() != 0;
                let length = decode_u64(r)?;
                Self::RequestRepair { group, object, offset, last, length }
            }
            Opcode::Fragment => {
                let group = decode_u64(r)?;
                let object = decode_u64(r)?;
                let nb_objects_previous_group = decode_u64(r)?;
                let offset = decode_u64(r)?;
                Decode::decode_remaining(r, 2)?;
                let last = r.get_u8() != 0;
                let flags = r.get_u8();
                let data = decode_bytes(r)?;
                Self::Fragment { group, object, nb_objects_previous_group, offset, last, flags, data }
            }
            Opcode::Post => {
                let url = decode_string(r)?;
                let transport = TransportMode::from_u64(decode_u64(r)?)?;
                let cache_policy = CachePolicy { duration_max_ms: decode_u64(r)? };
                let start_group = decode_u64(r)?;
                let start_object = decode_u64(r)?;
                Self::Post { url, transport, cache_policy, start_group, start_object }
            }
            Opcode::Accept => Self::Accept {
                transport: TransportMode::from_u64(decode_u64(r)?)?,
                media_id: decode_u64(r)?,
            },
            Opcode::StartPoint => Self::StartPoint { group: decode_u64(r)?, object: decode_u64(r)? },
            Opcode::Subscribe => Self::Subscribe { url_prefix: decode_string(r)? },
            Opcode::Notify => Self::Notify { url: decode_string(r)? },
            Opcode::CachePolicy => Self::CachePolicy {
                cache_policy: CachePolicy { duration_max_ms: decode_u64(r)? },
            },
            Opcode::WarpHeader => Self::WarpHeader { media_id: decode_u64(r)?, group: decode_u64(r)? },
            Opcode::ObjectHeader => {
                let object_id = decode_u64(r)?;
                let nb_objects_previous_group = decode_u64(r)?;
                Decode::decode_remaining(r, 1)?;
                let flags = r.get_u8();
                let data = decode_bytes(r)?;
                Self::ObjectHeader { object_id, nb_objects_previous_group, flags, data }
            }
            Opcode::RushHeader => Self::RushHeader {
                media_id: decode_u64(r)?,
                group: decode_u64(r)?,
                object_id: decode_u64(r)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(msg: Message) {
        let mut buf = BytesMut::new();
        msg.encode_framed(&mut buf).unwrap();
        let decoded = Message::decode_framed(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty(), "decode_framed must consume exactly one frame");
    }

    #[test]
    fn fragment_message_round_trips() {
        round_trip(Message::Fragment {
            group: 3,
            object: 1,
            nb_objects_previous_group: 4,
            offset: 250,
            last: true,
            flags: 0x10,
            data: Bytes::from_static(b"payload"),
        });
    }

    #[test]
    fn control_messages_round_trip() {
        round_trip(Message::RequestStream { url: "quicr://example/v1".into() });
        round_trip(Message::StartPoint { group: 5, object: 0 });
        round_trip(Message::FinDatagram { final_group: 9, final_object: 3 });
        round_trip(Message::Post {
            url: "quicr://example/v1".into(),
            transport: TransportMode::Warp,
            cache_policy: CachePolicy { duration_max_ms: 10_000 },
            start_group: 0,
            start_object: 0,
        });
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut buf = BytesMut::new();
        Message::StartPoint { group: 1, object: 1 }.encode_framed(&mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert_eq!(Message::decode_framed(&mut partial).unwrap(), None);
    }

    #[test]
    fn unknown_opcode_is_a_protocol_error() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u8(99);
        assert!(matches!(Message::decode_framed(&mut buf), Err(DecodeError::InvalidValue)));
    }
}
