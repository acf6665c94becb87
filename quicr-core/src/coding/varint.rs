use std::fmt;

use bytes::{Buf, BufMut};

use super::{Decode, DecodeError, Encode, EncodeError};

/// A QUIC variable-length integer: an unsigned value less than 2^62, encoded
/// in 1/2/4/8 bytes depending on magnitude (the top two bits of the first
/// byte select the length). See `spec.md` §6.
#[derive(Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: Self = Self((1 << 62) - 1);
    pub const MAX_SIZE: usize = 8;

    pub const fn from_u32(x: u32) -> Self {
        Self(x as u64)
    }

    pub fn from_u64(x: u64) -> Result<Self, EncodeError> {
        if x <= Self::MAX.0 {
            Ok(Self(x))
        } else {
            Err(EncodeError::BoundsExceeded)
        }
    }

    pub fn size(&self) -> usize {
        let x = self.0;
        if x < (1 << 6) {
            1
        } else if x < (1 << 14) {
            2
        } else if x < (1 << 30) {
            4
        } else {
            8
        }
    }
}

impl From<VarInt> for u64 {
    fn from(x: VarInt) -> Self {
        x.0
    }
}

impl From<VarInt> for usize {
    fn from(x: VarInt) -> Self {
        x.0 as usize
    }
}

impl From<u8> for VarInt {
    fn from(x: u8) -> Self {
        Self(x as u64)
    }
}

impl From<u32> for VarInt {
    fn from(x: u32) -> Self {
        Self(x as u64)
    }
}

impl TryFrom<u64> for VarInt {
    type Error = EncodeError;

    fn try_from(x: u64) -> Result<Self, Self::Error> {
        Self::from_u64(x)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = EncodeError;

    fn try_from(x: usize) -> Result<Self, Self::Error> {
        Self::from_u64(x as u64)
    }
}

impl fmt::Debug for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Decode for VarInt {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Self::decode_remaining(r, 1)?;
        let first = r.chunk()[0];
        let tag = first >> 6;
        let len = 1usize << tag;
        Self::decode_remaining(r, len)?;

        let mut buf = [0u8; 8];
        buf[8 - len..].copy_from_slice(&{
            let mut tmp = vec![0u8; len];
            r.copy_to_slice(&mut tmp);
            tmp
        });
        buf[8 - len] &= 0b0011_1111;
        let x = u64::from_be_bytes(buf);
        Ok(Self(x))
    }
}

impl Encode for VarInt {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        let x = self.0;
        if x < (1 << 6) {
            w.put_u8(x as u8);
        } else if x < (1 << 14) {
            w.put_u16(0b01 << 14 | x as u16);
        } else if x < (1 << 30) {
            w.put_u32(0b10 << 30 | x as u32);
        } else if x <= Self::MAX.0 {
            w.put_u64(0b11 << 62 | x);
        } else {
            return Err(EncodeError::BoundsExceeded);
        }
        Ok(())
    }
}

/// Encode/decode a plain `u64` as a varint; every group/object/offset field
/// in the wire format is a varint, so we lean on `From`/`TryFrom` at call
/// sites instead of threading `VarInt` through the whole crate.
pub fn encode_u64<W: BufMut>(x: u64, w: &mut W) -> Result<(), EncodeError> {
    VarInt::from_u64(x)?.encode(w)
}

pub fn decode_u64<R: Buf>(r: &mut R) -> Result<u64, DecodeError> {
    Ok(VarInt::decode(r)?.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trips_each_length_class() {
        for &x in &[0u64, 63, 64, 16383, 16384, 1 << 29, 1 << 30, VarInt::MAX.0] {
            let mut buf = BytesMut::new();
            encode_u64(x, &mut buf).unwrap();
            assert_eq!(buf.len(), VarInt::from_u64(x).unwrap().size());
            let decoded = decode_u64(&mut buf).unwrap();
            assert_eq!(decoded, x);
        }
    }

    #[test]
    fn rejects_values_above_max() {
        assert!(VarInt::from_u64(1 << 62).is_err());
    }

    #[test]
    fn short_buffer_is_detected() {
        let mut buf = BytesMut::from(&[0b0100_0000u8][..]); // claims a 2-byte varint
        assert_eq!(decode_u64(&mut buf), Err(DecodeError::ShortBuffer));
    }
}
