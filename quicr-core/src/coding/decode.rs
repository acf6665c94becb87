use bytes::Buf;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("short buffer")]
    ShortBuffer,

    #[error("invalid value")]
    InvalidValue,

    #[error("varint too large")]
    BoundsExceeded,

    #[error("string too large")]
    StringTooLarge,
}

/// Decode a typed value from a buffer of bytes.
///
/// Mirrors the teacher's `coding::Decode` trait: synchronous, operating over
/// anything that implements `bytes::Buf`, so the same impls work whether the
/// bytes came off a QUIC stream or out of a cached fragment.
pub trait Decode: Sized {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError>;

    /// Errors with [`DecodeError::ShortBuffer`] unless at least `size` bytes remain.
    fn decode_remaining<R: Buf>(r: &R, size: usize) -> Result<(), DecodeError> {
        if r.remaining() < size {
            Err(DecodeError::ShortBuffer)
        } else {
            Ok(())
        }
    }
}
