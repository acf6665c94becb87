use bytes::BufMut;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("value too large to encode")]
    BoundsExceeded,
}

/// Encode a typed value into a buffer of bytes.
///
/// Mirrors the teacher's `coding::Encode` trait, kept symmetric with
/// [`super::Decode`].
pub trait Encode {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError>;

    /// No-op placeholder kept symmetric with `Decode::decode_remaining`;
    /// `BufMut` grows on demand so there's nothing to check.
    fn encode_remaining<W: BufMut>(_w: &mut W, _size: usize) -> Result<(), EncodeError> {
        Ok(())
    }
}
