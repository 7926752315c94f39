//! Key and value codecs.
//!
//! The tree itself only ever sees bytes. A [`Codec`] turns caller values into
//! those bytes and back, and a [`KeyOrder`] defines the total order the tree
//! keeps encoded keys in. Each view carries its own codecs, so a sub database
//! can use a different key encoding than its parent.

use std::cmp::Ordering;

/// Errors produced while decoding stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Bytes were expected to be UTF-8 but weren't.
    InvalidUtf8,
    /// Error reported by a caller-supplied codec.
    Custom(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
            Self::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Encodes caller values to bytes and decodes them back.
///
/// `Item` is the borrowed form callers pass in (`[u8]`, `str`, or any
/// `Clone` type); decoding yields its owned form.
pub trait Codec: Send + Sync {
    /// The value type handled by this codec.
    type Item: ?Sized + ToOwned;

    /// Identifier recorded in the tree header.
    fn id(&self) -> &str;

    /// Encode a value.
    fn encode(&self, item: &Self::Item) -> Vec<u8>;

    /// Decode a value.
    fn decode(&self, bytes: &[u8]) -> Result<<Self::Item as ToOwned>::Owned, CodecError>;
}

/// The owned value type a codec decodes to.
pub type Owned<C> = <<C as Codec>::Item as ToOwned>::Owned;

/// Raw bytes, passed through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Binary;

impl Codec for Binary {
    type Item = [u8];

    fn id(&self) -> &str {
        "binary"
    }

    fn encode(&self, item: &[u8]) -> Vec<u8> {
        item.to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8;

impl Codec for Utf8 {
    type Item = str;

    fn id(&self) -> &str {
        "utf-8"
    }

    fn encode(&self, item: &str) -> Vec<u8> {
        item.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

/// A total order over encoded keys.
///
/// Namespaced views bound their scans with byte prefixes, so an order used
/// together with sub databases must sort every key that starts with a prefix
/// between the prefix and its byte-wise successor.
pub trait KeyOrder: Send + Sync {
    /// Identifier recorded in the tree header.
    fn id(&self) -> &str;

    /// Compare two encoded keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Unsigned lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteOrder;

impl KeyOrder for ByteOrder {
    fn id(&self) -> &str {
        "bytes"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_rejects_invalid_bytes() {
        assert_eq!(Utf8.decode(&[0xff, 0xfe]), Err(CodecError::InvalidUtf8));
        assert_eq!(Utf8.decode("héllo".as_bytes()), Ok("héllo".to_string()));
    }

    #[test]
    fn test_binary_passes_bytes_through() {
        let bytes = [0xff, 0x00, 0x01];
        assert_eq!(Binary.encode(&bytes), bytes.to_vec());
        assert_eq!(Binary.decode(&bytes), Ok(bytes.to_vec()));
    }

    #[test]
    fn test_byte_order_is_unsigned() {
        assert_eq!(ByteOrder.compare(&[0x7f], &[0x80]), Ordering::Less);
        assert_eq!(ByteOrder.compare(b"ab", b"a"), Ordering::Greater);
        assert_eq!(ByteOrder.compare(b"", b""), Ordering::Equal);
    }
}
