//! Header block compression
//!
//! The multiplexer frames and reassembles header blocks but treats their
//! contents as opaque. Compression sits behind [`HeaderEncoder`] and
//! [`HeaderDecoder`]; the default implementation uses the `hpack` crate.
//!
//! HPACK is stateful: every header block received on a connection must be
//! decoded in order, including blocks for streams that are already gone.

use super::error::{Error, Result};

/// A decoded header field
pub type HeaderField = (Vec<u8>, Vec<u8>);

/// Compresses outbound header lists into header blocks
pub trait HeaderEncoder: Send {
    /// Append the encoded form of `fields` to `dst`
    fn encode(&mut self, fields: &[(&[u8], &[u8])], dst: &mut Vec<u8>) -> Result<()>;
}

/// Decompresses inbound header blocks
pub trait HeaderDecoder: Send {
    /// Decode one complete header block
    fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>>;
}

/// HPACK (RFC 7541) encoder and decoder
pub struct HpackCodec;

impl HpackCodec {
    /// Encoder half
    pub fn encoder() -> HpackEncoder {
        HpackEncoder {
            inner: hpack::Encoder::new(),
        }
    }

    /// Decoder half
    pub fn decoder() -> HpackDecoder {
        HpackDecoder {
            inner: hpack::Decoder::new(),
        }
    }
}

/// [`HeaderEncoder`] backed by `hpack::Encoder`
pub struct HpackEncoder {
    inner: hpack::Encoder<'static>,
}

impl HeaderEncoder for HpackEncoder {
    fn encode(&mut self, fields: &[(&[u8], &[u8])], dst: &mut Vec<u8>) -> Result<()> {
        self.inner
            .encode_into(fields.iter().copied(), dst)
            .map_err(|e| Error::Compression(format!("HPACK encode error: {}", e)))
    }
}

/// [`HeaderDecoder`] backed by `hpack::Decoder`
pub struct HpackDecoder {
    inner: hpack::Decoder<'static>,
}

impl HeaderDecoder for HpackDecoder {
    fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        self.inner
            .decode(block)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let mut encoder = HpackCodec::encoder();
        let mut decoder = HpackCodec::decoder();

        let mut block = Vec::new();
        let fields: [(&[u8], &[u8]); 2] = [(b":status", b"200"), (b"content-type", b"text/plain")];
        encoder.encode(&fields, &mut block).unwrap();

        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(
            decoded,
            vec![
                (b":status".to_vec(), b"200".to_vec()),
                (b"content-type".to_vec(), b"text/plain".to_vec()),
            ]
        );
    }

    #[test]
    fn test_decode_garbage() {
        let mut decoder = HpackCodec::decoder();
        let err = decoder.decode(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, Error::Compression(_)));
    }
}
