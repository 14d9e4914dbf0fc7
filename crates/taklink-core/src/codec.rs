//! Dictionary-assisted compression for CoT payloads.
//!
//! Payloads ride a low-bandwidth radio, so every byte matters: compression
//! uses a zstd dictionary pre-trained on the CoT payload family, and any
//! result over [`max_packet_bytes`](CotCodec) is refused rather than sent.
//! The dictionary blob is opaque; its derivation lives with the training
//! tooling, not here.

use std::io;
use std::path::Path;

use zstd::dict::{DecoderDictionary, EncoderDictionary};

use crate::metric_names;

/// Default zstd level. High levels pay off on sub-kilobyte payloads and the
/// packet rate is radio-bounded anyway.
pub const DEFAULT_LEVEL: i32 = 19;

/// Ceiling for a decompressed payload (a multicast datagram).
const MAX_DECOMPRESSED_BYTES: usize = 65_536;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload compressed fine but will not fit a radio packet.
    #[error("compressed size {size} exceeds cap of {max} bytes")]
    SizeExceeded { size: usize, max: usize },

    #[error("compression failed: {0}")]
    Compress(#[source] io::Error),

    #[error("decompression failed: {0}")]
    Decompress(#[source] io::Error),
}

/// Compressor/decompressor pair sharing one pre-trained dictionary.
///
/// The dictionary is loaded once at construction and never mutated. Both
/// operations are per-payload: a failure discards that payload only.
pub struct CotCodec {
    enc_dict: Option<EncoderDictionary<'static>>,
    dec_dict: Option<DecoderDictionary<'static>>,
    level: i32,
    max_packet_bytes: usize,
}

impl CotCodec {
    /// Build a codec from a dictionary blob.
    pub fn new(dictionary: &[u8], level: i32, max_packet_bytes: usize) -> Self {
        Self {
            enc_dict: Some(EncoderDictionary::copy(dictionary, level)),
            dec_dict: Some(DecoderDictionary::copy(dictionary)),
            level,
            max_packet_bytes,
        }
    }

    /// Build a codec without a dictionary. Compression ratios suffer; the
    /// size cap still applies.
    pub fn without_dictionary(level: i32, max_packet_bytes: usize) -> Self {
        Self { enc_dict: None, dec_dict: None, level, max_packet_bytes }
    }

    /// Load the dictionary from disk, degrading to dictionary-less
    /// operation if the blob is missing or unreadable.
    pub fn from_dict_path(path: &Path, level: i32, max_packet_bytes: usize) -> Self {
        match std::fs::read(path) {
            Ok(blob) => Self::new(&blob, level, max_packet_bytes),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "dictionary unavailable, compressing without it"
                );
                Self::without_dictionary(level, max_packet_bytes)
            }
        }
    }

    /// Compress a payload. Returns the compressed bytes iff they fit the
    /// packet cap. The input is not retained.
    pub fn compress(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        metrics::counter!(metric_names::CODEC_PAYLOADS).increment(1);

        let mut compressor = match &self.enc_dict {
            Some(dict) => zstd::bulk::Compressor::with_prepared_dictionary(dict),
            None => zstd::bulk::Compressor::new(self.level),
        }
        .map_err(CodecError::Compress)?;

        let compressed = compressor.compress(payload).map_err(CodecError::Compress)?;
        if compressed.len() > self.max_packet_bytes {
            metrics::counter!(metric_names::CODEC_OVERSIZED).increment(1);
            return Err(CodecError::SizeExceeded {
                size: compressed.len(),
                max: self.max_packet_bytes,
            });
        }

        metrics::counter!(metric_names::CODEC_COMPRESSED).increment(1);
        Ok(compressed)
    }

    /// Decompress a payload received from the overlay.
    pub fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decompressor = match &self.dec_dict {
            Some(dict) => zstd::bulk::Decompressor::with_prepared_dictionary(dict),
            None => zstd::bulk::Decompressor::new(),
        }
        .map_err(CodecError::Decompress)?;

        decompressor
            .decompress(bytes, MAX_DECOMPRESSED_BYTES)
            .map_err(CodecError::Decompress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // CoT payloads are XML-ish and repetitive; this stands in well enough
    // for ratio-sensitive tests.
    fn sample_payload() -> Vec<u8> {
        let event = r#"<event version="2.0" uid="ANDROID-352" type="a-f-G-U-C" how="m-g">
            <point lat="38.8895" lon="-77.0353" hae="12.0" ce="4.5" le="9.9"/>
            <detail><contact callsign="VIPER-1"/><group name="Cyan" role="Team Member"/></detail>
        </event>"#;
        event.as_bytes().to_vec()
    }

    #[test]
    fn roundtrip_without_dictionary() {
        let codec = CotCodec::without_dictionary(DEFAULT_LEVEL, 350);
        let payload = sample_payload();
        let compressed = codec.compress(&payload).unwrap();
        assert!(compressed.len() <= 350);
        assert_eq!(codec.decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn roundtrip_with_dictionary() {
        // Any valid content works as a raw-content dictionary.
        let dict: Vec<u8> = sample_payload();
        let codec = CotCodec::new(&dict, DEFAULT_LEVEL, 350);
        let payload = sample_payload();
        let compressed = codec.compress(&payload).unwrap();
        assert_eq!(codec.decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn oversized_result_is_refused() {
        let codec = CotCodec::without_dictionary(DEFAULT_LEVEL, 16);
        // Random bytes do not compress; the result cannot fit 16 bytes.
        let payload: Vec<u8> = (0..4096).map(|_| rand::random::<u8>()).collect();
        match codec.compress(&payload) {
            Err(CodecError::SizeExceeded { size, max }) => {
                assert!(size > max);
                assert_eq!(max, 16);
            }
            other => panic!("expected SizeExceeded, got {other:?}"),
        }
    }

    #[test]
    fn garbage_fails_decompression() {
        let codec = CotCodec::without_dictionary(DEFAULT_LEVEL, 350);
        assert!(matches!(
            codec.decompress(b"not a zstd frame"),
            Err(CodecError::Decompress(_))
        ));
    }

    #[test]
    fn missing_dictionary_degrades() {
        let codec = CotCodec::from_dict_path(
            Path::new("/nonexistent/cot.dict"),
            DEFAULT_LEVEL,
            350,
        );
        let payload = sample_payload();
        let compressed = codec.compress(&payload).unwrap();
        assert_eq!(codec.decompress(&compressed).unwrap(), payload);
    }
}
