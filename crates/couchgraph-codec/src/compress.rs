//! zstd helpers for attachment payloads and the blob jar.

use crate::error::{CodecError, CodecResult};

/// Default zstd level.
pub const DEFAULT_LEVEL: i32 = 1;

pub fn compress(data: &[u8], level: i32) -> CodecResult<Vec<u8>> {
    zstd::encode_all(data, level).map_err(|e| CodecError::CompressionFailed(e.to_string()))
}

pub fn decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| CodecError::DecompressionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_input() {
        let data = b"couchgraph ".repeat(200);
        let packed = compress(&data, DEFAULT_LEVEL).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn garbage_fails_to_decompress() {
        let err = decompress(b"definitely not zstd").unwrap_err();
        assert!(matches!(err, CodecError::DecompressionFailed(_)));
    }
}
