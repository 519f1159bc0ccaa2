//! Transparent body decoding for `Content-Encoding: gzip, deflate, br`.

use std::io::{self, Read};

use brotli::Decompressor;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("{encoding} stream is corrupt: {source}")]
    Corrupt {
        encoding: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("decoded body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Undo every coding listed in a `Content-Encoding` header value.
///
/// Codings are removed in reverse order of application. Returns `Ok(None)`
/// when a coding is not supported, in which case the body must be passed on
/// untouched with its header.
pub fn decompress(header: &str, body: &[u8], limit: usize) -> Result<Option<Vec<u8>>, DecompressError> {
    let encodings: Vec<String> = header
        .split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty() && token != "identity")
        .collect();

    if encodings
        .iter()
        .any(|e| !matches!(e.as_str(), "gzip" | "x-gzip" | "deflate" | "br"))
    {
        tracing::debug!(encoding = %header, "Unsupported content-encoding, passing body through");
        return Ok(None);
    }

    let mut decoded = body.to_vec();
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "gzip" | "x-gzip" => read_limited(GzDecoder::new(decoded.as_slice()), "gzip", limit)?,
            "deflate" => decode_deflate(&decoded, limit)?,
            _ => read_limited(Decompressor::new(decoded.as_slice(), 4096), "br", limit)?,
        };
    }
    Ok(Some(decoded))
}

/// HTTP "deflate" is meant to be zlib-wrapped, but raw deflate streams are common.
fn decode_deflate(data: &[u8], limit: usize) -> Result<Vec<u8>, DecompressError> {
    match read_limited(ZlibDecoder::new(data), "deflate", limit) {
        Ok(out) => Ok(out),
        Err(DecompressError::Corrupt { .. }) => read_limited(DeflateDecoder::new(data), "deflate", limit),
        Err(e) => Err(e),
    }
}

fn read_limited<R: Read>(reader: R, encoding: &'static str, limit: usize) -> Result<Vec<u8>, DecompressError> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|source| DecompressError::Corrupt { encoding, source })?;
    if out.len() > limit {
        return Err(DecompressError::TooLarge { limit });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    const LIMIT: usize = 1024 * 1024;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn brotli(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut enc = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            enc.write_all(data).unwrap();
        }
        out
    }

    #[test]
    fn test_gzip() {
        let body = gzip(b"<html>hello</html>");
        let out = decompress("gzip", &body, LIMIT).unwrap().unwrap();
        assert_eq!(out, b"<html>hello</html>");
    }

    #[test]
    fn test_brotli() {
        let body = brotli(b"body { color: red }");
        let out = decompress("br", &body, LIMIT).unwrap().unwrap();
        assert_eq!(out, b"body { color: red }");
    }

    #[test]
    fn test_deflate_zlib_and_raw() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"zlib wrapped").unwrap();
        let out = decompress("deflate", &zlib.finish().unwrap(), LIMIT).unwrap().unwrap();
        assert_eq!(out, b"zlib wrapped");

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(b"raw deflate").unwrap();
        let out = decompress("deflate", &raw.finish().unwrap(), LIMIT).unwrap().unwrap();
        assert_eq!(out, b"raw deflate");
    }

    #[test]
    fn test_stacked_encodings_decode_in_reverse() {
        // "gzip, br" means gzip was applied first.
        let body = brotli(&gzip(b"layered"));
        let out = decompress("gzip, br", &body, LIMIT).unwrap().unwrap();
        assert_eq!(out, b"layered");
    }

    #[test]
    fn test_identity_is_noop() {
        let out = decompress("identity", b"plain", LIMIT).unwrap().unwrap();
        assert_eq!(out, b"plain");
    }

    #[test]
    fn test_unknown_encoding_passes_through() {
        assert!(decompress("zstd", b"opaque", LIMIT).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_gzip_errors() {
        assert!(matches!(
            decompress("gzip", b"definitely not gzip", LIMIT),
            Err(DecompressError::Corrupt { encoding: "gzip", .. })
        ));
    }

    #[test]
    fn test_limit_is_enforced() {
        let body = gzip(&vec![b'a'; 4096]);
        assert!(matches!(
            decompress("gzip", &body, 1024),
            Err(DecompressError::TooLarge { limit: 1024 })
        ));
    }
}
