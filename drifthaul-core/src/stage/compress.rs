//! Payload compression for staged objects.

use std::io::{BufRead, BufReader, Read, Write};

use flate2::read::{MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::config::{CompressionKind, FileFormatConfig};
use crate::error::{CoreError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression applied to uploaded objects.
///
/// An explicit format compression wins; `AUTO` gzips only when auto-compress
/// is enabled.
pub fn upload_compression(format: &FileFormatConfig, auto_compress: bool) -> CompressionKind {
    match format.compression {
        CompressionKind::Auto if auto_compress => CompressionKind::Gzip,
        CompressionKind::Auto => CompressionKind::None,
        other => other,
    }
}

/// Object name suffix for `kind`.
pub fn suffix(kind: CompressionKind) -> &'static str {
    match kind {
        CompressionKind::Gzip => ".gz",
        CompressionKind::Deflate => ".deflate",
        CompressionKind::Auto | CompressionKind::None => "",
    }
}

pub fn compress(kind: CompressionKind, data: &[u8]) -> Result<Vec<u8>> {
    let result = match kind {
        CompressionKind::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).and_then(|_| encoder.finish())
        }
        CompressionKind::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).and_then(|_| encoder.finish())
        }
        CompressionKind::Auto | CompressionKind::None => return Ok(data.to_vec()),
    };
    result.map_err(|err| CoreError::transfer(format!("failed to compress payload: {err}"), kind.as_str()))
}

/// Wrap a downloaded object in a decompressing reader.
///
/// `AUTO` looks at the object name first and falls back to sniffing the gzip
/// magic bytes.
pub fn decompressing_reader(
    kind: CompressionKind,
    name: &str,
    reader: Box<dyn Read + Send>,
) -> Result<Box<dyn Read + Send>> {
    let kind = match kind {
        CompressionKind::Auto => {
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".gz") {
                CompressionKind::Gzip
            } else if lower.ends_with(".deflate") || lower.ends_with(".zz") {
                CompressionKind::Deflate
            } else {
                let mut buffered = BufReader::new(reader);
                let head = buffered
                    .fill_buf()
                    .map_err(|err| CoreError::transfer(format!("failed to read stage object: {err}"), name))?;
                let is_gzip = head.starts_with(&GZIP_MAGIC);
                let reader: Box<dyn Read + Send> = Box::new(buffered);
                return Ok(if is_gzip {
                    Box::new(MultiGzDecoder::new(reader))
                } else {
                    reader
                });
            }
        }
        other => other,
    };
    Ok(match kind {
        CompressionKind::Gzip => Box::new(MultiGzDecoder::new(reader)),
        CompressionKind::Deflate => Box::new(ZlibDecoder::new(reader)),
        CompressionKind::Auto | CompressionKind::None => reader,
    })
}
