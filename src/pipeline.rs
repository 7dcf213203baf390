//! Per-file content pipeline: minify, compress, hash, store.
//!
//! For every host file mapped into the image:
//!
//! 1. Read the raw bytes.
//! 2. Minify by extension (unless disabled): `.json` and `.jsonc` are parsed
//!    and re-serialized without whitespace, `.js` goes through jsmin.
//! 3. If the file's resolved compression is gzip, compress the post-minify
//!    bytes; the compressed form is kept only when it is strictly smaller,
//!    in which case the Compression leaf is stamped with the original
//!    length.  Otherwise the leaf is stripped and the bytes stay as-is.
//! 4. Append the stored bytes as the file's data leaf; the file's MD5 is
//!    fed from those same bytes.
//!
//! The returned buffer is exactly what the image stores; the build driver
//! also writes it to the `-f` copy directory when that is enabled.

use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::BuildError;
use crate::fwfs::{CompressionType, NodeId, Tree};
use crate::jsmin;

pub fn process_file(
    tree: &mut Tree,
    file: NodeId,
    source: &Path,
    minify: bool,
) -> Result<Vec<u8>, BuildError> {
    let raw = std::fs::read(source).map_err(|e| BuildError::Io {
        context: format!("reading {}", source.display()),
        source: e,
    })?;

    let name = tree.named(file).name.clone();
    let mut stored = if minify {
        minify_by_extension(&name, raw, source)?
    } else {
        raw
    };

    match tree.compression(file) {
        CompressionType::None => {}
        CompressionType::Gzip => {
            let compressed = gzip(&stored).map_err(|e| BuildError::Io {
                context: format!("compressing {}", source.display()),
                source: e,
            })?;
            if compressed.len() < stored.len() {
                tree.set_compression_original_size(file, stored.len() as u32);
                stored = compressed;
            } else {
                // Compression made it bigger; store uncompressed.
                tree.remove_compression(file);
            }
        }
    }

    tree.append_data(file, stored.clone())?;
    Ok(stored)
}

/// Minify `data` according to the file extension; anything unrecognized
/// passes through untouched.
fn minify_by_extension(name: &str, data: Vec<u8>, source: &Path) -> Result<Vec<u8>, BuildError> {
    let minify_error = |message: String| BuildError::Minify {
        path: source.display().to_string(),
        message,
    };

    match extension(name) {
        Some("json") => compact_json(&data).map_err(|e| minify_error(e.to_string())),
        Some("jsonc") => {
            let stripped = jsmin::jsmin(&data).map_err(|e| minify_error(e.to_string()))?;
            compact_json(&stripped).map_err(|e| minify_error(e.to_string()))
        }
        Some("js") => jsmin::jsmin(&data).map_err(|e| minify_error(e.to_string())),
        _ => Ok(data),
    }
}

fn extension(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(_, ext)| ext)
}

fn compact_json(data: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    serde_json::to_vec(&value)
}

/// Gzip with the default level.  The encoder writes a fixed header (zero
/// mtime, no name), so output depends only on the input bytes.
fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
