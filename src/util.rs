use std::fs;
use std::path::Path;

use crate::error::BuildError;

/// Round `n` up to the next multiple of 4.
///
/// Firmware readers require word alignment for every emitted object, the
/// name field of named objects, and each inline child-table entry.
pub fn align_up(n: usize) -> usize {
    (n + 3) & !3
}

/// Append zero bytes to `buf` until its length is a multiple of 4.
pub fn pad4(buf: &mut Vec<u8>) {
    buf.resize(align_up(buf.len()), 0);
}

/// Expand `$VAR` and `${VAR}` references against the process environment.
///
/// Unknown variables are left as-is. A `$` not followed by an identifier
/// or `{` is passed through unchanged.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some(&(start, '{')) => {
                // ${VAR}
                let rest = &input[start + 1..];
                match rest.find('}') {
                    Some(end) => {
                        let name = &rest[..end];
                        match std::env::var(name) {
                            Ok(val) => out.push_str(&val),
                            Err(_) => out.push_str(&input[i..start + end + 2]),
                        }
                        for _ in 0..end + 2 {
                            chars.next();
                        }
                    }
                    None => out.push(c),
                }
            }
            Some(&(start, d)) if d.is_ascii_alphabetic() || d == '_' => {
                // $VAR
                let rest = &input[start..];
                let len = rest
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                    .unwrap_or(rest.len());
                let name = &rest[..len];
                match std::env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&input[i..start + len]),
                }
                for _ in 0..len {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Create `path` (and any missing parents) if it does not exist.
pub fn mkdir(path: &Path) -> Result<(), BuildError> {
    fs::create_dir_all(path).map_err(|e| BuildError::Io {
        context: format!("creating directory {}", path.display()),
        source: e,
    })
}

/// Remove the contents of a directory, including sub-directories.
/// The directory itself is kept.
pub fn cleandir(root: &Path) -> Result<(), BuildError> {
    let entries = fs::read_dir(root).map_err(|e| BuildError::Io {
        context: format!("reading directory {}", root.display()),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| BuildError::Io {
            context: format!("reading directory {}", root.display()),
            source: e,
        })?;
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| BuildError::Io {
            context: format!("removing {}", path.display()),
            source: e,
        })?;
    }
    Ok(())
}
