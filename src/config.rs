use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::BuildError;
use crate::jsmin;

/// Build configuration.
///
/// The file is JSON, optionally with `//` and `/* */` comments (it is run
/// through the minifier before parsing).  Typed deserialization doubles as
/// schema validation: unknown keys anywhere, including unknown rule fields,
/// reject the config.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Volume name stored in the image.
    pub name: String,
    /// Volume ID; a number or a string like `"0x12345678"`.
    #[serde(default)]
    pub id: VolumeId,
    /// Image path → host path.  Host values may reference `$VARS`.
    #[serde(default)]
    pub source: BTreeMap<String, String>,
    /// Image path → object store index.
    #[serde(default)]
    pub mountpoints: BTreeMap<String, u8>,
    /// Metadata rules, applied in declaration order.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VolumeId {
    Number(u32),
    Text(String),
}

impl Default for VolumeId {
    fn default() -> Self {
        VolumeId::Number(0)
    }
}

impl VolumeId {
    /// Resolve to the u32 stored in the volume's ID32 leaf.  Strings accept
    /// hex with an `0x` prefix or plain decimal.
    pub fn resolve(&self) -> Result<u32, BuildError> {
        match self {
            VolumeId::Number(n) => Ok(*n),
            VolumeId::Text(s) => {
                let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u32::from_str_radix(hex, 16),
                    None => s.parse(),
                };
                parsed.map_err(|_| BuildError::Validation {
                    message: format!("invalid volume id '{s}'"),
                })
            }
        }
    }
}

/// One metadata rule: masks plus the fields it sets.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub mask: MaskSpec,
    #[serde(default)]
    pub readonly: Option<bool>,
    #[serde(default)]
    pub compress: Option<String>,
    #[serde(default)]
    pub read: Option<String>,
    #[serde(default)]
    pub write: Option<String>,
}

/// A rule's mask: one glob or a list of globs.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MaskSpec {
    One(String),
    Many(Vec<String>),
}

impl MaskSpec {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            MaskSpec::One(mask) => std::slice::from_ref(mask),
            MaskSpec::Many(masks) => masks,
        };
        slice.iter().map(String::as_str)
    }
}

impl Config {
    fn validate(&self) -> Result<(), BuildError> {
        if self.name.is_empty() {
            return Err(BuildError::Validation {
                message: "volume name must not be empty".into(),
            });
        }
        for target in self.source.keys() {
            validate_target(target)?;
        }
        for target in self.mountpoints.keys() {
            if target.trim_start_matches('/').is_empty()
                || target.trim_start_matches('/').contains('/')
            {
                return Err(BuildError::Validation {
                    message: format!("invalid mountpoint target '{target}'"),
                });
            }
        }
        Ok(())
    }
}

/// Source targets are either the root itself (`/`) or a single name,
/// optionally written with a leading `/`.
fn validate_target(target: &str) -> Result<(), BuildError> {
    if target == "/" {
        return Ok(());
    }
    let name = target.strip_prefix('/').unwrap_or(target);
    if name.is_empty() || name.contains('/') {
        return Err(BuildError::Validation {
            message: format!("invalid source target '{target}'"),
        });
    }
    Ok(())
}

pub fn load(path: &Path) -> Result<Config, BuildError> {
    let raw = std::fs::read(path).map_err(|source| BuildError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    // Strip comments so the config can be annotated.
    let stripped = jsmin::jsmin(&raw).map_err(|e| BuildError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let config: Config =
        serde_json::from_slice(&stripped).map_err(|e| BuildError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    config.validate()?;
    Ok(config)
}
