//! Engine settings block.
//!
//! Hosts usually configure the engine programmatically; the JSON form exists
//! for tooling and tests. Unknown keys are rejected so typos surface early.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineSettings {
    /// Directories scanned for texture files, in search order. The current
    /// preset's directory is always appended at lookup time.
    pub texture_search_paths: Vec<PathBuf>,

    /// Default for the smooth-vs-hard flag of requested switches.
    pub smooth_transitions: bool,

    /// Per-pixel mesh resolution fallbacks when the preset does not specify
    /// `meshx` / `meshy`.
    pub mesh_x: u32,
    pub mesh_y: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            texture_search_paths: Vec::new(),
            smooth_transitions: true,
            mesh_x: 48,
            mesh_y: 36,
        }
    }
}

impl EngineSettings {
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: EngineSettings =
            serde_json::from_slice(&bytes).map_err(|source| EngineError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        if settings.mesh_x == 0 || settings.mesh_y == 0 {
            return Err(EngineError::InvalidConfig {
                path: path.to_path_buf(),
                msg: "mesh_x and mesh_y must be non-zero".to_string(),
            });
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("kaleid_settings_{name}_{ts}.json"));
        fs::write(&p, contents).expect("write fixture");
        p
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let path = write_temp("partial", r#"{ "smooth_transitions": false }"#);
        let s = EngineSettings::from_json_path(&path).expect("partial settings should parse");
        assert!(!s.smooth_transitions);
        assert_eq!(s.mesh_x, 48);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let path = write_temp("unknown", r#"{ "texture_serach_paths": [] }"#);
        let err = EngineSettings::from_json_path(&path).expect_err("typo key must fail");
        assert!(
            err.to_string().contains("json parse error"),
            "unexpected error: {err}"
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn zero_mesh_size_is_rejected() {
        let path = write_temp("zero_mesh", r#"{ "mesh_x": 0 }"#);
        let err = EngineSettings::from_json_path(&path).expect_err("mesh_x=0 must fail");
        assert!(
            err.to_string().contains("non-zero"),
            "unexpected error: {err}"
        );
        let _ = fs::remove_file(path);
    }
}
