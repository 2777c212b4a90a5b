use std::fmt;
use std::path::PathBuf;

/// Engine-level errors used across kaleid SDK crates.
///
/// Contract rule: this type lives in `kaleid-core` and is re-exported by the
/// runtime crates so callers only handle one error currency.
#[derive(Debug)]
pub enum EngineError {
    // ---- Preset loading ----
    PresetLoad {
        path: String,
        msg: String,
    },

    /// Preset source file is empty or exceeds the 1 MiB ceiling.
    PresetFileSize {
        path: String,
        size: u64,
    },

    ExpressionCompile(String),

    // ---- Backend-facing ----
    VertexCompile(String),
    FragmentCompile(String),
    Link(String),
    GlCreate(String),

    /// GL resolver / loader startup failures (no context, wrong backend,
    /// version too low).
    GlContext(String),

    // ---- Core / assets / config ----
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    InvalidConfig {
        path: PathBuf,
        msg: String,
    },

    // ---- Fallback ----
    Other(String),
}

impl EngineError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        EngineError::Other(s.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::PresetLoad { path, msg } => {
                write!(f, "could not load preset \"{path}\": {msg}")
            }
            EngineError::PresetFileSize { path, size } => {
                write!(f, "preset file has invalid size ({size} bytes): \"{path}\"")
            }
            EngineError::ExpressionCompile(msg) => {
                write!(f, "expression compile error: {msg}")
            }

            EngineError::VertexCompile(msg) => write!(f, "vertex shader compile error: {msg}"),
            EngineError::FragmentCompile(msg) => write!(f, "fragment shader compile error: {msg}"),
            EngineError::Link(msg) => write!(f, "program link error: {msg}"),
            EngineError::GlCreate(msg) => write!(f, "backend object creation failed: {msg}"),
            EngineError::GlContext(msg) => write!(f, "gl context error: {msg}"),

            EngineError::Io { path, source } => {
                write!(f, "io error at {}: {}", path.display(), source)
            }
            EngineError::Json { path, source } => {
                write!(f, "json parse error at {}: {}", path.display(), source)
            }
            EngineError::InvalidConfig { path, msg } => {
                write!(f, "invalid config at {}: {}", path.display(), msg)
            }

            EngineError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io { source, .. } => Some(source),
            EngineError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_size_error_mentions_invalid_size() {
        let err = EngineError::PresetFileSize {
            path: "/presets/huge.milk".into(),
            size: 2 * 1024 * 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("invalid size"), "unexpected message: {msg}");
        assert!(msg.contains("huge.milk"), "unexpected message: {msg}");
    }

    #[test]
    fn io_error_preserves_source() {
        let err = EngineError::Io {
            path: PathBuf::from("/tmp/missing"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
