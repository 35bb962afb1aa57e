use std::path::Path;
use std::time::Duration;

use couchgraph_codec::CodecConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Connection and codec settings.
///
/// Loadable from TOML; every key is optional.
///
/// ```toml
/// url = "http://localhost:5984/app"
/// max_inline_text = 1024
/// multipart_threshold = 2048
/// retry_backoff_max_ms = 1000
/// compression_level = 1
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouchGraphConfig {
    /// Database URL. Connections to the same URL share one identity cache.
    pub url: String,
    /// Longest text, in bytes, kept inline in a document.
    pub max_inline_text: usize,
    /// Attachment payload above which a document takes the multipart
    /// path. Defaults to twice `max_inline_text`.
    pub multipart_threshold: Option<usize>,
    /// Upper bound of the randomized pause between conflict retries.
    pub retry_backoff_max_ms: u64,
    pub compression_level: i32,
}

impl Default for CouchGraphConfig {
    fn default() -> Self {
        let codec = CodecConfig::default();
        Self {
            url: "memory://default".to_string(),
            max_inline_text: codec.max_inline_text,
            multipart_threshold: None,
            retry_backoff_max_ms: 1000,
            compression_level: codec.compression_level,
        }
    }
}

impl CouchGraphConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn multipart_threshold(&self) -> usize {
        self.multipart_threshold
            .unwrap_or(2 * self.max_inline_text)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            max_inline_text: self.max_inline_text,
            compression_level: self.compression_level,
        }
    }
}
