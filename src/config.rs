use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::{
    error::{RelayError, Result},
    DEFAULT_ENTRY_COUNT, MAX_ENTRY_COUNT, TOKEN_DISPLAY_CHARS,
};

/// Watch-side behaviour of a screen controller
#[derive(Debug, Clone)]
pub struct ScreenConfig {
    /// Characters of the token shown before the ellipsis
    pub token_display_chars: usize,
    /// Give up on a response after this long; `None` waits forever
    pub response_timeout: Option<Duration>,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            token_display_chars: TOKEN_DISPLAY_CHARS,
            response_timeout: None,
        }
    }
}

/// Phone-side companion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Nightscout base URL, e.g. `https://my.nightscout.example`
    pub nightscout_url: Option<String>,
    /// Nightscout access token sent as the `token` query parameter
    pub access_token: Option<String>,
    /// Endpoint answering `{ "token": ... }` for `GET_SECRET`
    pub token_endpoint: Option<String>,
    /// Entries fetched when a request does not say
    pub entry_count: u32,
    /// Per-request HTTP timeout in milliseconds
    pub http_timeout_ms: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            nightscout_url: None,
            access_token: None,
            token_endpoint: None,
            entry_count: DEFAULT_ENTRY_COUNT,
            http_timeout_ms: 10_000,
        }
    }
}

impl CompanionConfig {
    /// Parse a JSON document
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] for malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RelayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the file cannot be read, otherwise as
    /// [`CompanionConfig::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.entry_count == 0 || self.entry_count > MAX_ENTRY_COUNT {
            return Err(RelayError::Config(format!(
                "entry_count must be between 1 and {MAX_ENTRY_COUNT}, got {}",
                self.entry_count
            )));
        }
        if self.http_timeout_ms == 0 {
            return Err(RelayError::Config("http_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// HTTP timeout as a duration
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CompanionConfig::default();
        assert_eq!(config.entry_count, DEFAULT_ENTRY_COUNT);
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
        assert!(config.nightscout_url.is_none());

        let screen = ScreenConfig::default();
        assert_eq!(screen.token_display_chars, 20);
        assert!(screen.response_timeout.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CompanionConfig::from_json_str(
            r#"{"nightscout_url":"https://ns.example","access_token":"reader-1"}"#,
        )
        .unwrap();
        assert_eq!(config.nightscout_url.as_deref(), Some("https://ns.example"));
        assert_eq!(config.access_token.as_deref(), Some("reader-1"));
        assert_eq!(config.entry_count, DEFAULT_ENTRY_COUNT);
    }

    #[test]
    fn test_invalid_values() {
        let err = CompanionConfig::from_json_str(r#"{"entry_count":0}"#).unwrap_err();
        assert!(err.to_string().contains("entry_count"));

        let err = CompanionConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"entry_count": 24, "http_timeout_ms": 2500}}"#).unwrap();

        let config = CompanionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.entry_count, 24);
        assert_eq!(config.http_timeout(), Duration::from_millis(2500));

        let missing = CompanionConfig::from_file("/nonexistent/glucolink.json");
        assert!(matches!(missing, Err(RelayError::Io(_))));
    }
}
