//! Recorder settings.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```toml
//! checkpoint_every_nth = 200
//!
//! [serialize]
//! record_canvas = true
//!
//! [privacy]
//! mask_all_inputs = true
//! ```

use serde::Deserialize;
use snapshot::{PrivacyConfig, SerializeOptions};
use std::fmt;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecorderConfig {
    /// Take a checkpoint once this much time has passed since the last one.
    pub checkpoint_every_ms: Option<u64>,
    /// Take a checkpoint once this many incremental events were emitted
    /// since the last one.
    pub checkpoint_every_nth: Option<u64>,
    /// Pending inserts a single buffer may carry before a checkpoint is forced.
    pub max_pending_inserts: usize,
    /// Added to every timestamp; the elapsed time of the session being resumed.
    pub session_offset_ms: u64,
    pub serialize: SerializeOptions,
    pub privacy: PrivacyConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            checkpoint_every_ms: None,
            checkpoint_every_nth: None,
            max_pending_inserts: 1000,
            session_offset_ms: 0,
            serialize: SerializeOptions::default(),
            privacy: PrivacyConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(toml::de::Error),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(err) => write!(f, "invalid recorder config: {err}"),
            ConfigError::Invalid(what) => write!(f, "invalid recorder config: {what}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl RecorderConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RecorderConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checkpoint_every_nth == Some(0) {
            return Err(ConfigError::Invalid("checkpoint_every_nth must be positive"));
        }
        if self.checkpoint_every_ms == Some(0) {
            return Err(ConfigError::Invalid("checkpoint_every_ms must be positive"));
        }
        if self.max_pending_inserts == 0 {
            return Err(ConfigError::Invalid("max_pending_inserts must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot::PrivacyPolicy;

    #[test]
    fn empty_source_gives_defaults() {
        let config = RecorderConfig::from_toml_str("").expect("config");
        assert_eq!(config.checkpoint_every_nth, None);
        assert_eq!(config.max_pending_inserts, 1000);
        assert!(config.serialize.inline_stylesheet);
    }

    #[test]
    fn nested_tables_override_defaults() {
        let config = RecorderConfig::from_toml_str(
            r#"
            checkpoint_every_ms = 30000
            session_offset_ms = 1200

            [serialize]
            record_canvas = true

            [serialize.slim_dom]
            script = true

            [privacy]
            mask_all_inputs = true
            block_selector = "video, .ad"
            "#,
        )
        .expect("config");
        assert_eq!(config.checkpoint_every_ms, Some(30000));
        assert_eq!(config.session_offset_ms, 1200);
        assert!(config.serialize.record_canvas);
        assert!(config.serialize.slim_dom.script);
        assert!(!config.serialize.slim_dom.comment);
        assert_eq!(config.privacy.mask_input_value("text", "abc"), "********");
        assert!(config.privacy.is_blocked("video", &[]));
    }

    #[test]
    fn zero_cadence_is_rejected() {
        let err = RecorderConfig::from_toml_str("checkpoint_every_nth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RecorderConfig::from_toml_str("checkpoint_every = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
