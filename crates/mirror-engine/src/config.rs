//! Configuration file loading.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mirror_ipc::SessionConfig;

use crate::{EngineError, EngineResult};

/// Top-level configuration, read from a TOML file.
///
/// Every field is optional; a missing file yields the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `tracing` filter directives. `RUST_LOG` takes precedence.
    pub log_filter: Option<String>,

    /// Address the forwarded stream ports listen on.
    pub host: String,

    /// Session settings.
    pub session: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            host: "127.0.0.1".to_string(),
            session: SessionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate the file at `path`.
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        let session = &self.session;
        let mixer = &session.mixer;

        if mixer.quantum_ms == 0 {
            return Err(EngineError::Config("mixer.quantum_ms must be positive".into()));
        }
        if mixer.interval_ms == 0 {
            return Err(EngineError::Config("mixer.interval_ms must be positive".into()));
        }
        if mixer.target_latency_ms >= mixer.high_water_ms {
            return Err(EngineError::Config(format!(
                "mixer.target_latency_ms ({}) must be below mixer.high_water_ms ({})",
                mixer.target_latency_ms, mixer.high_water_ms
            )));
        }
        for (name, volume) in [
            ("global_volume", session.global_volume),
            ("source_volume", session.source_volume),
        ] {
            if !volume.is_finite() || volume < 0.0 {
                return Err(EngineError::Config(format!("{name} must be a non-negative number")));
            }
        }
        if session.picture_channel_capacity == 0 {
            return Err(EngineError::Config(
                "picture_channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_ipc::StreamKind;

    #[test]
    fn test_empty_file_is_default() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.session.video);
        assert_eq!(config.session.mixer.high_water_ms, 300);
    }

    #[test]
    fn test_partial_override() {
        let config = AppConfig::from_toml_str(
            r#"
            log_filter = "mirror=trace"

            [session]
            video = false
            handshake_on = "Audio"
            audio_output_device = "Headset"

            [session.mixer]
            target_latency_ms = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.log_filter.as_deref(), Some("mirror=trace"));
        assert!(!config.session.video);
        assert_eq!(config.session.handshake_on, StreamKind::Audio);
        assert_eq!(config.session.audio_output_device.as_deref(), Some("Headset"));
        assert_eq!(config.session.mixer.target_latency_ms, 60);
        assert_eq!(config.session.mixer.quantum_ms, 20);
    }

    #[test]
    fn test_rejects_inverted_water_marks() {
        let err = AppConfig::from_toml_str(
            "[session.mixer]\nhigh_water_ms = 100\ntarget_latency_ms = 100\n",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_quantum_and_negative_volume() {
        assert!(AppConfig::from_toml_str("[session.mixer]\nquantum_ms = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[session]\nglobal_volume = -1.0\n").is_err());
    }

    #[test]
    fn test_rejects_unparsable() {
        assert!(AppConfig::from_toml_str("session = 3").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = AppConfig::load(Path::new("/nonexistent/mirror.toml")).unwrap();
        assert!(config.log_filter.is_none());
    }
}
