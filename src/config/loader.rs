// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<RecorderConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: RecorderConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${SEGMENT_LENGTH:-60} -> 60 (if SEGMENT_LENGTH not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string())
    }

    /// Validate configuration
    pub fn validate(config: &RecorderConfig) -> Result<()> {
        let settings = &config.recorder;

        if settings.segment_length_seconds == 0 {
            bail!("recorder.segment_length_seconds must be > 0");
        }

        if settings.poll_interval_ms == 0 {
            bail!("recorder.poll_interval_ms must be > 0");
        }

        if settings.skew_bound == 0 {
            bail!("recorder.skew_bound must be > 0");
        }

        if settings.frame_timeout_ms == 0 {
            bail!("recorder.frame_timeout_ms must be > 0");
        }

        if config.storage.compression.level > 4 {
            bail!("storage.compression.level must be 0-4");
        }

        if config.storage.log_root.is_empty() {
            bail!("storage.log_root cannot be empty");
        }

        if settings.streams.is_empty() {
            bail!("recorder.streams must list at least one stream");
        }

        let mut names = HashSet::new();
        for stream in &settings.streams {
            if !names.insert(stream.name.as_str()) {
                bail!("Duplicate stream name: '{}'", stream.name);
            }
            if stream.fps == 0 {
                bail!("stream '{}': fps must be > 0", stream.name);
            }
            if stream.frame_service.is_empty() || stream.filename.is_empty() {
                bail!("stream '{}': frame_service and filename are required", stream.name);
            }
            if let Some(secondary) = &stream.secondary {
                if secondary.width == 0 || secondary.height == 0 {
                    bail!("stream '{}': secondary output size must be > 0", stream.name);
                }
                if secondary.width % 2 != 0 || secondary.height % 2 != 0 {
                    bail!("stream '{}': secondary output size must be even", stream.name);
                }
                if secondary.filename == stream.filename {
                    bail!("stream '{}': secondary filename collides with primary", stream.name);
                }
            }
        }

        for service in &config.services {
            if service.decimation == Some(0) {
                bail!("service '{}': decimation must be > 0", service.name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SEGREC_TEST_VAR", "test_value");

        let input = "log_root: ${SEGREC_TEST_VAR}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, "log_root: test_value");

        std::env::remove_var("SEGREC_TEST_VAR");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("SEGREC_TEST_VAR2");

        let input = "segment_length_seconds: ${SEGREC_TEST_VAR2:-30}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, "segment_length_seconds: 30");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigLoader::validate(&RecorderConfig::default()).is_ok());
    }

    #[test]
    fn test_validation_zero_segment_length() {
        let mut config = RecorderConfig::default();
        config.recorder.segment_length_seconds = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("segment_length_seconds"));
    }

    #[test]
    fn test_validation_duplicate_stream() {
        let mut config = RecorderConfig::default();
        let duplicate = config.recorder.streams[0].clone();
        config.recorder.streams.push(duplicate);

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("Duplicate stream"));
    }

    #[test]
    fn test_validation_odd_secondary_size() {
        let mut config = RecorderConfig::default();
        config.recorder.streams[0] = StreamConfig::new("road", "frame", "fcamera.hevc")
            .with_secondary("qcamera.ts", 527, 330);

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("even"));
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let config = ConfigLoader::parse(
            r#"
storage:
  log_root: /tmp/segments
recorder:
  segment_length_seconds: 5
  streams:
    - name: road
      frame_service: frame
      filename: fcamera.hevc
"#,
        )
        .unwrap();

        assert_eq!(config.storage.log_root, "/tmp/segments");
        assert_eq!(config.recorder.segment_length_seconds, 5);
        assert_eq!(config.recorder.streams.len(), 1);
        assert_eq!(config.recorder.streams[0].fps, 20);
        assert!(config.recorder.streams[0].enabled);
        assert_eq!(config.recorder.camera_patience_ms, 500);
    }
}
