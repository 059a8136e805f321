//! TOML-backed configuration, validated on load.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub jpeg: JpegConfig,
    pub webrtc: WebRtcConfig,
    pub router: RouterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            camera: CameraConfig::default(),
            jpeg: JpegConfig::default(),
            webrtc: WebRtcConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub bind_ip: String,
    pub port: u16,
    pub ws_ping_interval_secs: u64,
    pub sse_ping_interval_secs: u64,
    pub ws_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            ws_ping_interval_secs: default_ws_ping_interval(),
            sse_ping_interval_secs: default_sse_ping_interval(),
            ws_idle_timeout_secs: default_ws_idle_timeout(),
        }
    }
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_ping_interval() -> u64 {
    60
}
fn default_sse_ping_interval() -> u64 {
    1
}
fn default_ws_idle_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CameraConfig {
    pub device: String,
    pub second_device: Option<String>,
    pub analysis_width: u32,
    pub analysis_height: u32,
    pub min_fps: u32,
    pub max_fps: u32,
    pub lens_close_wait_ms: u64,
    pub open_retry_backoff_secs: Vec<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            second_device: None,
            analysis_width: default_analysis_width(),
            analysis_height: default_analysis_height(),
            min_fps: 30,
            max_fps: 60,
            lens_close_wait_ms: 500,
            open_retry_backoff_secs: vec![1, 2, 3],
        }
    }
}

fn default_analysis_width() -> u32 {
    320
}
fn default_analysis_height() -> u32 {
    240
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct JpegConfig {
    pub quality: u8,
    pub target_width: u32,
    pub target_height: u32,
}

impl Default for JpegConfig {
    fn default() -> Self {
        Self {
            quality: 45,
            target_width: default_analysis_width(),
            target_height: default_analysis_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct WebRtcConfig {
    pub stun_server: String,
    pub filtered_codecs: Vec<String>,
    pub target_width: u32,
    pub target_height: u32,
    pub bitrate_bps: u32,
    pub fps: u32,
    pub ice_timeout_secs: u64,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_server: "stun:stun.l.google.com:19302".to_string(),
            filtered_codecs: vec!["VP8".to_string(), "AV1".to_string()],
            target_width: default_analysis_width(),
            target_height: default_analysis_height(),
            bitrate_bps: 500_000,
            fps: 30,
            ice_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct RouterConfig {
    pub min_frame_interval_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_frame_interval_ms: 100,
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be nonzero".into()));
        }
        if self.camera.analysis_width == 0
            || self.camera.analysis_height == 0
            || self.camera.analysis_width % 2 != 0
            || self.camera.analysis_height % 2 != 0
        {
            return Err(ConfigError::Invalid(
                "camera analysis resolution must be positive and even".into(),
            ));
        }
        if self.jpeg.quality == 0 || self.jpeg.quality > 100 {
            return Err(ConfigError::Invalid(
                "jpeg.quality must be in 1..=100".into(),
            ));
        }
        if self.router.min_frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "router.min-frame-interval-ms must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.camera.analysis_width, 320);
        assert_eq!(cfg.router.min_frame_interval_ms, 100);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml = r#"
            [server]
            port = 9090

            [jpeg]
            quality = 60
        "#;
        let cfg = Config::from_str(toml).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.jpeg.quality, 60);
        assert_eq!(cfg.camera.analysis_width, 320);
    }

    #[test]
    fn rejects_invalid_quality() {
        let toml = r#"
            [jpeg]
            quality = 0
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn rejects_odd_analysis_dimensions() {
        let toml = r#"
            [camera]
            analysis-width = 321
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = Config::default();
        let content = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&content).unwrap();
        assert_eq!(cfg, parsed);
    }
}
