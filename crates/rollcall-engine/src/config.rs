use crate::error::EngineError;
use rollcall_core::{FitMode, LiveSettings, RenderSize};
use rollcall_hw::{CameraConstraints, FrameEncoder};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Client configuration, loaded from environment variables and an optional TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Attendance API root (default: http://localhost:5000/api).
    pub api_url: String,
    /// Bearer credential attached to every request.
    pub token: Option<String>,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Size of the preview the overlay is drawn on. Defaults to the camera size.
    pub render_width: u32,
    pub render_height: u32,
    pub enroll_interval_ms: u64,
    pub verify_interval_ms: u64,
    /// How long an overlay box survives without a fresh detection.
    pub overlay_hold_ms: u64,
    pub match_display_ms: u64,
    pub unknown_display_ms: u64,
    pub request_timeout_secs: u64,
    pub jpeg_quality: u8,
    /// Length of the recent-matches list.
    pub recent_limit: usize,
    pub overlay_fit: FitMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            token: None,
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            render_width: 640,
            render_height: 480,
            enroll_interval_ms: 300,
            verify_interval_ms: 1500,
            overlay_hold_ms: 2500,
            match_display_ms: 2000,
            unknown_display_ms: 1000,
            request_timeout_secs: 10,
            jpeg_quality: 90,
            recent_limit: 10,
            overlay_fit: FitMode::Stretch,
        }
    }
}

/// Optional overrides read from `ROLLCALL_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    token: Option<String>,
    camera_device: Option<String>,
    camera_width: Option<u32>,
    camera_height: Option<u32>,
    render_width: Option<u32>,
    render_height: Option<u32>,
    enroll_interval_ms: Option<u64>,
    verify_interval_ms: Option<u64>,
    overlay_hold_ms: Option<u64>,
    match_display_ms: Option<u64>,
    unknown_display_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    jpeg_quality: Option<u8>,
    recent_limit: Option<usize>,
    overlay_fit: Option<String>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `from_env`, then the TOML file named by `ROLLCALL_CONFIG` if set.
    pub fn load() -> Result<Self, EngineError> {
        let mut config = Self::from_env();
        if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let camera_width = env_parse(&lookup, "ROLLCALL_CAMERA_WIDTH", d.camera_width);
        let camera_height = env_parse(&lookup, "ROLLCALL_CAMERA_HEIGHT", d.camera_height);

        let overlay_fit = match lookup("ROLLCALL_OVERLAY_FIT") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring ROLLCALL_OVERLAY_FIT");
                d.overlay_fit
            }),
            None => d.overlay_fit,
        };

        Self {
            api_url: lookup("ROLLCALL_API_URL").unwrap_or(d.api_url),
            token: lookup("ROLLCALL_TOKEN").filter(|t| !t.is_empty()),
            camera_device: lookup("ROLLCALL_CAMERA_DEVICE").unwrap_or(d.camera_device),
            camera_width,
            camera_height,
            render_width: env_parse(&lookup, "ROLLCALL_RENDER_WIDTH", camera_width),
            render_height: env_parse(&lookup, "ROLLCALL_RENDER_HEIGHT", camera_height),
            enroll_interval_ms: env_parse(&lookup, "ROLLCALL_ENROLL_INTERVAL_MS", d.enroll_interval_ms),
            verify_interval_ms: env_parse(&lookup, "ROLLCALL_VERIFY_INTERVAL_MS", d.verify_interval_ms),
            overlay_hold_ms: env_parse(&lookup, "ROLLCALL_OVERLAY_HOLD_MS", d.overlay_hold_ms),
            match_display_ms: env_parse(&lookup, "ROLLCALL_MATCH_DISPLAY_MS", d.match_display_ms),
            unknown_display_ms: env_parse(&lookup, "ROLLCALL_UNKNOWN_DISPLAY_MS", d.unknown_display_ms),
            request_timeout_secs: env_parse(&lookup, "ROLLCALL_REQUEST_TIMEOUT_SECS", d.request_timeout_secs),
            jpeg_quality: env_parse(&lookup, "ROLLCALL_JPEG_QUALITY", d.jpeg_quality),
            recent_limit: env_parse(&lookup, "ROLLCALL_RECENT_LIMIT", d.recent_limit),
            overlay_fit,
        }
    }

    /// Override fields with the ones present in a TOML file.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        self.apply_toml(&raw)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "configuration file applied");
        Ok(())
    }

    fn apply_toml(&mut self, raw: &str) -> Result<(), String> {
        let file: FileConfig = toml::from_str(raw).map_err(|e| e.to_string())?;

        // Render size follows a camera size set here unless the file sets it too.
        if let (Some(w), None) = (file.camera_width, file.render_width) {
            self.render_width = w;
        }
        if let (Some(h), None) = (file.camera_height, file.render_height) {
            self.render_height = h;
        }

        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(v) = file.$field { self.$field = v; })*
            };
        }
        take!(
            api_url,
            camera_device,
            camera_width,
            camera_height,
            render_width,
            render_height,
            enroll_interval_ms,
            verify_interval_ms,
            overlay_hold_ms,
            match_display_ms,
            unknown_display_ms,
            request_timeout_secs,
            jpeg_quality,
            recent_limit
        );
        if let Some(token) = file.token {
            self.token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(fit) = file.overlay_fit {
            self.overlay_fit = fit.parse()?;
        }
        Ok(())
    }

    pub fn enroll_interval(&self) -> Duration {
        Duration::from_millis(self.enroll_interval_ms.max(1))
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn camera_constraints(&self) -> CameraConstraints {
        CameraConstraints::new(self.camera_device.clone()).with_size(self.camera_width, self.camera_height)
    }

    pub fn encoder(&self) -> FrameEncoder {
        FrameEncoder::new(self.jpeg_quality)
    }

    pub fn live_settings(&self) -> LiveSettings {
        LiveSettings {
            hold: Duration::from_millis(self.overlay_hold_ms),
            match_display: Duration::from_millis(self.match_display_ms),
            unknown_display: Duration::from_millis(self.unknown_display_ms),
            recent_limit: self.recent_limit,
            render: RenderSize::new(self.render_width as f32, self.render_height as f32),
            fit: self.overlay_fit,
        }
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::from_lookup(lookup(&[]));
        assert_eq!(c, Config::default());
        assert_eq!(c.verify_interval(), Duration::from_millis(1500));
        assert_eq!(c.enroll_interval(), Duration::from_millis(300));
        assert_eq!(c.live_settings().hold, Duration::from_millis(2500));
    }

    #[test]
    fn test_env_overrides() {
        let c = Config::from_lookup(lookup(&[
            ("ROLLCALL_API_URL", "https://att.example.edu/api"),
            ("ROLLCALL_TOKEN", "abc"),
            ("ROLLCALL_CAMERA_WIDTH", "1280"),
            ("ROLLCALL_CAMERA_HEIGHT", "720"),
            ("ROLLCALL_VERIFY_INTERVAL_MS", "2000"),
            ("ROLLCALL_OVERLAY_FIT", "cover"),
        ]));
        assert_eq!(c.api_url, "https://att.example.edu/api");
        assert_eq!(c.token.as_deref(), Some("abc"));
        // Render size follows the camera unless set.
        assert_eq!((c.render_width, c.render_height), (1280, 720));
        assert_eq!(c.verify_interval_ms, 2000);
        assert_eq!(c.overlay_fit, FitMode::Cover);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let c = Config::from_lookup(lookup(&[
            ("ROLLCALL_JPEG_QUALITY", "high"),
            ("ROLLCALL_OVERLAY_FIT", "zoom"),
            ("ROLLCALL_TOKEN", ""),
        ]));
        assert_eq!(c.jpeg_quality, 90);
        assert_eq!(c.overlay_fit, FitMode::Stretch);
        assert!(c.token.is_none());
    }

    #[test]
    fn test_toml_overrides() {
        let mut c = Config::default();
        c.apply_toml(
            r#"
            api_url = "http://10.0.0.2:5000/api"
            verify_interval_ms = 1000
            overlay_fit = "cover"
            "#,
        )
        .unwrap();
        assert_eq!(c.api_url, "http://10.0.0.2:5000/api");
        assert_eq!(c.verify_interval_ms, 1000);
        assert_eq!(c.overlay_fit, FitMode::Cover);
        assert_eq!(c.enroll_interval_ms, 300);
    }

    #[test]
    fn test_toml_camera_size_carries_render_size() {
        let mut c = Config::default();
        c.apply_toml("camera_width = 1280\ncamera_height = 720").unwrap();
        assert_eq!((c.render_width, c.render_height), (1280, 720));
        assert_eq!(c.live_settings().render, RenderSize::new(1280.0, 720.0));

        let mut c = Config::default();
        c.apply_toml("camera_width = 1280\ncamera_height = 720\nrender_width = 320\nrender_height = 240")
            .unwrap();
        assert_eq!((c.camera_width, c.camera_height), (1280, 720));
        assert_eq!((c.render_width, c.render_height), (320, 240));
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let mut c = Config::default();
        assert!(c.apply_toml("similarity_threshold = 0.4").is_err());
    }
}
