use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl std::str::FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus {other:?}")),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Serve frames from still photos in this directory instead of the camera.
    pub image_dir: Option<PathBuf>,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the embedding encryption key (created on first start).
    pub key_path: PathBuf,
    pub bus: BusKind,
    /// Score threshold for a positive match, in [0, 1].
    pub match_threshold: f32,
    /// Candidates reported per scan.
    pub top_k: usize,
    /// How long a capture waits for a face before giving up.
    pub capture_timeout_secs: u64,
    /// Pause between frame batches that contained no face.
    pub poll_interval_ms: u64,
    pub frames_per_capture: usize,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// How long a result stays on screen before the kiosk is ready again.
    pub result_hold_ms: u64,
    /// Detector score below which candidate boxes are dropped before NMS.
    pub detection_threshold: f32,
    pub min_face_confidence: f32,
    /// Minimum face side in pixels.
    pub min_face_size: f32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = rollcall_core::data_home().join("rollcall");
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            image_dir: None,
            model_dir: rollcall_core::default_model_dir(),
            db_path: data_dir.join("rollcall.db"),
            key_path: data_dir.join("embedding.key"),
            bus: BusKind::Session,
            match_threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            top_k: rollcall_core::DEFAULT_TOP_K,
            capture_timeout_secs: 10,
            poll_interval_ms: 200,
            frames_per_capture: 3,
            warmup_frames: 4,
            result_hold_ms: 3000,
            detection_threshold: rollcall_core::detector::DEFAULT_DETECTION_THRESHOLD,
            min_face_confidence: 0.6,
            min_face_size: 64.0,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file named by `ROLLCALL_CONFIG`, then `ROLLCALL_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_IMAGE_DIR") {
            self.image_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_KEY_PATH") {
            self.key_path = PathBuf::from(v);
        }
        self.bus = env_parse("ROLLCALL_BUS", self.bus);
        self.frame_width = env_parse("ROLLCALL_FRAME_WIDTH", self.frame_width);
        self.frame_height = env_parse("ROLLCALL_FRAME_HEIGHT", self.frame_height);
        self.match_threshold = env_parse("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.top_k = env_parse("ROLLCALL_TOP_K", self.top_k);
        self.capture_timeout_secs =
            env_parse("ROLLCALL_CAPTURE_TIMEOUT_SECS", self.capture_timeout_secs);
        self.poll_interval_ms = env_parse("ROLLCALL_POLL_INTERVAL_MS", self.poll_interval_ms);
        self.frames_per_capture = env_parse("ROLLCALL_FRAMES_PER_CAPTURE", self.frames_per_capture);
        self.warmup_frames = env_parse("ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        self.result_hold_ms = env_parse("ROLLCALL_RESULT_HOLD_MS", self.result_hold_ms);
        self.detection_threshold =
            env_parse("ROLLCALL_DETECTION_THRESHOLD", self.detection_threshold);
        self.min_face_confidence =
            env_parse("ROLLCALL_MIN_FACE_CONFIDENCE", self.min_face_confidence);
        self.min_face_size = env_parse("ROLLCALL_MIN_FACE_SIZE", self.min_face_size);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(invalid("match_threshold", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(invalid("detection_threshold", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.min_face_confidence) {
            return Err(invalid("min_face_confidence", "must be within [0, 1]"));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k", "must be at least 1"));
        }
        if self.frames_per_capture == 0 {
            return Err(invalid("frames_per_capture", "must be at least 1"));
        }
        if self.capture_timeout_secs == 0 {
            return Err(invalid("capture_timeout_secs", "must be at least 1"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(invalid("frame_width/frame_height", "must be non-zero"));
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn quality_gate(&self) -> rollcall_core::QualityGate {
        rollcall_core::QualityGate {
            min_confidence: self.min_face_confidence,
            min_face_size: self.min_face_size,
        }
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

/// Parse an environment variable, keeping `current` when unset or malformed.
fn env_parse<T: std::str::FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                current
            }
        },
        Err(_) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.top_k, 5);
        assert!((config.match_threshold - 0.45).abs() < f32::EPSILON);
        assert!(config.db_path.ends_with("rollcall/rollcall.db"));
    }

    #[test]
    fn test_toml_overrides_some_fields() {
        let config = Config::from_toml(
            r#"
            camera_device = "/dev/video4"
            match_threshold = 0.6
            bus = "system"
            image_dir = "/srv/photos"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert!((config.match_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.bus, BusKind::System);
        assert_eq!(config.image_dir, Some(PathBuf::from("/srv/photos")));
        // untouched fields keep their defaults
        assert_eq!(config.frames_per_capture, 3);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("similarity_threshold = 0.4").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = Config {
            match_threshold: 1.5,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "match_threshold", .. })
        ));
    }

    #[test]
    fn test_env_overrides_toml() {
        let mut config = Config::from_toml("poll_interval_ms = 50\nresult_hold_ms = 100").unwrap();
        std::env::set_var("ROLLCALL_POLL_INTERVAL_MS", "75");
        std::env::set_var("ROLLCALL_RESULT_HOLD_MS", "soon");
        config.apply_env();
        std::env::remove_var("ROLLCALL_POLL_INTERVAL_MS");
        std::env::remove_var("ROLLCALL_RESULT_HOLD_MS");

        assert_eq!(config.poll_interval_ms, 75);
        // unparseable values keep what the file said
        assert_eq!(config.result_hold_ms, 100);
    }

    #[test]
    fn test_detection_threshold() {
        assert!((Config::default().detection_threshold - 0.5).abs() < f32::EPSILON);
        let config = Config::from_toml("detection_threshold = 0.35").unwrap();
        assert!((config.detection_threshold - 0.35).abs() < f32::EPSILON);
        config.validate().unwrap();

        let config = Config {
            detection_threshold: -0.1,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "detection_threshold", .. })
        ));
    }

    #[test]
    fn test_bus_kind_from_str() {
        assert_eq!("SYSTEM".parse::<BusKind>().unwrap(), BusKind::System);
        assert!("tcp".parse::<BusKind>().is_err());
    }

    #[test]
    fn test_model_paths() {
        let config = Config {
            model_dir: PathBuf::from("/opt/models"),
            ..Config::default()
        };
        assert_eq!(config.scrfd_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(config.arcface_model_path(), "/opt/models/w600k_r50.onnx");
    }
}
