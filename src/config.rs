//! Configuration file handling

use std::collections::HashSet;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sportsmatrix_core::BoardConfig;
use tracing::info;

use crate::error::ConfigError;
use crate::pattern::Color;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matrix: MatrixConfig,
    pub boards: Vec<PatternBoardConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            matrix: MatrixConfig::default(),
            boards: vec![PatternBoardConfig {
                name: "pattern".into(),
                colors: default_colors(),
                board: BoardConfig::default(),
            }],
        }
    }
}

impl Config {
    /// Get the config file path for this platform
    pub fn path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sportsmatrix").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load config from the platform path, or create a default if it doesn't
    /// exist
    pub fn load_or_create() -> Result<Self, Box<dyn Error>> {
        let path = Self::path().ok_or("could not determine config directory")?;

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save_with_header(&path)?;
            info!("created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Load and normalise config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn Error>> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.matrix.hardware.normalise();
        Ok(config)
    }

    /// Save config with header comments for new files
    pub fn save_with_header(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let header = r#"# sportsmatrix configuration file
# durations accept human readable values such as "5s" or "1m 30s"
# scroll_loops = 1 plays a board's scroll strip once per turn, 0 keeps
# scrolling until the board is interrupted

"#;
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, format!("{header}{contents}"))?;
        Ok(())
    }

    /// Check values that serde accepts but the matrix cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matrix.hardware.validate()?;
        let mut seen = HashSet::new();
        for board in &self.boards {
            if !seen.insert(board.name.as_str()) {
                return Err(ConfigError::DuplicateBoard(board.name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Register the preview canvas for the web UI
    pub serve_web_ui: bool,
    pub http_listen_port: u16,
    /// Preview canvas width, height is half of it
    pub web_board_width: u32,
    /// Cron expressions that blank the display
    pub screen_off_times: Vec<String>,
    /// Cron expressions that turn the display back on
    pub screen_on_times: Vec<String>,
    /// Minimum time a board stays on screen
    #[serde(with = "humantime_serde")]
    pub min_dwell: Duration,
    /// Renders running longer than this are logged
    #[serde(with = "humantime_serde")]
    pub watchdog: Duration,
    /// Poll interval while every board is disabled
    #[serde(with = "humantime_serde")]
    pub idle_poll: Duration,
    /// Schedule evaluation interval
    #[serde(with = "humantime_serde")]
    pub timer_poll: Duration,
    pub hardware: HardwareConfig,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            serve_web_ui: true,
            http_listen_port: 8080,
            web_board_width: 800,
            screen_off_times: Vec::new(),
            screen_on_times: Vec::new(),
            min_dwell: Duration::from_secs(5),
            watchdog: Duration::from_secs(5 * 60),
            idle_poll: Duration::from_secs(1),
            timer_poll: Duration::from_secs(1),
            hardware: HardwareConfig::default(),
        }
    }
}

impl MatrixConfig {
    /// Geometry of the preview canvas
    pub fn preview_size(&self) -> (u32, u32) {
        (self.web_board_width, self.web_board_width / 2)
    }
}

pub const DEFAULT_BRIGHTNESS: u8 = 60;

/// LED matrix driver options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub rows: u32,
    pub cols: u32,
    pub brightness: u8,
    pub hardware_mapping: String,
    pub chain_length: u32,
    pub parallel: u32,
    pub pwm_bits: u8,
    pub pwm_lsb_nanoseconds: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            rows: 32,
            cols: 64,
            brightness: DEFAULT_BRIGHTNESS,
            hardware_mapping: "adafruit-hat-pwm".into(),
            chain_length: 1,
            parallel: 1,
            pwm_bits: 11,
            pwm_lsb_nanoseconds: 130,
        }
    }
}

impl HardwareConfig {
    /// Replace unset and driver-default brightness with ours
    pub fn normalise(&mut self) {
        if self.brightness == 0 || self.brightness == 100 {
            self.brightness = DEFAULT_BRIGHTNESS;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows == 0 || self.cols == 0 || self.chain_length == 0 || self.parallel == 0 {
            return Err(ConfigError::InvalidHardware(format!(
                "geometry must be non-zero, got {}x{} chain {} parallel {}",
                self.rows, self.cols, self.chain_length, self.parallel
            )));
        }
        if self.brightness > 100 {
            return Err(ConfigError::InvalidHardware(format!(
                "brightness {} is over 100",
                self.brightness
            )));
        }
        if !(1..=11).contains(&self.pwm_bits) {
            return Err(ConfigError::InvalidHardware(format!(
                "pwm_bits {} is outside 1..=11",
                self.pwm_bits
            )));
        }
        Ok(())
    }

    /// Pixel size of the full chained panel
    pub fn size(&self) -> (u32, u32) {
        (self.cols * self.chain_length, self.rows * self.parallel)
    }
}

/// A test pattern board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternBoardConfig {
    pub name: String,
    #[serde(default = "default_colors")]
    pub colors: Vec<Color>,
    #[serde(flatten)]
    pub board: BoardConfig,
}

fn default_colors() -> Vec<Color> {
    vec![Color([255, 0, 0]), Color([0, 255, 0]), Color([0, 0, 255])]
}
