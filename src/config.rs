// src/config.rs
//
// One explicit configuration structure, populated once at startup: file
// values first, CLI overrides second, validation before anything runs.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Parser, Debug)]
#[command(
    name = "coopmap",
    about = "Interactive video review: click to record subject coordinates, right-click to annotate"
)]
pub struct CliArgs {
    /// Path to the options file
    #[arg(long, default_value = "config.yaml")]
    pub config: String,
    /// Video file to review (overrides the options file)
    #[arg(long)]
    pub video: Option<String>,
    /// On-screen duration of coordinates and annotations, in seconds
    #[arg(long)]
    pub duration: Option<f64>,
    /// Output folder for observation logs
    #[arg(long)]
    pub out_dir: Option<String>,
    /// Output folder for annotated images
    #[arg(long)]
    pub anno_dir: Option<String>,
    /// Disable pixel-to-physical mapping for this session
    #[arg(long)]
    pub no_3d: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub video: VideoConfig,
    pub keys: KeysConfig,
    pub display: DisplayConfig,
    pub font: FontConfig,
    pub output: OutputConfig,
    pub mapping: MappingConfig,
    pub timestamp: TimestampConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub path: String,
    /// Used when the container reports no frame rate.
    pub fallback_fps: f64,
    pub window_width: i32,
    pub window_height: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    pub exit: String,
    pub clear: String,
    pub pause: String,
    pub screencap: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontConfig {
    /// OpenCV Hershey font index, 0-7.
    pub face: i32,
    pub scale: f64,
    /// RGB; converted to the BGR the drawing calls expect.
    pub color: [u8; 3],
    pub thickness: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub coords_dir: String,
    pub annotations_dir: String,
    pub screencaps_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub three_d: bool,
    pub calibration_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampConfig {
    /// Burnt-in timestamp bounding box: x, y, width, height in pixels.
    pub region: [i32; 4],
    /// Binary threshold applied before recognition.
    pub threshold: f64,
    /// Override for the tesseract executable (Windows installs).
    pub tesseract_cmd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read options file {path}"))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse options file {path}"))?;
        Ok(config)
    }

    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(video) = &args.video {
            self.video.path = video.clone();
        }
        if let Some(duration) = args.duration {
            self.display.duration_secs = duration;
        }
        if let Some(out_dir) = &args.out_dir {
            self.output.coords_dir = out_dir.clone();
        }
        if let Some(anno_dir) = &args.anno_dir {
            self.output.annotations_dir = anno_dir.clone();
        }
        if args.no_3d {
            self.mapping.three_d = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.video.path.trim().is_empty() {
            bail!("no video path configured");
        }
        if !(self.display.duration_secs > 0.0) {
            bail!("display duration must be positive");
        }
        if !(0..=7).contains(&self.font.face) {
            bail!("font face must be 0-7, got {}", self.font.face);
        }

        let dirs = [
            &self.output.coords_dir,
            &self.output.annotations_dir,
            &self.output.screencaps_dir,
        ];
        for (i, a) in dirs.iter().enumerate() {
            for b in dirs.iter().skip(i + 1) {
                if a == b {
                    bail!("output directories must be distinct, got '{a}' twice");
                }
            }
        }

        KeyMap::from_config(&self.keys)?;

        let [_, _, w, h] = self.timestamp.region;
        if w <= 0 || h <= 0 {
            bail!("timestamp region must have positive width and height");
        }
        Ok(())
    }
}

/// A configured single-key binding. Matching is case-insensitive, and the
/// spelling "Esc" is accepted wherever a binding is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding(u8);

impl KeyBinding {
    pub fn parse(spelling: &str) -> Result<Self> {
        let spelling = spelling.trim();
        if spelling.eq_ignore_ascii_case("esc") {
            return Ok(Self(27));
        }
        let mut chars = spelling.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii() && !c.is_ascii_control() => Ok(Self(c as u8)),
            _ => bail!("key binding must be a single character or \"Esc\", got {spelling:?}"),
        }
    }

    pub fn matches(&self, key: i32) -> bool {
        if key < 0 {
            return false;
        }
        // LSByte for cross-platform waitKey compatibility.
        let key = (key & 0xff) as u8;
        key.eq_ignore_ascii_case(&self.0)
    }
}

/// The session's resolved key bindings.
#[derive(Debug, Clone, Copy)]
pub struct KeyMap {
    pub exit: KeyBinding,
    pub clear: KeyBinding,
    pub pause: KeyBinding,
    pub screencap: KeyBinding,
}

impl KeyMap {
    pub fn from_config(keys: &KeysConfig) -> Result<Self> {
        Ok(Self {
            exit: KeyBinding::parse(&keys.exit).context("exit key")?,
            clear: KeyBinding::parse(&keys.clear).context("clear key")?,
            pause: KeyBinding::parse(&keys.pause).context("pause key")?,
            screencap: KeyBinding::parse(&keys.screencap).context("screencap key")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_config() -> Config {
        Config {
            video: VideoConfig {
                path: "test.mp4".to_string(),
                fallback_fps: 25.0,
                window_width: 1344,
                window_height: 760,
            },
            keys: KeysConfig {
                exit: "q".to_string(),
                clear: "c".to_string(),
                pause: "p".to_string(),
                screencap: "s".to_string(),
            },
            display: DisplayConfig { duration_secs: 5.0 },
            font: FontConfig {
                face: 0,
                scale: 1.0,
                color: [0, 255, 0],
                thickness: 2,
            },
            output: OutputConfig {
                coords_dir: "coordinates".to_string(),
                annotations_dir: "annotations".to_string(),
                screencaps_dir: "screencaps".to_string(),
            },
            mapping: MappingConfig {
                three_d: true,
                calibration_path: "calibration.json".to_string(),
            },
            timestamp: TimestampConfig {
                region: [26, 30, 608, 70],
                threshold: 187.0,
                tesseract_cmd: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[test]
    fn test_key_binding_esc_spelling() {
        for spelling in ["Esc", "esc", "ESC"] {
            let binding = KeyBinding::parse(spelling).unwrap();
            assert!(binding.matches(27));
        }
    }

    #[test]
    fn test_key_binding_case_insensitive_match() {
        let binding = KeyBinding::parse("q").unwrap();
        assert!(binding.matches('q' as i32));
        assert!(binding.matches('Q' as i32));
        assert!(!binding.matches('w' as i32));
        assert!(!binding.matches(-1));
    }

    #[test]
    fn test_key_binding_rejects_multi_char() {
        assert!(KeyBinding::parse("quit").is_err());
        assert!(KeyBinding::parse("").is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(mk_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shared_output_dir() {
        let mut config = mk_config();
        config.output.annotations_dir = config.output.coords_dir.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let mut config = mk_config();
        config.display.duration_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides_take_effect() {
        let mut config = mk_config();
        let args = CliArgs {
            config: "config.yaml".to_string(),
            video: Some("other.mp4".to_string()),
            duration: Some(8.0),
            out_dir: None,
            anno_dir: None,
            no_3d: true,
        };
        config.apply_cli(&args);
        assert_eq!(config.video.path, "other.mp4");
        assert!((config.display.duration_secs - 8.0).abs() < f64::EPSILON);
        assert!(!config.mapping.three_d);
    }
}
