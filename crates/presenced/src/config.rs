use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use presence_core::{
    CommandExtractor, EngineConfig, HashExtractor, SignatureExtractor, DEFAULT_LATE_CUTOFF,
    DEFAULT_MATCH_THRESHOLD,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// How signatures are computed from images.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorKind {
    /// Content hash of the image bytes.
    Hash,
    /// External program; argv with an optional `{image}` placeholder.
    Command(Vec<String>),
}

/// Optional TOML file named by `PRESENCE_CONFIG`. Environment variables win.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    late_cutoff: Option<String>,
    extractor: Option<String>,
    extractor_command: Option<Vec<String>>,
    session_bus: Option<bool>,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Confidence a roster entry must strictly exceed to be recognized.
    pub match_threshold: f32,
    /// Check-ins after this time of day are late.
    pub late_cutoff: NaiveTime,
    pub extractor: ExtractorKind,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load the optional config file, then apply `PRESENCE_*` overrides.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("PRESENCE_CONFIG") {
            Ok(path) => read_file(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = env("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&env).join("attendance.db"));

        let match_threshold = env_parse(&env, "PRESENCE_MATCH_THRESHOLD")
            .or(file.match_threshold)
            .filter(|t: &f32| t.is_finite())
            .unwrap_or(DEFAULT_MATCH_THRESHOLD)
            .clamp(0.0, 1.0);

        let late_cutoff = match env("PRESENCE_LATE_CUTOFF").or(file.late_cutoff) {
            Some(text) => parse_cutoff(&text)?,
            None => DEFAULT_LATE_CUTOFF,
        };

        let command = match env("PRESENCE_EXTRACTOR_COMMAND") {
            Some(text) => parse_command(&text)?,
            None => file.extractor_command.unwrap_or_default(),
        };

        let extractor = match env("PRESENCE_EXTRACTOR")
            .or(file.extractor)
            .as_deref()
            .unwrap_or("hash")
        {
            "hash" => ExtractorKind::Hash,
            "command" if command.is_empty() => {
                bail!("extractor \"command\" needs PRESENCE_EXTRACTOR_COMMAND or extractor_command")
            }
            "command" => ExtractorKind::Command(command),
            other => bail!("unknown extractor {other:?} (expected \"hash\" or \"command\")"),
        };

        let session_bus = env("PRESENCE_SESSION_BUS")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .or(file.session_bus)
            .unwrap_or(false);

        Ok(Self {
            db_path,
            match_threshold,
            late_cutoff,
            extractor,
            session_bus,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            match_threshold: self.match_threshold,
            late_cutoff: self.late_cutoff,
        }
    }

    pub fn build_extractor(&self) -> Result<Box<dyn SignatureExtractor>> {
        Ok(match &self.extractor {
            ExtractorKind::Hash => Box::new(HashExtractor),
            ExtractorKind::Command(argv) => Box::new(CommandExtractor::new(argv)?),
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presence")
}

fn parse_cutoff(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .with_context(|| format!("invalid late cutoff {text:?} (expected HH:MM[:SS])"))
}

/// A JSON array of strings keeps arguments containing spaces intact;
/// anything else is split on whitespace.
fn parse_command(text: &str) -> Result<Vec<String>> {
    if text.trim_start().starts_with('[') {
        serde_json::from_str(text)
            .with_context(|| format!("invalid extractor command {text:?} (expected a JSON string array)"))
    } else {
        Ok(text.split_whitespace().map(str::to_string).collect())
    }
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(file: FileConfig, vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_sources(file, move |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(FileConfig::default(), &[("HOME", "/home/ada")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/home/ada/.local/share/presence/attendance.db"));
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(config.late_cutoff, DEFAULT_LATE_CUTOFF);
        assert_eq!(config.extractor, ExtractorKind::Hash);
        assert!(!config.session_bus);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            db_path = "/var/lib/presence/file.db"
            match_threshold = 0.7
            late_cutoff = "08:45"
            session_bus = true
            "#,
        )
        .unwrap();
        let config = load(
            file,
            &[
                ("PRESENCE_DB_PATH", "/srv/env.db"),
                ("PRESENCE_LATE_CUTOFF", "10:00:30"),
            ],
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/env.db"));
        assert_eq!(config.match_threshold, 0.7);
        assert_eq!(config.late_cutoff, NaiveTime::from_hms_opt(10, 0, 30).unwrap());
        assert!(config.session_bus);
    }

    #[test]
    fn test_threshold_clamped_and_garbage_ignored() {
        let config = load(FileConfig::default(), &[("PRESENCE_MATCH_THRESHOLD", "1.7")]).unwrap();
        assert_eq!(config.match_threshold, 1.0);
        let config = load(FileConfig::default(), &[("PRESENCE_MATCH_THRESHOLD", "high")]).unwrap();
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_invalid_cutoff_is_error() {
        assert!(load(FileConfig::default(), &[("PRESENCE_LATE_CUTOFF", "half past nine")]).is_err());
    }

    #[test]
    fn test_command_extractor() {
        let config = load(
            FileConfig::default(),
            &[
                ("PRESENCE_EXTRACTOR", "command"),
                ("PRESENCE_EXTRACTOR_COMMAND", "python3 face_encode.py encode {image}"),
            ],
        )
        .unwrap();
        assert_eq!(
            config.extractor,
            ExtractorKind::Command(vec![
                "python3".into(),
                "face_encode.py".into(),
                "encode".into(),
                "{image}".into()
            ])
        );
        assert_eq!(config.build_extractor().unwrap().name(), "command");
    }

    #[test]
    fn test_command_extractor_json_argv() {
        let config = load(
            FileConfig::default(),
            &[
                ("PRESENCE_EXTRACTOR", "command"),
                (
                    "PRESENCE_EXTRACTOR_COMMAND",
                    r#"["/opt/face tools/encode", "--model", "large v2"]"#,
                ),
            ],
        )
        .unwrap();
        assert_eq!(
            config.extractor,
            ExtractorKind::Command(vec![
                "/opt/face tools/encode".into(),
                "--model".into(),
                "large v2".into()
            ])
        );
        assert!(load(
            FileConfig::default(),
            &[("PRESENCE_EXTRACTOR_COMMAND", r#"["unterminated"#)]
        )
        .is_err());
    }

    #[test]
    fn test_command_extractor_without_command() {
        assert!(load(FileConfig::default(), &[("PRESENCE_EXTRACTOR", "command")]).is_err());
        assert!(load(FileConfig::default(), &[("PRESENCE_EXTRACTOR", "onnx")]).is_err());
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        assert!(toml::from_str::<FileConfig>("threshold = 0.5").is_err());
    }
}
