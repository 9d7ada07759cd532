//! Command-line, environment and file configuration.
//!
//! Precedence: CLI flag > environment variable > `config.toml` in the data
//! directory > built-in default.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::toast::Language;

/// Terminal client for the plaza social network.
///
/// Configuration can be set via CLI arguments, environment variables or
/// `config.toml` in the data directory, in that order of precedence.
#[derive(Parser, Debug, Default)]
#[command(name = "plaza", version, about)]
pub struct Cli {
    /// Backend base URL [env: PLAZA_URL]
    #[arg(long, short = 'u')]
    pub url: Option<String>,

    /// Public (anon) API key [env: PLAZA_ANON_KEY]
    #[arg(long, short = 'k')]
    pub anon_key: Option<String>,

    /// Data directory for the session database and config [env: PLAZA_HOME] [default: ~/.plaza]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// Interface language, `ar` or `en` [env: PLAZA_LANG] [default: ar]
    #[arg(long, short = 'l')]
    pub lang: Option<String>,

    /// Do not open the realtime connection
    #[arg(long)]
    pub no_realtime: bool,

    /// Log to stderr instead of `plaza.log` in the data directory
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Contents of `{data_dir}/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(String),
    MissingUrl,
    MissingAnonKey,
    Language(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "io error: {e}"),
            ConfigError::Toml(e) => write!(f, "config.toml error: {e}"),
            ConfigError::MissingUrl => {
                write!(f, "no backend URL: pass --url, set PLAZA_URL or add url to config.toml")
            }
            ConfigError::MissingAnonKey => write!(
                f,
                "no anon key: pass --anon-key, set PLAZA_ANON_KEY or add anon_key to config.toml"
            ),
            ConfigError::Language(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("plaza.log")
}

/// Load `config.toml`, or defaults when it does not exist.
pub fn load_file_config(data_dir: &Path) -> Result<FileConfig, ConfigError> {
    let path = config_path(data_dir);
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    toml::from_str(&contents).map_err(|e| ConfigError::Toml(e.to_string()))
}

pub fn save_file_config(data_dir: &Path, config: &FileConfig) -> Result<(), ConfigError> {
    std::fs::create_dir_all(data_dir)?;
    let contents = toml::to_string_pretty(config).map_err(|e| ConfigError::Toml(e.to_string()))?;
    std::fs::write(config_path(data_dir), contents)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub url: String,
    pub anon_key: String,
    pub data_dir: PathBuf,
    pub language: Language,
    pub realtime: bool,
    pub verbose: bool,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Result<Self, ConfigError> {
        Self::resolve(cli, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve<F>(cli: Cli, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = cli
            .data_dir
            .or_else(|| env("PLAZA_HOME").map(PathBuf::from))
            .unwrap_or_else(|| {
                env("HOME")
                    .map(|h| PathBuf::from(h).join(".plaza"))
                    .unwrap_or_else(|| PathBuf::from(".plaza"))
            });
        let file = load_file_config(&data_dir)?;

        let url = cli
            .url
            .or_else(|| env("PLAZA_URL"))
            .or(file.url)
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::MissingUrl)?;

        let anon_key = cli
            .anon_key
            .or_else(|| env("PLAZA_ANON_KEY"))
            .or(file.anon_key)
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingAnonKey)?;

        let language = match cli.lang.or_else(|| env("PLAZA_LANG")).or(file.lang) {
            Some(code) => code.parse().map_err(ConfigError::Language)?,
            None => Language::default(),
        };

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            data_dir,
            language,
            realtime: !cli.no_realtime,
            verbose: cli.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "plaza-config-{tag}-{}-{}",
            std::process::id(),
            crate::model::now_millis()
        ))
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let dir = temp_dir("precedence");
        save_file_config(
            &dir,
            &FileConfig {
                url: Some("https://file.example".into()),
                anon_key: Some("file-key".into()),
                lang: Some("en".into()),
            },
        )
        .unwrap();

        let cli = Cli {
            data_dir: Some(dir.clone()),
            url: Some("https://cli.example/".into()),
            ..Default::default()
        };
        let env = env_of(&[("PLAZA_URL", "https://env.example"), ("PLAZA_ANON_KEY", "env-key")]);
        let config = Config::resolve(cli, env).unwrap();

        assert_eq!(config.url, "https://cli.example");
        assert_eq!(config.anon_key, "env-key");
        assert_eq!(config.language, Language::English);
        assert!(config.realtime);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_url_is_an_error() {
        let dir = temp_dir("missing");
        let cli = Cli {
            data_dir: Some(dir),
            ..Default::default()
        };
        assert!(matches!(
            Config::resolve(cli, env_of(&[])),
            Err(ConfigError::MissingUrl)
        ));
    }

    #[test]
    fn data_dir_defaults_under_home() {
        let home = temp_dir("home");
        let env = env_of(&[
            ("HOME", home.to_str().unwrap()),
            ("PLAZA_URL", "https://x.example"),
            ("PLAZA_ANON_KEY", "k"),
            ("PLAZA_LANG", "ar"),
        ]);
        let config = Config::resolve(Cli::default(), env).unwrap();
        assert_eq!(config.data_dir, home.join(".plaza"));
        assert_eq!(config.language, Language::Arabic);
    }

    #[test]
    fn bad_language_is_rejected() {
        let cli = Cli {
            data_dir: Some(temp_dir("lang")),
            url: Some("https://x.example".into()),
            anon_key: Some("k".into()),
            lang: Some("fr".into()),
            ..Default::default()
        };
        assert!(matches!(
            Config::resolve(cli, env_of(&[])),
            Err(ConfigError::Language(_))
        ));
    }
}
