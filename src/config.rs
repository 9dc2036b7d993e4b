//! Configuration of the console's caches, timers and logging.

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt, fs};

use log::{error, LevelFilter};
use serde::de;
use serde::{Deserialize, Deserializer};

use crate::constants::*;
use crate::model::Domain;

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        match env::var(CONFIGTX_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!("Unrecognized value for log level in env var {CONFIGTX_ENV_LOG_LEVEL}, using info");
                    LevelFilter::Info
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./configtx.log")
    }

    fn auto_refresh() -> bool {
        true
    }

    fn refresh_seconds() -> u64 {
        DEFAULT_REFRESH_SECONDS
    }

    fn queries_refresh_seconds() -> u64 {
        DEFAULT_QUERIES_REFRESH_SECONDS
    }

    fn sessions_refresh_seconds() -> u64 {
        DEFAULT_SESSIONS_REFRESH_SECONDS
    }

    fn event_channel_capacity() -> usize {
        DEFAULT_EVENT_CHANNEL_CAPACITY
    }
}

//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::log_level", deserialize_with = "de_level_filter")]
    log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    log_file: PathBuf,

    /// Start refresh timers for the runtime domains when a connection is
    /// initialized. Without it they are only refreshed on access.
    #[serde(default = "ConfigDefaults::auto_refresh")]
    pub auto_refresh: bool,

    /// Refresh period for timed managers without a period of their own.
    #[serde(default = "ConfigDefaults::refresh_seconds")]
    pub refresh_seconds: u64,

    #[serde(default = "ConfigDefaults::queries_refresh_seconds")]
    pub queries_refresh_seconds: u64,

    #[serde(default = "ConfigDefaults::sessions_refresh_seconds")]
    pub sessions_refresh_seconds: u64,

    /// How many change events a slow receiver may fall behind.
    #[serde(default = "ConfigDefaults::event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: ConfigDefaults::log_file(),
            auto_refresh: ConfigDefaults::auto_refresh(),
            refresh_seconds: ConfigDefaults::refresh_seconds(),
            queries_refresh_seconds: ConfigDefaults::queries_refresh_seconds(),
            sessions_refresh_seconds: ConfigDefaults::sessions_refresh_seconds(),
            event_channel_capacity: ConfigDefaults::event_channel_capacity(),
        }
    }
}

/// # Accessors
impl Config {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    /// The refresh timer period for a domain.
    pub fn refresh_period(&self, domain: Domain) -> Duration {
        let seconds = match domain {
            Domain::Queries => self.queries_refresh_seconds,
            Domain::Sessions => self.sessions_refresh_seconds,
            Domain::Hosts
            | Domain::Connectors
            | Domain::AuthProviders
            | Domain::Entitlements
            | Domain::Extensions => self.refresh_seconds,
        };
        Duration::from_secs(seconds)
    }
}

/// # Create
impl Config {
    /// A config for tests, logging at debug level to stderr.
    pub fn test() -> Self {
        Config {
            log_level: LevelFilter::Debug,
            log_type: LogType::Stderr,
            ..Default::default()
        }
    }

    pub fn read_config(file: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = file.as_ref();
        let s = fs::read_to_string(file)?;
        let config: Config = toml::from_str(&s)?;
        config.verify()?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.refresh_seconds < 1 {
            return Err(ConfigError::other("refresh_seconds must be at least 1"));
        }
        if self.queries_refresh_seconds < 1 {
            return Err(ConfigError::other("queries_refresh_seconds must be at least 1"));
        }
        if self.sessions_refresh_seconds < 1 {
            return Err(ConfigError::other("sessions_refresh_seconds must be at least 1"));
        }
        if self.event_channel_capacity < 1 {
            return Err(ConfigError::other("event_channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
        }
    }

    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init stderr logging: {e}")))
    }

    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!("Failed to open log file '{}': {}", path.display(), err);
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init file logging: {e}")))
    }

    fn fern_logger(&self) -> fern::Dispatch {
        // tokio is chatty at trace
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("tokio", framework_level)
            .level_for("mio", framework_level)
    }
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\" or \"file\", found : \"{string}\""
            ))),
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_gives_defaults() {
        let file = write_config("");
        let config = Config::read_config(file.path()).unwrap();
        assert!(config.auto_refresh);
        assert_eq!(Duration::from_secs(60), config.refresh_period(Domain::Hosts));
        assert_eq!(Duration::from_secs(5), config.refresh_period(Domain::Queries));
        assert_eq!(Duration::from_secs(10), config.refresh_period(Domain::Sessions));
        assert_eq!(64, config.event_channel_capacity);
    }

    #[test]
    fn values_from_file() {
        let file = write_config(
            r#"
            log_level = "trace"
            log_type = "file"
            log_file = "/tmp/configtx-test.log"
            auto_refresh = false
            queries_refresh_seconds = 2
            "#,
        );
        let config = Config::read_config(file.path()).unwrap();
        assert_eq!(LevelFilter::Trace, config.log_level());
        assert_eq!(LogType::File, config.log_type);
        assert!(!config.auto_refresh);
        assert_eq!(Duration::from_secs(2), config.refresh_period(Domain::Queries));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file = write_config("sessions_refresh_seconds = 0");
        assert!(matches!(Config::read_config(file.path()), Err(ConfigError::Other(_))));

        let file = write_config("log_type = \"syslog\"");
        assert!(matches!(Config::read_config(file.path()), Err(ConfigError::TomlError(_))));

        assert!(matches!(
            Config::read_config("/no/such/configtx.conf"),
            Err(ConfigError::IoError(_))
        ));
    }
}
