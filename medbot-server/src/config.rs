use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use medbot_core::AnalysisProgram;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 4001;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Scripts backing each analysis route.
#[derive(Debug, Clone)]
pub struct AnalysisPrograms {
    pub ask_ai: AnalysisProgram,
    pub analyze_text: AnalysisProgram,
    pub analyze_image: AnalysisProgram,
    pub extract_entities: AnalysisProgram,
}

/// Output shape of the server's log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// `pretty` selects human-readable output; anything else keeps JSON.
    fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Signing secret for login tokens. Left unset, login fails at runtime.
    pub jwt_secret: Option<String>,
    pub database_url: Option<String>,
    pub upload_dir: PathBuf,
    pub programs: AnalysisPrograms,
    pub analysis_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub password_hash_iterations: u32,
    pub log_format: LogFormat,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup, so tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let python = get("PYTHON_BIN").unwrap_or_else(|| "python3".to_string());
        let program = |key: &str, default: &str| {
            AnalysisProgram::new(&python, get(key).unwrap_or_else(|| default.to_string()))
        };

        Ok(Self {
            port: parse(&lookup, "PORT", DEFAULT_PORT)?,
            jwt_secret: get("JWT_SECRET"),
            database_url: get("DATABASE_URL"),
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            programs: AnalysisPrograms {
                ask_ai: program("ASK_AI_SCRIPT", "ask_ai.py"),
                analyze_text: program("ANALYZE_TEXT_SCRIPT", "scripts/analyze_text.py"),
                analyze_image: program("ANALYZE_IMAGE_SCRIPT", "scripts/analyze_image.py"),
                extract_entities: program(
                    "EXTRACT_ENTITIES_SCRIPT",
                    "scripts/extract_entities.py",
                ),
            },
            analysis_timeout: Duration::from_secs(parse(&lookup, "ANALYSIS_TIMEOUT_SECS", 120)?),
            rate_limit: RateLimitConfig {
                max_requests: parse(&lookup, "RATE_LIMIT_MAX", 100)?,
                window: Duration::from_secs(parse(&lookup, "RATE_LIMIT_WINDOW_SECS", 15 * 60)?),
            },
            password_hash_iterations: parse(&lookup, "PASSWORD_HASH_ITERATIONS", 100_000)?,
            log_format: LogFormat::from_setting(lookup("LOG_FORMAT").as_deref()),
        })
    }
}

fn parse<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
