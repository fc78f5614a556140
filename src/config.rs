//! Configuration types, read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::intake::ResumeStyle;

/// Value of `CVILO_DB_PATH` that selects the in-memory store.
pub const MEMORY_DB: &str = ":memory:";

/// Telegram channel configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric ids; `*` admits everyone.
    pub allowed_users: Vec<String>,
}

/// Redelivery policy for messages whose processing hit a store failure.
///
/// A failing message is retried until it succeeds or shutdown is
/// requested; later messages wait behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub base_backoff: Duration,
    /// Upper bound for a single wait between attempts.
    pub max_backoff: Duration,
    /// Failed attempts after this many are logged at error.
    pub alert_after: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            alert_after: 3,
        }
    }
}

impl DeliveryConfig {
    /// Wait before retry number `attempt` (1-based): the base doubled per
    /// earlier failure, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_backoff)
    }
}

/// Idle-draft sweeper settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Incomplete drafts untouched for this long are deleted.
    pub idle_after: Duration,
    pub interval: Duration,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram: Option<TelegramConfig>,
    pub cli_enabled: bool,
    pub db_path: String,
    pub http_port: u16,
    pub delivery: DeliveryConfig,
    /// `None` disables the sweeper.
    pub sweeper: Option<SweeperConfig>,
    pub log_dir: Option<PathBuf>,
    pub resume_style: ResumeStyle,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telegram = get("TELEGRAM_BOT_TOKEN").map(|token| TelegramConfig {
            bot_token: SecretString::from(token.trim().to_string()),
            allowed_users: get("TELEGRAM_ALLOWED_USERS")
                .unwrap_or_else(|| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        });

        let cli_enabled = match get("CVILO_CLI") {
            Some(raw) => parse_bool("CVILO_CLI", &raw)?,
            None => telegram.is_none(),
        };

        let delivery = DeliveryConfig {
            base_backoff: Duration::from_millis(parse_or(
                "CVILO_RETRY_BACKOFF_MS",
                get("CVILO_RETRY_BACKOFF_MS"),
                500,
            )?),
            max_backoff: Duration::from_millis(parse_or(
                "CVILO_RETRY_MAX_BACKOFF_MS",
                get("CVILO_RETRY_MAX_BACKOFF_MS"),
                30_000,
            )?),
            alert_after: parse_or("CVILO_RETRY_ALERT_AFTER", get("CVILO_RETRY_ALERT_AFTER"), 3)?,
        };
        if delivery.alert_after == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CVILO_RETRY_ALERT_AFTER".into(),
                message: "must be at least 1".into(),
            });
        }
        if delivery.max_backoff < delivery.base_backoff {
            return Err(ConfigError::InvalidValue {
                key: "CVILO_RETRY_MAX_BACKOFF_MS".into(),
                message: "must not be below CVILO_RETRY_BACKOFF_MS".into(),
            });
        }

        let sweeper = match get("CVILO_DRAFT_IDLE_HOURS") {
            Some(raw) => {
                let hours: u64 = parse("CVILO_DRAFT_IDLE_HOURS", &raw)?;
                let interval_secs =
                    parse_or("CVILO_SWEEP_INTERVAL_SECS", get("CVILO_SWEEP_INTERVAL_SECS"), 600)?;
                Some(SweeperConfig {
                    idle_after: Duration::from_secs(hours * 3600),
                    interval: Duration::from_secs(interval_secs),
                })
            }
            None => None,
        };

        let defaults = ResumeStyle::default();

        Ok(Self {
            telegram,
            cli_enabled,
            db_path: get("CVILO_DB_PATH").unwrap_or_else(|| "./data/cvilo.db".to_string()),
            http_port: parse_or("CVILO_HTTP_PORT", get("CVILO_HTTP_PORT"), 8080)?,
            delivery,
            sweeper,
            log_dir: get("CVILO_LOG_DIR").map(PathBuf::from),
            resume_style: ResumeStyle {
                template: get("CVILO_RESUME_TEMPLATE").unwrap_or(defaults.template),
                theme: get("CVILO_RESUME_THEME").unwrap_or(defaults.theme),
            },
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.db_path == MEMORY_DB
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map_or(Ok(default), |raw| parse(key, &raw))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?} is not a boolean"),
        }),
    }
}
