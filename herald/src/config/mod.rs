//! Service configuration.
//!
//! Values come from process environment variables (optionally seeded from a
//! `.env` file by the binary). Every setting has a default except the provider
//! endpoints, which are required only for the channels that are enabled.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:herald.db?mode=rwc";

/// Achievement sub-types whose notifications are switched off.
#[derive(Debug, Clone, Default)]
pub struct DisabledAchievements {
    pub badges: HashSet<String>,
    pub levels: HashSet<String>,
    pub roles: HashSet<String>,
}

/// Retention windows for the bookkeeping tables.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// How long `sent_notifications` / `sent_announcements` rows are kept.
    pub ledger: Duration,
    /// How long postponed notifications wait for a replay before being dropped.
    pub postponed: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ledger: Duration::from_secs(24 * 60 * 60),
            postponed: Duration::from_secs(30 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// HTTP endpoints of the delivery providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderEndpoints {
    pub push_gateway_url: Option<String>,
    pub email_gateway_url: Option<String>,
    pub inapp_feed_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HeraldConfig {
    pub database_url: String,
    pub deeplink_scheme: String,
    pub ping_cooldown: Duration,
    pub disabled_achievements: DisabledAchievements,
    /// Badge unlocks go to the in-app feed only.
    pub disable_badge_unlocked_push_or_analytics: bool,
    /// Deployment switch for in-app delivery and in-app auth tokens.
    pub inapp_enabled: bool,
    /// Deployment switch for email fallback when push is unavailable.
    pub email_fallback_enabled: bool,
    pub templates_dir: PathBuf,
    pub assets_base_url: String,
    pub providers: ProviderEndpoints,
    /// Upper bound for a single provider call.
    pub provider_timeout: Duration,
    /// Deadline for handling one inbound event.
    pub event_timeout: Duration,
    pub worker_concurrency: usize,
    pub retention: RetentionConfig,
    /// Delay applied to the second-generation adoption broadcast topics.
    pub adoption_v2_delay: Duration,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            deeplink_scheme: "ice".to_string(),
            ping_cooldown: Duration::from_secs(5 * 60),
            disabled_achievements: DisabledAchievements::default(),
            disable_badge_unlocked_push_or_analytics: false,
            inapp_enabled: false,
            email_fallback_enabled: false,
            templates_dir: PathBuf::from("templates"),
            assets_base_url: "https://assets.example.com".to_string(),
            providers: ProviderEndpoints::default(),
            provider_timeout: Duration::from_secs(10),
            event_timeout: Duration::from_secs(30),
            worker_concurrency: 32,
            retention: RetentionConfig::default(),
            adoption_v2_delay: Duration::from_secs(60),
        }
    }
}

impl HeraldConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            deeplink_scheme: get("DEEPLINK_SCHEME").unwrap_or(defaults.deeplink_scheme),
            ping_cooldown: parse_secs(&get, "PING_COOLDOWN_SECS")?
                .unwrap_or(defaults.ping_cooldown),
            disabled_achievements: DisabledAchievements {
                badges: parse_list(get("DISABLED_BADGE_NOTIFICATIONS")),
                levels: parse_list(get("DISABLED_LEVEL_NOTIFICATIONS")),
                roles: parse_list(get("DISABLED_ROLE_NOTIFICATIONS")),
            },
            disable_badge_unlocked_push_or_analytics: parse_bool(
                &get,
                "DISABLE_BADGE_UNLOCKED_PUSH_OR_ANALYTICS",
            )?
            .unwrap_or(false),
            inapp_enabled: parse_bool(&get, "INAPP_ENABLED")?.unwrap_or(false),
            email_fallback_enabled: parse_bool(&get, "EMAIL_FALLBACK_ENABLED")?.unwrap_or(false),
            templates_dir: get("TEMPLATES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.templates_dir),
            assets_base_url: get("ASSETS_BASE_URL").unwrap_or(defaults.assets_base_url),
            providers: ProviderEndpoints {
                push_gateway_url: get("PUSH_GATEWAY_URL"),
                email_gateway_url: get("EMAIL_GATEWAY_URL"),
                inapp_feed_url: get("INAPP_FEED_URL"),
                api_key: get("PROVIDER_API_KEY"),
            },
            provider_timeout: parse_secs(&get, "PROVIDER_TIMEOUT_SECS")?
                .unwrap_or(defaults.provider_timeout),
            event_timeout: parse_secs(&get, "EVENT_TIMEOUT_SECS")?
                .unwrap_or(defaults.event_timeout),
            worker_concurrency: parse_num::<usize>(&get, "WORKER_CONCURRENCY")?
                .unwrap_or(defaults.worker_concurrency),
            retention: RetentionConfig {
                ledger: parse_secs(&get, "LEDGER_RETENTION_SECS")?
                    .unwrap_or(defaults.retention.ledger),
                postponed: parse_secs(&get, "POSTPONED_RETENTION_SECS")?
                    .unwrap_or(defaults.retention.postponed),
                sweep_interval: parse_secs(&get, "SWEEP_INTERVAL_SECS")?
                    .unwrap_or(defaults.retention.sweep_interval),
            },
            adoption_v2_delay: parse_secs(&get, "ADOPTION_V2_DELAY_SECS")?
                .unwrap_or(defaults.adoption_v2_delay),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.ping_cooldown.is_zero() {
            return Err(Error::config(
                "PING_COOLDOWN_SECS must be greater than zero",
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(Error::config(
                "WORKER_CONCURRENCY must be greater than zero",
            ));
        }
        if self.providers.push_gateway_url.is_none() {
            return Err(Error::config("PUSH_GATEWAY_URL is required"));
        }
        if self.inapp_enabled && self.providers.inapp_feed_url.is_none() {
            return Err(Error::config(
                "INAPP_FEED_URL is required when INAPP_ENABLED is set",
            ));
        }
        if self.email_fallback_enabled && self.providers.email_gateway_url.is_none() {
            return Err(Error::config(
                "EMAIL_GATEWAY_URL is required when EMAIL_FALLBACK_ENABLED is set",
            ));
        }
        Ok(())
    }

    pub fn is_badge_notification_disabled(&self, badge_type: &str) -> bool {
        self.disabled_achievements.badges.contains(badge_type)
    }

    pub fn is_level_notification_disabled(&self, level_type: &str) -> bool {
        self.disabled_achievements.levels.contains(level_type)
    }

    pub fn is_role_notification_disabled(&self, role_type: &str) -> bool {
        self.disabled_achievements.roles.contains(role_type)
    }
}

fn parse_list(raw: Option<String>) -> HashSet<String> {
    raw.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_num<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| Error::config(format!("{key}: invalid value '{raw}': {e}")))
        })
        .transpose()
}

fn parse_secs(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    Ok(parse_num::<u64>(get, key)?.map(Duration::from_secs))
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    get(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::config(format!("{key}: invalid boolean '{raw}'"))),
        })
        .transpose()
}
