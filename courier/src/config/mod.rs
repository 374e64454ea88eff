//! Process configuration.
//!
//! Every setting comes from the environment (a `.env` file is honoured by the
//! binary through `dotenvy`). Unset variables fall back to defaults; a value
//! that is set but does not parse is a configuration error.

use std::str::FromStr;

use crate::dispatcher::DispatcherConfig;
use crate::gateway::GatewayConfig;
use crate::mail::SmtpConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::{Error, Result};

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12580,
        }
    }
}

/// Token verification settings shared by the push endpoint and admin routes.
#[derive(Clone, Default)]
pub struct JwtConfig {
    pub secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub database_url: String,
    pub log_dir: String,
    pub dispatcher: DispatcherConfig,
    pub smtp: SmtpConfig,
    pub gateway: GatewayConfig,
    pub jwt: JwtConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            database_url: "sqlite:courier.db?mode=rwc".to_string(),
            log_dir: "logs".to_string(),
            dispatcher: DispatcherConfig::default(),
            smtp: SmtpConfig::default(),
            gateway: GatewayConfig::default(),
            jwt: JwtConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// Non-empty, trimmed value of `key`.
fn text<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match text(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| Error::config(format!("{} has invalid value '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api = ApiConfig {
            bind_address: text(&lookup, "API_BIND_ADDRESS").unwrap_or(defaults.api.bind_address),
            port: parsed(&lookup, "API_PORT", defaults.api.port)?,
        };

        let d = defaults.dispatcher;
        let dispatcher = DispatcherConfig {
            interval_secs: parsed(&lookup, "DISPATCH_INTERVAL_SECS", d.interval_secs)?,
            batch_size: parsed(&lookup, "DISPATCH_BATCH_SIZE", d.batch_size)?,
            backoff_base_minutes: parsed(
                &lookup,
                "DISPATCH_BACKOFF_BASE_MINUTES",
                d.backoff_base_minutes,
            )?,
            urgent_delay_ms: parsed(&lookup, "DISPATCH_URGENT_DELAY_MS", d.urgent_delay_ms)?,
            default_max_retries: parsed(
                &lookup,
                "DISPATCH_DEFAULT_MAX_RETRIES",
                d.default_max_retries,
            )?,
            processing_lease_secs: parsed(
                &lookup,
                "DISPATCH_PROCESSING_LEASE_SECS",
                d.processing_lease_secs,
            )?,
        };
        if dispatcher.interval_secs == 0 {
            return Err(Error::config("DISPATCH_INTERVAL_SECS must be greater than 0"));
        }
        if dispatcher.batch_size == 0 {
            return Err(Error::config("DISPATCH_BATCH_SIZE must be greater than 0"));
        }
        if dispatcher.processing_lease_secs == 0 {
            return Err(Error::config(
                "DISPATCH_PROCESSING_LEASE_SECS must be greater than 0",
            ));
        }
        if dispatcher.default_max_retries < 1 {
            return Err(Error::config("DISPATCH_DEFAULT_MAX_RETRIES must be at least 1"));
        }

        let s = defaults.smtp;
        let smtp = SmtpConfig {
            host: text(&lookup, "SMTP_HOST").unwrap_or(s.host),
            port: parsed(&lookup, "SMTP_PORT", s.port)?,
            username: text(&lookup, "SMTP_USERNAME"),
            password: lookup("SMTP_PASSWORD").filter(|v| !v.is_empty()),
            starttls: parsed(&lookup, "SMTP_STARTTLS", s.starttls)?,
            from: text(&lookup, "SMTP_FROM").unwrap_or(s.from),
            timeout_secs: parsed(&lookup, "SMTP_TIMEOUT_SECS", s.timeout_secs)?,
        };

        let g = defaults.gateway;
        let gateway = GatewayConfig {
            heartbeat_secs: parsed(&lookup, "WS_HEARTBEAT_SECS", g.heartbeat_secs)?,
            maintenance_grace_secs: parsed(
                &lookup,
                "MAINTENANCE_GRACE_SECS",
                g.maintenance_grace_secs,
            )?,
        };
        if gateway.heartbeat_secs == 0 {
            return Err(Error::config("WS_HEARTBEAT_SECS must be greater than 0"));
        }

        let jwt = JwtConfig {
            secret: lookup("JWT_SECRET").filter(|v| !v.is_empty()),
            issuer: text(&lookup, "JWT_ISSUER"),
            audience: text(&lookup, "JWT_AUDIENCE"),
        };

        let o = defaults.orchestrator;
        let orchestrator = OrchestratorConfig {
            message_template: text(&lookup, "MAIL_TEMPLATE_MESSAGE").unwrap_or(o.message_template),
            announcement_template: text(&lookup, "MAIL_TEMPLATE_ANNOUNCEMENT")
                .unwrap_or(o.announcement_template),
            system_template: text(&lookup, "MAIL_TEMPLATE_SYSTEM").unwrap_or(o.system_template),
        };

        Ok(Self {
            api,
            database_url: text(&lookup, "DATABASE_URL").unwrap_or(defaults.database_url),
            log_dir: text(&lookup, "LOG_DIR").unwrap_or(defaults.log_dir),
            dispatcher,
            smtp,
            gateway,
            jwt,
            orchestrator,
        })
    }
}
