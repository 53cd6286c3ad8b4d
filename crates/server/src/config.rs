use std::time::Duration;

use remind_bus::BusTopology;

/// Environment-driven service configuration.
///
/// Every knob has a default so the service boots in development mode with
/// no environment at all (in-memory store and bus, push disabled). Invalid
/// values fail startup rather than being silently replaced.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP bind host (`SERVICE_HOST`).
    pub host: String,
    /// HTTP bind port (`SERVICE_PORT`).
    pub port: u16,
    /// Postgres URL (`DATABASE_URL`); absent means the in-memory store.
    pub database_url: Option<String>,
    /// sqlx pool size (`DATABASE_POOL_SIZE`).
    pub database_pool_size: u32,
    /// Broker URL (`RABBITMQ_URL`); absent means the in-process bus.
    pub rabbitmq_url: Option<String>,
    /// Exchange name (`RABBITMQ_EXCHANGE`).
    pub rabbitmq_exchange: String,
    /// Creation events queue (`RABBITMQ_INPUT_QUEUE`).
    pub input_queue: String,
    /// Dispatch events queue (`RABBITMQ_OUTPUT_QUEUE`).
    pub output_queue: String,
    /// Input binding (`RABBITMQ_INPUT_ROUTING_KEY`).
    pub input_routing_key: String,
    /// Output binding (`RABBITMQ_OUTPUT_ROUTING_KEY`).
    pub output_routing_key: String,
    /// Queue workers per process (`WORKER_CONCURRENCY`).
    pub worker_concurrency: usize,
    /// Expansion/dispatch cadence (`SCHEDULER_SCAN_INTERVAL_SECONDS`).
    pub scan_interval: Duration,
    /// Max rows per scan per tick (`SCHEDULER_BATCH_SIZE`).
    pub batch_size: usize,
    /// Expiration cleanup cadence (`CLEANUP_INTERVAL_SECONDS`).
    pub cleanup_interval: Duration,
    /// Slack added to a one-time reminder's `end_date`
    /// (`ONE_TIME_GRACE_SECONDS`).
    pub one_time_grace: chrono::Duration,
    /// Firebase project (`FCM_PROJECT_ID`).
    pub fcm_project_id: Option<String>,
    /// Service-account key, inline JSON or a path (`FCM_CREDENTIALS_JSON`).
    pub fcm_credentials_json: Option<String>,
    /// Per-send push timeout (`PUSH_TIMEOUT_SECONDS`).
    pub push_timeout: Duration,
    /// Expose the Prometheus endpoint (`METRICS_ENABLED`).
    pub metrics_enabled: bool,
    /// Fallback IANA timezone (`DEFAULT_TIMEZONE`).
    pub default_timezone: chrono_tz::Tz,
    /// Optional `X-API-Key` guard (`API_KEY`); absent means open access.
    pub api_key: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8085,
            database_url: None,
            database_pool_size: 5,
            rabbitmq_url: None,
            rabbitmq_exchange: "reminders".into(),
            input_queue: "reminders.ingest".into(),
            output_queue: "reminders.dispatch".into(),
            input_routing_key: "reminders.ingest".into(),
            output_routing_key: "reminders.dispatch".into(),
            worker_concurrency: 4,
            scan_interval: Duration::from_secs(30),
            batch_size: 100,
            cleanup_interval: Duration::from_secs(3600),
            one_time_grace: chrono::Duration::seconds(60),
            fcm_project_id: None,
            fcm_credentials_json: None,
            push_timeout: Duration::from_secs(5),
            metrics_enabled: true,
            default_timezone: chrono_tz::Tz::UTC,
            api_key: None,
        }
    }
}

/// Errors from configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn string_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary lookup (tests inject maps).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is present but unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let metrics_enabled = match lookup("METRICS_ENABLED") {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "METRICS_ENABLED",
                        value: raw,
                        reason: "expected a boolean".into(),
                    });
                }
            },
            None => defaults.metrics_enabled,
        };

        let default_timezone = match lookup("DEFAULT_TIMEZONE") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "DEFAULT_TIMEZONE",
                value: raw,
                reason: "not an IANA timezone".into(),
            })?,
            None => defaults.default_timezone,
        };

        Ok(Self {
            host: string_or(&lookup, "SERVICE_HOST", &defaults.host),
            port: parsed(&lookup, "SERVICE_PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL"),
            database_pool_size: parsed(
                &lookup,
                "DATABASE_POOL_SIZE",
                defaults.database_pool_size,
            )?,
            rabbitmq_url: lookup("RABBITMQ_URL"),
            rabbitmq_exchange: string_or(&lookup, "RABBITMQ_EXCHANGE", &defaults.rabbitmq_exchange),
            input_queue: string_or(&lookup, "RABBITMQ_INPUT_QUEUE", &defaults.input_queue),
            output_queue: string_or(&lookup, "RABBITMQ_OUTPUT_QUEUE", &defaults.output_queue),
            input_routing_key: string_or(
                &lookup,
                "RABBITMQ_INPUT_ROUTING_KEY",
                &defaults.input_routing_key,
            ),
            output_routing_key: string_or(
                &lookup,
                "RABBITMQ_OUTPUT_ROUTING_KEY",
                &defaults.output_routing_key,
            ),
            worker_concurrency: parsed(
                &lookup,
                "WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
            scan_interval: Duration::from_secs(parsed(
                &lookup,
                "SCHEDULER_SCAN_INTERVAL_SECONDS",
                30u64,
            )?),
            batch_size: parsed(&lookup, "SCHEDULER_BATCH_SIZE", defaults.batch_size)?,
            cleanup_interval: Duration::from_secs(parsed(
                &lookup,
                "CLEANUP_INTERVAL_SECONDS",
                3600u64,
            )?),
            one_time_grace: chrono::Duration::seconds(parsed(
                &lookup,
                "ONE_TIME_GRACE_SECONDS",
                60i64,
            )?),
            fcm_project_id: lookup("FCM_PROJECT_ID"),
            fcm_credentials_json: lookup("FCM_CREDENTIALS_JSON"),
            push_timeout: Duration::from_secs(parsed(&lookup, "PUSH_TIMEOUT_SECONDS", 5u64)?),
            metrics_enabled,
            default_timezone,
            api_key: lookup("API_KEY"),
        })
    }

    /// Broker topology derived from the queue settings.
    #[must_use]
    pub fn topology(&self) -> BusTopology {
        BusTopology {
            exchange: self.rabbitmq_exchange.clone(),
            input_queue: self.input_queue.clone(),
            output_queue: self.output_queue.clone(),
            input_routing_key: self.input_routing_key.clone(),
            output_routing_key: self.output_routing_key.clone(),
            prefetch: u16::try_from(self.worker_concurrency).unwrap_or(u16::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|v| (*v).to_owned())
    }

    #[test]
    fn defaults_boot_without_environment() {
        let config = ServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8085);
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 100);
        assert!(config.database_url.is_none());
        assert!(config.rabbitmq_url.is_none());
        assert!(config.metrics_enabled);
        assert_eq!(config.default_timezone, chrono_tz::Tz::UTC);
    }

    #[test]
    fn environment_overrides_apply() {
        let vars = [
            ("SERVICE_PORT", "9000"),
            ("SCHEDULER_SCAN_INTERVAL_SECONDS", "10"),
            ("SCHEDULER_BATCH_SIZE", "25"),
            ("DEFAULT_TIMEZONE", "Asia/Kolkata"),
            ("METRICS_ENABLED", "false"),
            ("RABBITMQ_EXCHANGE", "custom"),
            ("WORKER_CONCURRENCY", "8"),
        ];
        let config = ServiceConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.scan_interval, Duration::from_secs(10));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.default_timezone, chrono_tz::Asia::Kolkata);
        assert!(!config.metrics_enabled);
        assert_eq!(config.topology().exchange, "custom");
        assert_eq!(config.topology().prefetch, 8);
    }

    #[test]
    fn invalid_values_fail_startup() {
        let vars = [("SERVICE_PORT", "not-a-port")];
        assert!(ServiceConfig::from_lookup(lookup(&vars)).is_err());

        let vars = [("DEFAULT_TIMEZONE", "Mars/Olympus")];
        assert!(ServiceConfig::from_lookup(lookup(&vars)).is_err());

        let vars = [("METRICS_ENABLED", "maybe")];
        assert!(ServiceConfig::from_lookup(lookup(&vars)).is_err());
    }
}
