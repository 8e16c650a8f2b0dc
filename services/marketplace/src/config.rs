use rust_decimal::Decimal;

use tutorhub_common::{DatabaseConfig, RedisConfig, ServerConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub marketplace: MarketplaceConfig,
}

/// Business knobs for the booking and settlement rules.
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    /// Platform cut applied when a teacher profile carries no override.
    pub commission_percent: Decimal,
    /// Furthest into the future a lesson may be booked or queried.
    pub max_advance_days: i64,
    /// Minutes past the scheduled start before a no-show can be flagged.
    pub no_show_grace_minutes: i64,
    /// Realtime pub/sub channel; empty disables publishing.
    pub realtime_channel: String,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            commission_percent: Decimal::new(15, 0),
            max_advance_days: 90,
            no_show_grace_minutes: 15,
            realtime_channel: "marketplace:events".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = MarketplaceConfig::default();

        Self {
            server: ServerConfig {
                host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                cors_origins: std::env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "*".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            database: DatabaseConfig {
                host: std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: std::env::var("DB_PORT")
                    .unwrap_or_else(|_| "5432".to_string())
                    .parse()
                    .unwrap_or(5432),
                username: std::env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: std::env::var("DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
                database: std::env::var("DB_NAME").unwrap_or_else(|_| "tutorhub".to_string()),
                max_connections: std::env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            redis: RedisConfig {
                host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: std::env::var("REDIS_PORT")
                    .unwrap_or_else(|_| "6379".to_string())
                    .parse()
                    .unwrap_or(6379),
                password: std::env::var("REDIS_PASSWORD").ok(),
                database: std::env::var("REDIS_DB")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()
                    .unwrap_or(0),
            },
            marketplace: MarketplaceConfig {
                commission_percent: std::env::var("COMMISSION_PERCENT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.commission_percent),
                max_advance_days: std::env::var("MAX_ADVANCE_DAYS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.max_advance_days),
                no_show_grace_minutes: std::env::var("NO_SHOW_GRACE_MINUTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.no_show_grace_minutes),
                realtime_channel: std::env::var("REALTIME_CHANNEL")
                    .unwrap_or(defaults.realtime_channel),
            },
        }
    }
}
