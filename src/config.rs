use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub base_url: String,
    pub host: String,
    pub port: u16,

    // Stripe Checkout
    pub stripe_api_url: String,
    pub stripe_secret_key: Secret<String>,
    pub stripe_webhook_secret: Secret<String>,
    pub currency: String,

    // Google Distance Matrix (absent: every quote uses the flagged fallback)
    pub maps_api_url: String,
    pub maps_api_key: Option<Secret<String>>,
    pub fallback_distance_km: Decimal,

    // Email (SendGrid-compatible)
    pub email_api_url: String,
    pub email_api_key: Option<Secret<String>>,
    pub email_from: Option<String>,
    pub admin_email: Option<String>,

    // SMS (Twilio-compatible)
    pub sms_api_url: String,
    pub sms_account_sid: Option<String>,
    pub sms_auth_token: Option<Secret<String>>,
    pub sms_from: Option<String>,

    pub calendar_webhook_url: Option<String>,

    // Reminder triggers
    pub reminder_daily_cron: String,
    pub reminder_hourly_cron: String,
    pub reminder_startup_delay_secs: u64,
    pub notification_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let fallback_distance_km = match config.get_string("fallback_distance_km") {
            Ok(raw) => raw.parse().map_err(|_| {
                config::ConfigError::Message(format!("invalid fallback_distance_km: {}", raw))
            })?,
            Err(_) => dec!(25),
        };

        Ok(Self {
            database_url: config.get("database_url")?,
            base_url: config.get("base_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            stripe_api_url: config
                .get("stripe_api_url")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            stripe_secret_key: Secret::new(config.get("stripe_secret_key")?),
            stripe_webhook_secret: Secret::new(config.get("stripe_webhook_secret")?),
            currency: config
                .get("currency")
                .unwrap_or_else(|_| "nzd".to_string()),

            maps_api_url: config
                .get("maps_api_url")
                .unwrap_or_else(|_| "https://maps.googleapis.com".to_string()),
            maps_api_key: config.get::<String>("maps_api_key").ok().map(Secret::new),
            fallback_distance_km,

            email_api_url: config
                .get("email_api_url")
                .unwrap_or_else(|_| "https://api.sendgrid.com".to_string()),
            email_api_key: config.get::<String>("email_api_key").ok().map(Secret::new),
            email_from: config.get("email_from").ok(),
            admin_email: config.get("admin_email").ok(),

            sms_api_url: config
                .get("sms_api_url")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
            sms_account_sid: config.get("sms_account_sid").ok(),
            sms_auth_token: config.get::<String>("sms_auth_token").ok().map(Secret::new),
            sms_from: config.get("sms_from").ok(),

            calendar_webhook_url: config.get("calendar_webhook_url").ok(),

            reminder_daily_cron: config
                .get("reminder_daily_cron")
                .unwrap_or_else(|_| "0 0 18 * * *".to_string()),
            reminder_hourly_cron: config
                .get("reminder_hourly_cron")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
            reminder_startup_delay_secs: config.get("reminder_startup_delay_secs").unwrap_or(30),
            notification_timeout_secs: config.get("notification_timeout_secs").unwrap_or(10),
        })
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }

    pub fn reminder_startup_delay(&self) -> Duration {
        Duration::from_secs(self.reminder_startup_delay_secs)
    }
}
