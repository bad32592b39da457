use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Shared secret used to verify provider webhook signatures.
    pub webhook_secret: String,

    // Payment provider credentials (opaque, passed through to checkout)
    pub payment_key_id: String,
    pub payment_key_secret: String,

    // AI provider
    pub provider_api_key: String,
    pub provider_base_url: String,

    pub server_host: String,
    pub server_port: u16,

    /// Allowed CORS origin for the browser front-end.
    pub frontend_url: String,

    /// Upper bound on webhook processing before returning 500 so the
    /// provider's retry policy can resubmit.
    pub webhook_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 3000)?
            .set_default("frontend_url", "http://localhost:5173")?
            .set_default("provider_base_url", "https://api.openai.com/v1")?
            .set_default("webhook_timeout_secs", 15)?
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_env_vars_bind_to_snake_case_fields() {
        std::env::set_var("LEDGER_DATABASE_URL", "postgres://localhost/ledger");
        std::env::set_var("LEDGER_WEBHOOK_SECRET", "whsec_test");
        std::env::set_var("LEDGER_PAYMENT_KEY_ID", "rzp_test_key");
        std::env::set_var("LEDGER_PAYMENT_KEY_SECRET", "rzp_test_secret");
        std::env::set_var("LEDGER_PROVIDER_API_KEY", "sk-test");
        std::env::set_var("LEDGER_WEBHOOK_TIMEOUT_SECS", "7");

        let config = AppConfig::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/ledger");
        assert_eq!(config.webhook_secret, "whsec_test");
        assert_eq!(config.webhook_timeout_secs, 7);
        assert_eq!(config.server_port, 3000);
    }
}
