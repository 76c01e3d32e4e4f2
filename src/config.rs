use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Shared secret for the payment provider; authorizes outbound API calls
    /// and verifies inbound webhook signatures.
    pub payment_secret_key: String,
    pub payment_base_url: String,
    /// Public base URL of this app; the provider sends the customer back to
    /// `{app_url}/payment/callback` after checkout.
    pub app_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let payment_secret_key = env::var("PAYMENT_SECRET_KEY")?;
        let payment_base_url = env::var("PAYMENT_BASE_URL")
            .unwrap_or_else(|_| "https://api.paystack.co".to_string());
        let app_url =
            env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        Ok(Self {
            database_url,
            host,
            port,
            payment_secret_key,
            payment_base_url,
            app_url,
        })
    }
}
