//! Runtime configuration loaded from the environment
//!
//! Values come from process environment variables, optionally seeded from a
//! `.env` file by `dotenvy` in `main`.

use std::env;

/// Service configuration
///
/// # Environment Variables
///
/// - `PORT` - Server port number (default: 8080)
/// - `DATABASE_URL` - Path to database file (default: "data.db")
/// - `URL` - Public base URL used to build short links (default: "http://localhost")
/// - `AUTHORIZATION` - Shared token the identity gateway must send (optional)
/// - `WEBHOOK_SECRET` - Token the payment processor must send (webhooks are refused when unset)
/// - `ADMIN_ROLE` - Role claim granting back-office access (default: "admin")
/// - `COUNTRY_HEADER` - Request header carrying the visitor's country (default: "cf-ipcountry")
/// - `DEFAULT_COUNTRY` - Country assumed when the header is missing (optional)
/// - `FALLBACK_REDIRECT` - Target for unknown short codes (default: "/")
/// - `STRICT_RULE_VALIDATION` - Refuse lossy rule input instead of dropping tokens (default: true)
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub base_url: String,
    pub api_token: Option<String>,
    pub webhook_secret: Option<String>,
    pub admin_role: String,
    pub country_header: String,
    pub default_country: Option<String>,
    pub fallback_redirect: String,
    pub strict_rule_validation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "data.db".to_string(),
            base_url: "http://localhost".to_string(),
            api_token: None,
            webhook_secret: None,
            admin_role: "admin".to_string(),
            country_header: "cf-ipcountry".to_string(),
            default_country: None,
            fallback_redirect: "/".to_string(),
            strict_rule_validation: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            base_url: env::var("URL").unwrap_or(defaults.base_url),
            api_token: non_empty("AUTHORIZATION"),
            webhook_secret: non_empty("WEBHOOK_SECRET"),
            admin_role: non_empty("ADMIN_ROLE").unwrap_or(defaults.admin_role),
            country_header: non_empty("COUNTRY_HEADER")
                .map(|h| h.to_lowercase())
                .unwrap_or(defaults.country_header),
            default_country: non_empty("DEFAULT_COUNTRY").map(|c| c.to_uppercase()),
            fallback_redirect: non_empty("FALLBACK_REDIRECT").unwrap_or(defaults.fallback_redirect),
            strict_rule_validation: env::var("STRICT_RULE_VALIDATION")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(defaults.strict_rule_validation),
        }
    }

    /// Public URL of a short link
    pub fn short_url(&self, code: &str) -> String {
        format!("{}:{}/s/{}", self.base_url.trim_end_matches('/'), self.port, code)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
