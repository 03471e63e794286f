//! Visitor context extraction from request headers

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::model::VisitorContext;

/// Builds the context for one profile request
///
/// The country comes from the configured header (set by the CDN or proxy in
/// front of the service), falling back to `DEFAULT_COUNTRY`. Values that are
/// not two letters, such as Cloudflare's `XX`/`T1` markers, still pass
/// through uppercased and simply match no rule.
pub fn visitor_context(headers: &HeaderMap, config: &Config, now: DateTime<Utc>) -> VisitorContext {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    VisitorContext {
        country: header_value(&config.country_header)
            .map(|c| c.to_uppercase())
            .or_else(|| config.default_country.clone()),
        now,
        user_agent: header_value(header::USER_AGENT.as_str()),
        referrer: header_value(header::REFERER.as_str()),
    }
}
