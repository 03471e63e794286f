//! Smart rule editor contract
//!
//! Normalizes and validates rule and commerce settings coming from the
//! settings form before they are persisted.

use thiserror::Error;

use crate::model::{Commerce, GeoInput, GeoRule, RulesInput, ScheduleRule, SmartRules};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("invalid country code `{0}`: expected two letters")]
    CountryCode(String),

    #[error("schedule window ends before it starts")]
    InvertedWindow,

    #[error("price must be a finite amount >= 0, got {0}")]
    Price(f64),

    #[error("currency must be a 3-letter code, got `{0}`")]
    Currency(String),

    #[error("title must not be empty")]
    EmptyTitle,

    #[error("url must start with http:// or https://, got `{0}`")]
    Url(String),

    #[error("username must be 3-32 characters of a-z, 0-9, `_` or `-`, got `{0}`")]
    Username(String),
}

/// Every problem found in one submission
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", join_messages(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    fn check(errors: Vec<ValidationError>) -> Result<(), ValidationErrors> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }
}

/// Result of normalizing a raw country list
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGeo {
    pub rule: GeoRule,

    /// Non-empty tokens that were not two characters long, as typed
    pub rejected: Vec<String>,
}

/// Turns free-text country input into a geo rule
///
/// Splits on commas, trims, uppercases, keeps exactly-2-character tokens and
/// removes duplicates keeping the first occurrence. Never fails; invalid
/// tokens are simply left out.
///
/// ```
/// use linkpage::editor::normalize_geo_rule;
///
/// let rule = normalize_geo_rule("in, us, xyz123, gb", true, true);
/// assert_eq!(rule.country_codes, vec!["IN", "US", "GB"]);
/// ```
pub fn normalize_geo_rule(raw: &str, enabled: bool, allow: bool) -> GeoRule {
    normalize_geo_input(raw, enabled, allow).rule
}

/// Like [`normalize_geo_rule`], but also reports the dropped tokens
pub fn normalize_geo_input(raw: &str, enabled: bool, allow: bool) -> NormalizedGeo {
    let mut country_codes: Vec<String> = Vec::new();
    let mut rejected = Vec::new();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let code = token.to_uppercase();
        if code.chars().count() != 2 {
            rejected.push(token.to_string());
            continue;
        }
        if !country_codes.contains(&code) {
            country_codes.push(code);
        }
    }

    NormalizedGeo {
        rule: GeoRule {
            enabled,
            allow,
            country_codes,
        },
        rejected,
    }
}

/// Normalizes a full rule editor submission
///
/// In strict mode any dropped country token or an inverted schedule window
/// fails the whole submission. In lenient mode the normalized rules are
/// returned together with the dropped tokens.
pub fn normalize_rules_input(
    input: &RulesInput,
    strict: bool,
) -> Result<(SmartRules, Vec<String>), ValidationErrors> {
    let geo = input.geo.as_ref().map(|GeoInput { enabled, allow, countries }| {
        normalize_geo_input(countries, *enabled, allow.unwrap_or(true))
    });
    finish(geo, input.schedule.clone(), strict)
}

/// Re-normalizes structured rules sent by API clients
///
/// Country codes go through the same pipeline as free-text input, so stored
/// rules always hold uppercase two-letter codes.
pub fn normalize_smart_rules(
    rules: SmartRules,
    strict: bool,
) -> Result<(SmartRules, Vec<String>), ValidationErrors> {
    let geo = rules
        .geo
        .map(|geo| normalize_geo_input(&geo.country_codes.join(","), geo.enabled, geo.allow));
    finish(geo, rules.schedule, strict)
}

fn finish(
    geo: Option<NormalizedGeo>,
    schedule: Option<ScheduleRule>,
    strict: bool,
) -> Result<(SmartRules, Vec<String>), ValidationErrors> {
    let mut errors = Vec::new();
    let dropped = geo.as_ref().map(|g| g.rejected.clone()).unwrap_or_default();

    if strict {
        errors.extend(dropped.iter().cloned().map(ValidationError::CountryCode));
    }
    if let Some(schedule) = &schedule {
        errors.extend(validate_schedule(schedule));
    }
    ValidationErrors::check(errors)?;

    let rules = SmartRules {
        geo: geo.map(|g| g.rule),
        schedule,
    };
    Ok((rules, dropped))
}

fn validate_schedule(rule: &ScheduleRule) -> Option<ValidationError> {
    match (rule.start_time, rule.end_time) {
        (Some(start), Some(end)) if end <= start => Some(ValidationError::InvertedWindow),
        _ => None,
    }
}

/// Validates paywall settings
pub fn validate_commerce(commerce: &Commerce) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if !commerce.price.is_finite() || commerce.price < 0.0 {
        errors.push(ValidationError::Price(commerce.price));
    }
    if commerce.currency.len() != 3 || !commerce.currency.chars().all(|c| c.is_ascii_alphabetic()) {
        errors.push(ValidationError::Currency(commerce.currency.clone()));
    }
    if let Some(file_url) = &commerce.file_url {
        if !is_http_url(file_url) {
            errors.push(ValidationError::Url(file_url.clone()));
        }
    }

    ValidationErrors::check(errors)
}

/// Validates the plain fields of a link
///
/// An empty `url` is accepted; locked links may only carry a file.
pub fn validate_link_fields(title: Option<&str>, url: Option<&str>) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if title.is_some_and(|t| t.trim().is_empty()) {
        errors.push(ValidationError::EmptyTitle);
    }
    if let Some(url) = url.filter(|u| !u.is_empty()) {
        if !is_http_url(url) {
            errors.push(ValidationError::Url(url.to_string()));
        }
    }

    ValidationErrors::check(errors)
}

/// Validates a short link target
pub fn validate_target_url(url: &str) -> Result<(), ValidationErrors> {
    if is_http_url(url) {
        Ok(())
    } else {
        Err(ValidationErrors(vec![ValidationError::Url(url.to_string())]))
    }
}

/// Lowercases and validates a public username
pub fn normalize_username(raw: &str) -> Result<String, ValidationErrors> {
    let username = raw.trim().to_lowercase();
    let valid = (3..=32).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if valid {
        Ok(username)
    } else {
        Err(ValidationErrors(vec![ValidationError::Username(raw.to_string())]))
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn drops_malformed_tokens_and_keeps_order() {
        let rule = normalize_geo_rule("in, us, xyz123, gb", true, true);
        assert_eq!(rule.country_codes, vec!["IN", "US", "GB"]);
        assert!(rule.enabled);
        assert!(rule.allow);
    }

    #[test]
    fn deduplicates_first_seen() {
        let rule = normalize_geo_rule("gb,US , us,Gb,,  ", false, false);
        assert_eq!(rule.country_codes, vec!["GB", "US"]);
        assert!(!rule.enabled);
        assert!(!rule.allow);
    }

    #[test]
    fn empty_input_gives_empty_rule() {
        let normalized = normalize_geo_input("", true, true);
        assert!(normalized.rule.country_codes.is_empty());
        assert!(normalized.rejected.is_empty());
    }

    #[test]
    fn reports_rejected_tokens() {
        let normalized = normalize_geo_input("in, usa, x", true, true);
        assert_eq!(normalized.rule.country_codes, vec!["IN"]);
        assert_eq!(normalized.rejected, vec!["usa", "x"]);
    }

    #[test]
    fn strict_mode_refuses_dropped_tokens() {
        let input = RulesInput {
            geo: Some(GeoInput {
                enabled: true,
                allow: None,
                countries: "in, xyz123".to_string(),
            }),
            schedule: None,
        };

        let err = normalize_rules_input(&input, true).unwrap_err();
        assert_eq!(err.0, vec![ValidationError::CountryCode("xyz123".to_string())]);

        let (rules, dropped) = normalize_rules_input(&input, false).unwrap();
        assert_eq!(dropped, vec!["xyz123"]);
        let geo = rules.geo.unwrap();
        assert_eq!(geo.country_codes, vec!["IN"]);
        assert!(geo.allow);
    }

    #[test]
    fn structured_rules_are_renormalized() {
        let rules = SmartRules {
            geo: Some(GeoRule {
                enabled: true,
                allow: false,
                country_codes: vec!["us".to_string(), " gb".to_string(), "US".to_string()],
            }),
            schedule: None,
        };

        let (rules, dropped) = normalize_smart_rules(rules, true).unwrap();
        let geo = rules.geo.unwrap();
        assert_eq!(geo.country_codes, vec!["US", "GB"]);
        assert!(!geo.allow);
        assert!(dropped.is_empty());
    }

    #[test]
    fn inverted_schedule_is_rejected_in_both_modes() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let input = RulesInput {
            geo: None,
            schedule: Some(ScheduleRule {
                enabled: true,
                start_time: Some(start),
                end_time: Some(start),
                days_of_week: vec![],
            }),
        };

        assert!(normalize_rules_input(&input, true).is_err());
        assert!(normalize_rules_input(&input, false).is_err());
    }

    #[test]
    fn commerce_checks() {
        let mut commerce = Commerce {
            is_locked: true,
            price: 99.0,
            currency: "INR".to_string(),
            file_url: Some("https://files.example.com/a.pdf".to_string()),
            button_text: None,
        };
        assert!(validate_commerce(&commerce).is_ok());

        commerce.price = -1.0;
        commerce.currency = "RUPEES".to_string();
        let err = validate_commerce(&commerce).unwrap_err();
        assert_eq!(err.0.len(), 2);

        commerce.price = f64::NAN;
        commerce.currency = "EUR".to_string();
        assert!(validate_commerce(&commerce).is_err());
    }

    #[test]
    fn errors_display_joined() {
        let errors = ValidationErrors(vec![
            ValidationError::EmptyTitle,
            ValidationError::CountryCode("usa".to_string()),
        ]);
        assert_eq!(
            errors.to_string(),
            "title must not be empty; invalid country code `usa`: expected two letters"
        );
    }

    #[test]
    fn usernames() {
        assert_eq!(normalize_username(" Alice_01 ").unwrap(), "alice_01");
        assert!(normalize_username("ab").is_err());
        assert!(normalize_username("no spaces").is_err());
        assert!(normalize_username("colon:name").is_err());
    }
}
