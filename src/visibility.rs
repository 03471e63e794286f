//! Visibility rule evaluation
//!
//! Decides whether a single link is shown to a visitor. Evaluation is pure:
//! it reads the link and the visitor context and nothing else.

use chrono::Datelike;

use crate::model::{GeoRule, Link, ScheduleRule, VisitorContext};

/// Returns `true` when `link` should be shown to the visitor described by `ctx`
///
/// Rules are applied in order and the first failing rule hides the link:
/// 1. `is_visible == false` hides the link unconditionally
/// 2. an enabled geo rule with at least one country code
/// 3. an enabled schedule rule
///
/// A link without smart rules is visible whenever `is_visible` is set.
pub fn evaluate(link: &Link, ctx: &VisitorContext) -> bool {
    if !link.is_visible {
        return false;
    }

    let Some(rules) = &link.smart_rules else {
        return true;
    };

    if let Some(geo) = &rules.geo {
        if !geo_allows(geo, ctx.country.as_deref()) {
            return false;
        }
    }

    if let Some(schedule) = &rules.schedule {
        if !schedule_allows(schedule, ctx) {
            return false;
        }
    }

    true
}

fn geo_allows(rule: &GeoRule, country: Option<&str>) -> bool {
    if !rule.enabled || rule.country_codes.is_empty() {
        return true;
    }

    // Stored codes that are not two letters never match anything.
    let listed = country.is_some_and(|country| {
        rule.country_codes
            .iter()
            .filter(|code| is_country_code(code))
            .any(|code| code.eq_ignore_ascii_case(country))
    });

    if rule.allow {
        listed
    } else {
        !listed
    }
}

fn schedule_allows(rule: &ScheduleRule, ctx: &VisitorContext) -> bool {
    if !rule.enabled {
        return true;
    }

    if rule.start_time.is_some_and(|start| ctx.now < start) {
        return false;
    }
    if rule.end_time.is_some_and(|end| ctx.now >= end) {
        return false;
    }

    rule.days_of_week.is_empty() || rule.days_of_week.contains(&ctx.now.weekday())
}

fn is_country_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())
}
