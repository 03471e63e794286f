//! Data models for the link-in-bio service
//!
//! This module defines the stored entities (links, short links, profiles,
//! subscriptions), the per-request visitor context, and the request/response
//! payloads used by the HTTP handlers.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::commerce::GateState;

fn default_true() -> bool {
    true
}

/// A single item on a creator's public profile
///
/// A link is either navigable (`url`) or, when `commerce.is_locked` is set,
/// a purchasable item whose destination is only revealed after payment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Link {
    /// Opaque random identifier
    pub id: String,

    /// Creator account that owns this link
    pub owner_id: String,

    pub title: String,

    /// Destination URL (post-unlock destination for locked links)
    #[serde(default)]
    pub url: String,

    /// Display rank among the owner's links, ascending
    #[serde(default)]
    pub order: i64,

    /// Master switch. A hidden link is never shown, whatever its rules say.
    #[serde(default = "default_true")]
    pub is_visible: bool,

    #[serde(default)]
    pub smart_rules: Option<SmartRules>,

    #[serde(default)]
    pub commerce: Option<Commerce>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    /// Whether this link is behind the paywall
    pub fn is_locked(&self) -> bool {
        self.commerce.as_ref().is_some_and(|c| c.is_locked)
    }
}

/// Conditional visibility constraints attached to a link
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SmartRules {
    #[serde(default)]
    pub geo: Option<GeoRule>,

    #[serde(default)]
    pub schedule: Option<ScheduleRule>,
}

/// Geo-fencing rule
///
/// With `allow = true` the link is shown only to visitors from `country_codes`;
/// with `allow = false` it is hidden from them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeoRule {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub allow: bool,

    /// Uppercase ISO-3166 alpha-2 codes
    #[serde(default)]
    pub country_codes: Vec<String>,
}

/// Time-window rule
///
/// `start_time` is inclusive, `end_time` exclusive. An empty `days_of_week`
/// means every day. Weekdays are evaluated in UTC.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ScheduleRule {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
}

/// Paywall configuration of a link
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Commerce {
    #[serde(default)]
    pub is_locked: bool,

    #[serde(default)]
    pub price: f64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Gated resource, released only after a confirmed payment
    #[serde(default)]
    pub file_url: Option<String>,

    #[serde(default)]
    pub button_text: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Per-request facts used to evaluate smart rules
///
/// Built fresh for every profile view and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitorContext {
    /// Resolved uppercase country code, if known
    pub country: Option<String>,
    pub now: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

impl VisitorContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            country: None,
            now,
            user_agent: None,
            referrer: None,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

/// How a link is presented to a visitor
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    Hidden,
    VisibleOpen,
    VisibleLocked,
}

/// A link annotated with its effective display state
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedLink {
    pub link: Link,
    pub display_state: DisplayState,
}

/// Owner-created alias redirecting to an arbitrary URL
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShortLink {
    pub code: String,
    pub original_url: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,

    /// Number of resolved visits
    #[serde(default)]
    pub clicks: u64,
}

/// Public username claimed by a creator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    pub username: String,
    pub owner_id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub bio: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Subscription state of a creator, driven by payment webhooks or the back office
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Subscription {
    pub user_id: String,
    pub active: bool,

    #[serde(default)]
    pub plan: Option<String>,

    /// Last webhook event applied, used to drop redeliveries
    #[serde(default)]
    pub last_event_id: Option<String>,

    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a link
#[derive(Deserialize, Debug, Clone, Default)]
pub struct LinkDraft {
    pub title: String,

    #[serde(default)]
    pub url: String,

    /// Defaults to one past the owner's current highest rank
    pub order: Option<i64>,

    pub is_visible: Option<bool>,
    pub smart_rules: Option<SmartRules>,
    pub commerce: Option<Commerce>,
}

/// Partial update of a link. Absent fields are left untouched.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct LinkPatch {
    pub title: Option<String>,
    pub url: Option<String>,
    pub is_visible: Option<bool>,
    pub smart_rules: Option<SmartRules>,
    pub commerce: Option<Commerce>,
}

/// Raw rule editor input, as typed into the settings form
///
/// # Example
/// ```json
/// {
///   "geo": { "enabled": true, "allow": true, "countries": "in, us, gb" },
///   "schedule": { "enabled": true, "days_of_week": ["Sat", "Sun"] }
/// }
/// ```
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RulesInput {
    pub geo: Option<GeoInput>,
    pub schedule: Option<ScheduleRule>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct GeoInput {
    #[serde(default)]
    pub enabled: bool,

    pub allow: Option<bool>,

    /// Comma-separated free text
    #[serde(default)]
    pub countries: String,
}

/// Response of the rule editor endpoint
#[derive(Serialize, Debug)]
pub struct RulesResponse {
    pub link: Link,

    /// Tokens dropped by normalization (lenient mode only)
    pub dropped_tokens: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReorderItem {
    pub id: String,
    pub order: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReorderRequest {
    pub items: Vec<ReorderItem>,
}

/// Request payload for creating a short link
///
/// # Example
/// ```json
/// {
///   "url": "https://example.com/very/long/url",
///   "custom_code": "my-link"  // Optional
/// }
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct CreateShortLinkRequest {
    pub url: String,
    pub custom_code: Option<String>,
}

/// Response returned after creating a short link
#[derive(Serialize, Debug)]
pub struct CreateShortLinkResponse {
    pub code: String,
    pub short_url: String,
    pub original_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProfileRequest {
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

/// A link as a visitor sees it
///
/// Locked links carry price information but never their destination.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PublicLink {
    pub id: String,
    pub title: String,
    pub display_state: DisplayState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
}

impl From<EvaluatedLink> for PublicLink {
    fn from(evaluated: EvaluatedLink) -> Self {
        let EvaluatedLink { link, display_state } = evaluated;
        match (display_state, link.commerce) {
            (DisplayState::VisibleLocked, Some(commerce)) => PublicLink {
                id: link.id,
                title: link.title,
                display_state,
                url: None,
                price: Some(commerce.price),
                currency: Some(commerce.currency),
                button_text: commerce.button_text,
            },
            _ => PublicLink {
                id: link.id,
                title: link.title,
                display_state,
                url: Some(link.url),
                price: None,
                currency: None,
                button_text: None,
            },
        }
    }
}

/// Public profile page payload
#[derive(Serialize, Debug)]
pub struct ProfileView {
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub links: Vec<PublicLink>,
}

/// Visitor-side checkout request, keyed by the visitor's session
#[derive(Deserialize, Debug, Clone)]
pub struct SessionRequest {
    pub session_id: String,
}

/// Gate state reported back to the visitor after a checkout step
///
/// Carries what the payment dialog displays, never the destination.
#[derive(Serialize, Debug)]
pub struct CheckoutResponse {
    pub link_id: String,
    pub session_id: String,
    pub state: GateState,
    pub price: f64,
    pub currency: String,
    pub button_text: Option<String>,
}

/// Query parameters for the unlocked-content endpoint
#[derive(Deserialize, Debug, Clone)]
pub struct AccessParams {
    pub session_id: String,
}

/// Webhook event types emitted by the payment processor
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    #[serde(rename = "purchase.succeeded")]
    PurchaseSucceeded,
    #[serde(rename = "purchase.failed")]
    PurchaseFailed,
    #[serde(rename = "subscription.activated")]
    SubscriptionActivated,
    #[serde(rename = "subscription.deactivated")]
    SubscriptionDeactivated,
}

/// Payment processor webhook payload
#[derive(Deserialize, Debug, Clone)]
pub struct WebhookEvent {
    /// Unique per event. Doubles as the payment confirmation id.
    pub event_id: String,

    #[serde(rename = "type")]
    pub kind: WebhookKind,

    pub link_id: Option<String>,
    pub session_id: Option<String>,

    /// Payer identity reported by the processor, defaults to the session
    pub payer: Option<String>,

    pub user_id: Option<String>,
    pub plan: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SubscriptionUpdate {
    pub active: bool,
    pub plan: Option<String>,
}

/// Query parameters for paginated back-office listings
///
/// # Example
/// Query string: `?page=2&limit=20`
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ListParams {
    /// Page number, starts from 1
    pub page: Option<usize>,

    /// Items per page, defaults to 10, maximum 100
    pub limit: Option<usize>,
}

impl ListParams {
    /// Returns `(page, limit, offset)` with defaults and bounds applied
    pub fn window(&self) -> (usize, usize, usize) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(10).clamp(1, 100);
        (page, limit, (page - 1) * limit)
    }
}
