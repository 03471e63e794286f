//! HTTP request handlers
//!
//! Public handlers serve profile pages, short-link redirects and the
//! checkout flow for locked links. Creator handlers manage the caller's own
//! links, profile and short links. Admin handlers back the back office.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    Extension, Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::commerce::{GateError, GateEvent, GateState, Outcome};
use crate::database::{random_id, AppState};
use crate::editor::{
    normalize_rules_input, normalize_smart_rules, normalize_username, validate_commerce,
    validate_link_fields, validate_target_url,
};
use crate::error::{AppError, Result, StoreError};
use crate::middleware::Principal;
use crate::model::{
    AccessParams, CheckoutResponse, CreateShortLinkRequest, CreateShortLinkResponse, Link,
    LinkDraft, LinkPatch, ListParams, Profile, ProfileRequest, ProfileView, PublicLink,
    ReorderRequest, RulesInput, RulesResponse, SessionRequest, ShortLink, SubscriptionUpdate,
    WebhookEvent, WebhookKind,
};
use crate::resolver::resolve;
use crate::visibility::evaluate;
use crate::visitor::visitor_context;

/// Redirects a short code to its destination
///
/// Unknown codes and store failures both redirect to the configured
/// fallback (the site root by default), never to an error page.
///
/// # Response
///
/// - **307 Temporary Redirect** - to the original URL or the fallback
pub async fn redirect_short_link(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let resolution = resolve(state.store.as_ref(), &code);
    Redirect::temporary(resolution.target(&state.config.fallback_redirect))
}

/// Public profile page
///
/// Resolves `username` to its owner, evaluates every link against the
/// visitor's context and returns the visible ones in display order.
/// A link list that cannot be read renders as an empty profile.
///
/// # Response
///
/// - **200 OK** - profile with visible links
/// - **404 Not Found** - unknown username
pub async fn profile_view(
    Path(username): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProfileView>> {
    let profile = state
        .store
        .profile_by_username(&username.to_lowercase())?
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", username)))?;

    let ctx = visitor_context(&headers, &state.config, Utc::now());
    let links = state.store.list_by_owner(&profile.owner_id).unwrap_or_else(|err| {
        warn!(owner_id = %profile.owner_id, error = %err, "link list unavailable, rendering empty profile");
        Vec::new()
    });

    let visible = aggregate(&links, &ctx);
    debug!(
        username = %profile.username,
        country = ?ctx.country,
        total = links.len(),
        visible = visible.len(),
        "profile evaluated"
    );

    Ok(Json(ProfileView {
        username: profile.username,
        display_name: profile.display_name,
        bio: profile.bio,
        links: visible.into_iter().map(PublicLink::from).collect(),
    }))
}

/// Loads a link the current visitor is allowed to see
fn visible_link(state: &AppState, headers: &HeaderMap, link_id: &str) -> Result<Link> {
    let ctx = visitor_context(headers, &state.config, Utc::now());
    state
        .store
        .get_link(link_id)?
        .filter(|link| evaluate(link, &ctx))
        .ok_or_else(|| AppError::NotFound(format!("Link {} not found", link_id)))
}

fn checkout_response(link: &Link, session_id: &str, state: GateState) -> CheckoutResponse {
    let commerce = link.commerce.as_ref();
    CheckoutResponse {
        link_id: link.id.clone(),
        session_id: session_id.to_string(),
        state,
        price: commerce.map(|c| c.price).unwrap_or_default(),
        currency: commerce.map(|c| c.currency.clone()).unwrap_or_default(),
        button_text: commerce.and_then(|c| c.button_text.clone()),
    }
}

/// Visitor clicked a locked link: opens the payment step
///
/// # Response
///
/// - **200 OK** - gate state (`payment_pending`, or `unlocked` if already paid)
/// - **400 Bad Request** - the link is not locked
/// - **404 Not Found** - unknown or hidden link
pub async fn checkout(
    Path(link_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SessionRequest>,
) -> Result<Json<CheckoutResponse>> {
    let link = visible_link(&state, &headers, &link_id)?;
    let transition = state.store.apply_gate_event(
        &link,
        &payload.session_id,
        GateEvent::Click,
        None,
        Utc::now(),
    )?;

    Ok(Json(checkout_response(&link, &payload.session_id, transition.session.state)))
}

/// Visitor closed the payment dialog: back to locked
pub async fn cancel_checkout(
    Path(link_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<SessionRequest>,
) -> Result<Json<CheckoutResponse>> {
    let link = state
        .store
        .get_link(&link_id)?
        .ok_or_else(|| AppError::NotFound(format!("Link {} not found", link_id)))?;
    let transition = state.store.apply_gate_event(
        &link,
        &payload.session_id,
        GateEvent::Cancel,
        None,
        Utc::now(),
    )?;

    Ok(Json(checkout_response(&link, &payload.session_id, transition.session.state)))
}

/// Releases the gated content to a session that has paid
///
/// # Response
///
/// - **200 OK** - `file_url` and post-unlock `destination`
/// - **402 Payment Required** - no confirmed payment for this session
pub async fn access_content(
    Path(link_id): Path<String>,
    State(state): State<AppState>,
    Query(params): Query<AccessParams>,
) -> Result<impl IntoResponse> {
    let link = state
        .store
        .get_link(&link_id)?
        .ok_or_else(|| AppError::NotFound(format!("Link {} not found", link_id)))?;
    if !link.is_locked() {
        return Err(GateError::NotLocked(link.id).into());
    }

    state
        .store
        .gate_session(&link_id, &params.session_id)?
        .and_then(|session| session.access(&link))
        .map(Json)
        .ok_or_else(|| {
            AppError::PaymentRequired(format!("Link {} is not unlocked for this session", link_id))
        })
}

/// Payment processor webhook
///
/// `purchase.*` events drive the commerce gate of `(link_id, session_id)`;
/// `subscription.*` events set the subscription of `user_id`. Redelivered
/// events are acknowledged without changing anything.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> Result<impl IntoResponse> {
    let now = Utc::now();

    match event.kind {
        WebhookKind::PurchaseSucceeded | WebhookKind::PurchaseFailed => {
            let (Some(link_id), Some(session_id)) = (&event.link_id, &event.session_id) else {
                return Err(AppError::BadRequest(
                    "purchase events require link_id and session_id".to_string(),
                ));
            };
            let link = state
                .store
                .get_link(link_id)?
                .ok_or_else(|| AppError::NotFound(format!("Link {} not found", link_id)))?;

            let gate_event = if event.kind == WebhookKind::PurchaseSucceeded {
                GateEvent::PaymentConfirmed {
                    confirmation_id: event.event_id.clone(),
                    payer: event.payer.clone().unwrap_or_else(|| session_id.clone()),
                }
            } else {
                GateEvent::PaymentFailed
            };

            let transition = state.store.apply_gate_event(
                &link,
                session_id,
                gate_event,
                Some(&event.event_id),
                now,
            )?;
            let applied = transition.outcome != Outcome::Unchanged;
            info!(
                event_id = %event.event_id,
                link_id = %link_id,
                state = ?transition.session.state,
                applied,
                "purchase event processed"
            );

            Ok(Json(json!({
                "event_id": event.event_id,
                "state": transition.session.state,
                "applied": applied
            })))
        }
        WebhookKind::SubscriptionActivated | WebhookKind::SubscriptionDeactivated => {
            let user_id = event.user_id.as_deref().ok_or_else(|| {
                AppError::BadRequest("subscription events require user_id".to_string())
            })?;
            let active = event.kind == WebhookKind::SubscriptionActivated;

            let subscription = state.store.set_subscription(
                user_id,
                active,
                event.plan.clone(),
                Some(&event.event_id),
                now,
            )?;
            info!(event_id = %event.event_id, user_id, active, "subscription event processed");

            Ok(Json(json!({
                "event_id": event.event_id,
                "subscription": subscription
            })))
        }
    }
}

/// Loads a link and checks the caller owns it
fn owned_link(state: &AppState, principal: &Principal, link_id: &str) -> Result<Link> {
    let link = state
        .store
        .get_link(link_id)?
        .ok_or_else(|| AppError::NotFound(format!("Link {} not found", link_id)))?;

    if link.owner_id != principal.user_id {
        return Err(AppError::Forbidden(
            "You are not authorized to modify this link".to_string(),
        ));
    }
    Ok(link)
}

/// Returns the caller's profile
pub async fn get_profile(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
) -> Result<Json<Profile>> {
    state
        .store
        .profile_by_owner(&principal.user_id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No profile claimed yet".to_string()))
}

/// Claims or renames the caller's public username
///
/// # Response
///
/// - **200 OK** - stored profile
/// - **409 Conflict** - username taken by another creator
/// - **422 Unprocessable Entity** - invalid username
pub async fn put_profile(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
    Json(payload): Json<ProfileRequest>,
) -> Result<Json<Profile>> {
    let profile = Profile {
        username: normalize_username(&payload.username)?,
        owner_id: principal.user_id,
        display_name: payload.display_name,
        bio: payload.bio,
        created_at: Utc::now(),
    };

    Ok(Json(state.store.upsert_profile(&profile)?))
}

/// Lists the caller's links in display order, including hidden and locked ones
pub async fn list_links(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Link>>> {
    let mut links = state.store.list_by_owner(&principal.user_id)?;
    links.sort_by_key(|link| link.order);
    Ok(Json(links))
}

/// Creates a link
///
/// # Request Body
///
/// ```json
/// {
///   "title": "My course",
///   "url": "https://example.com/course",
///   "commerce": { "is_locked": true, "price": 99, "currency": "INR",
///                 "file_url": "https://files.example.com/course.zip" }
/// }
/// ```
///
/// # Response
///
/// - **201 Created** - the stored link
/// - **422 Unprocessable Entity** - invalid fields
pub async fn create_link(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
    Json(mut draft): Json<LinkDraft>,
) -> Result<impl IntoResponse> {
    validate_link_fields(Some(&draft.title), Some(&draft.url))?;
    if let Some(commerce) = &draft.commerce {
        validate_commerce(commerce)?;
    }
    if let Some(rules) = draft.smart_rules.take() {
        let (rules, _) = normalize_smart_rules(rules, state.config.strict_rule_validation)?;
        draft.smart_rules = Some(rules);
    }

    let link = state.store.create(&principal.user_id, draft)?;
    info!(link_id = %link.id, owner_id = %link.owner_id, "link created");

    Ok((StatusCode::CREATED, Json(link)))
}

/// Updates the given fields of a link
pub async fn update_link(
    Extension(principal): Extension<Principal>,
    Path(link_id): Path<String>,
    State(state): State<AppState>,
    Json(mut patch): Json<LinkPatch>,
) -> Result<Json<Link>> {
    owned_link(&state, &principal, &link_id)?;

    validate_link_fields(patch.title.as_deref(), patch.url.as_deref())?;
    if let Some(commerce) = &patch.commerce {
        validate_commerce(commerce)?;
    }
    if let Some(rules) = patch.smart_rules.take() {
        let (rules, _) = normalize_smart_rules(rules, state.config.strict_rule_validation)?;
        patch.smart_rules = Some(rules);
    }

    Ok(Json(state.store.update_fields(&link_id, patch)?))
}

/// Rule editor endpoint
///
/// Accepts the raw settings form (free-text country list and toggles),
/// normalizes it and replaces the link's smart rules. With strict
/// validation any malformed country token rejects the whole submission;
/// otherwise dropped tokens are reported back.
pub async fn update_rules(
    Extension(principal): Extension<Principal>,
    Path(link_id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<RulesInput>,
) -> Result<Json<RulesResponse>> {
    owned_link(&state, &principal, &link_id)?;

    let (rules, dropped_tokens) = normalize_rules_input(&input, state.config.strict_rule_validation)?;
    if !dropped_tokens.is_empty() {
        debug!(link_id = %link_id, ?dropped_tokens, "dropped malformed country tokens");
    }

    let link = state.store.update_fields(
        &link_id,
        LinkPatch {
            smart_rules: Some(rules),
            ..Default::default()
        },
    )?;

    Ok(Json(RulesResponse {
        link,
        dropped_tokens,
    }))
}

/// Deletes a link owned by the caller
///
/// # Response
///
/// - **200 OK** - link deleted
/// - **403 Forbidden** - link belongs to someone else
/// - **404 Not Found** - link does not exist
pub async fn delete_link(
    Extension(principal): Extension<Principal>,
    Path(link_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    owned_link(&state, &principal, &link_id)?;
    state.store.delete_by_id(&link_id)?;

    Ok(Json(json!({
        "message": "Link deleted successfully",
        "deleted_id": link_id
    })))
}

/// Applies a new ordering to several links in one atomic batch
pub async fn reorder_links(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
    Json(payload): Json<ReorderRequest>,
) -> Result<impl IntoResponse> {
    let items: Vec<(String, i64)> = payload
        .items
        .into_iter()
        .map(|item| (item.id, item.order))
        .collect();

    state.store.batch_reorder(&principal.user_id, &items)?;

    Ok(Json(json!({
        "message": "Links reordered successfully",
        "updated": items.len()
    })))
}

fn is_valid_code(code: &str) -> bool {
    (1..=64).contains(&code.len())
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Creates a short link
///
/// Uses `custom_code` when given, otherwise a random 6-character code.
///
/// # Response
///
/// - **201 Created** - short link created
/// - **409 Conflict** - custom code already taken
pub async fn create_short_link(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
    Json(payload): Json<CreateShortLinkRequest>,
) -> Result<impl IntoResponse> {
    validate_target_url(&payload.url)?;

    let custom_code = payload.custom_code.filter(|code| !code.is_empty());
    if let Some(code) = &custom_code {
        if !is_valid_code(code) {
            return Err(AppError::BadRequest(
                "Custom code may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
    }

    let mut attempts = 0;
    let short_link = loop {
        let short_link = ShortLink {
            code: custom_code.clone().unwrap_or_else(|| random_id(6)),
            original_url: payload.url.clone(),
            owner_id: principal.user_id.clone(),
            created_at: Utc::now(),
            clicks: 0,
        };

        match state.store.create_short_link(&short_link) {
            Ok(()) => break short_link,
            // A generated code collided, draw another one
            Err(StoreError::Conflict(_)) if custom_code.is_none() && attempts < 3 => attempts += 1,
            Err(err) => return Err(err.into()),
        }
    };

    let response = CreateShortLinkResponse {
        short_url: state.config.short_url(&short_link.code),
        code: short_link.code,
        original_url: short_link.original_url,
        created_at: short_link.created_at,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Lists the caller's short links with their click counts
pub async fn list_short_links(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ShortLink>>> {
    Ok(Json(state.store.list_short_links(&principal.user_id)?))
}

/// Deletes a short link owned by the caller
pub async fn delete_short_link(
    Extension(principal): Extension<Principal>,
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    state.store.delete_short_link(&principal.user_id, &code)?;

    Ok(Json(json!({
        "message": "Short link deleted successfully",
        "deleted_id": code
    })))
}

/// Back office: paginated list of creator profiles
pub async fn admin_list_profiles(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse> {
    let (page, limit, offset) = params.window();
    let profiles = state.store.list_profiles(offset, limit)?;

    Ok(Json(json!({
        "page": page,
        "limit": limit,
        "total_fetched": profiles.len(),
        "data": profiles
    })))
}

/// Back office: paginated list of subscriptions
pub async fn admin_list_subscriptions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse> {
    let (page, limit, offset) = params.window();
    let subscriptions = state.store.list_subscriptions(offset, limit)?;

    Ok(Json(json!({
        "page": page,
        "limit": limit,
        "total_fetched": subscriptions.len(),
        "data": subscriptions
    })))
}

/// Back office: sets a user's subscription by hand
pub async fn admin_set_subscription(
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<SubscriptionUpdate>,
) -> Result<impl IntoResponse> {
    let subscription =
        state
            .store
            .set_subscription(&user_id, payload.active, payload.plan, None, Utc::now())?;
    info!(admin = %principal.user_id, user_id = %user_id, active = payload.active, "subscription set by admin");

    Ok(Json(subscription))
}

/// Back office: unlock audit trail of a link
pub async fn admin_link_grants(
    Path(link_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.store.grants_for_link(&link_id)?))
}
