//! Route definitions for the link-in-bio API
//!
//! This module wires every HTTP route to its handler and places each group
//! behind the middleware it needs.

use axum::routing::{delete, get, patch, post, put};
use axum::{middleware, Router};

use crate::database::AppState;
use crate::handler::{
    access_content, admin_link_grants, admin_list_profiles, admin_list_subscriptions,
    admin_set_subscription, cancel_checkout, checkout, create_link, create_short_link,
    delete_link, delete_short_link, get_profile, list_links, list_short_links, payment_webhook,
    profile_view, put_profile, redirect_short_link, reorder_links, update_link, update_rules,
};
use crate::middleware::{auth_middleware, require_admin, webhook_auth};

/// Creates and configures the Axum application router with all routes
///
/// # Route Definitions
///
/// Public:
/// - `GET /s/{code}` - Redirects a short link (fallback redirect if unknown)
/// - `GET /api/public/{username}` - Public profile with visible links
/// - `POST /api/public/links/{id}/checkout` - Opens the payment step of a locked link
/// - `POST /api/public/links/{id}/cancel` - Abandons the payment step
/// - `GET /api/public/links/{id}/access?session_id=` - Unlocked content
///
/// Payment processor (`x-webhook-secret`):
/// - `POST /api/webhooks/payments`
///
/// Creator (`x-user-id`, plus `Authorization` when configured):
/// - `GET|PUT /api/profile`
/// - `GET|POST /api/links`, `PUT /api/links/order`
/// - `PATCH|DELETE /api/links/{id}`, `PUT /api/links/{id}/rules`
/// - `GET|POST /api/shortlinks`, `DELETE /api/shortlinks/{code}`
///
/// Back office (creator auth plus the admin role):
/// - `GET /api/admin/profiles`, `GET /api/admin/subscriptions`
/// - `PUT /api/admin/subscriptions/{user_id}`
/// - `GET /api/admin/links/{id}/grants`
///
/// ```no_run
/// # use linkpage::config::Config;
/// # use linkpage::database::{AppState, RedbStore};
/// # use linkpage::route::create_app;
/// let store = RedbStore::open("data.db").unwrap();
/// let app = create_app(AppState::new(store, Config::default()));
/// // axum::serve(listener, app).await.unwrap();
/// ```
pub fn create_app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/{username}", get(profile_view))
        .route("/links/{id}/checkout", post(checkout))
        .route("/links/{id}/cancel", post(cancel_checkout))
        .route("/links/{id}/access", get(access_content));

    let webhook_routes = Router::new()
        .route("/payments", post(payment_webhook))
        .layer(middleware::from_fn_with_state(state.clone(), webhook_auth));

    let admin_routes = Router::new()
        .route("/profiles", get(admin_list_profiles))
        .route("/subscriptions", get(admin_list_subscriptions))
        .route("/subscriptions/{user_id}", put(admin_set_subscription))
        .route("/links/{id}/grants", get(admin_link_grants))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    // Layers run outside-in, so auth_middleware sees admin requests first
    let creator_routes = Router::new()
        .route("/profile", get(get_profile).put(put_profile))
        .route("/links", get(list_links).post(create_link))
        .route("/links/order", put(reorder_links))
        .route("/links/{id}", patch(update_link).delete(delete_link))
        .route("/links/{id}/rules", put(update_rules))
        .route("/shortlinks", get(list_short_links).post(create_short_link))
        .route("/shortlinks/{code}", delete(delete_short_link))
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/s/{code}", get(redirect_short_link))
        .nest("/api/public", public_routes)
        .nest("/api/webhooks", webhook_routes)
        .nest("/api", creator_routes)
        .with_state(state)
}
