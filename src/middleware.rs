use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::database::AppState;
use crate::error::AppError;

/// Header carrying the authenticated user id, set by the identity gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the comma-separated role claims of the user
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Header the payment processor sends with every webhook
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// The authenticated caller, resolved once per request
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Compares a presented credential with the configured one in constant time
fn secret_matches(presented: Option<&str>, expected: &str) -> bool {
    presented.is_some_and(|p| p.as_bytes().ct_eq(expected.as_bytes()).into())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Middleware for creator and admin routes
///
/// Authentication itself happens upstream. When `AUTHORIZATION` is
/// configured, the request must carry it verbatim in the `Authorization`
/// header, proving it passed through the gateway. The user id and role
/// claims the gateway forwarded are then attached as a [`Principal`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = &state.config.api_token {
        if !secret_matches(header_str(&headers, AUTHORIZATION.as_str()), token) {
            return Err(AppError::Unauthorized(
                "Invalid or missing authorization header".to_string(),
            ));
        }
    }

    // Ids are used as key prefixes in the store, so ':' is not allowed.
    let user_id = header_str(&headers, USER_ID_HEADER)
        .filter(|id| !id.contains(':'))
        .ok_or_else(|| AppError::Unauthorized("Missing or invalid user identity".to_string()))?
        .to_string();

    let roles: Vec<String> = header_str(&headers, USER_ROLES_HEADER)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    request.extensions_mut().insert(Principal { user_id, roles });
    Ok(next.run(request).await)
}

/// Middleware for back-office routes, layered inside [`auth_middleware`]
///
/// Access is granted by the configured `ADMIN_ROLE` claim.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let allowed = request
        .extensions()
        .get::<Principal>()
        .is_some_and(|p| p.has_role(&state.config.admin_role));

    if !allowed {
        return Err(AppError::Forbidden("Administrator role required".to_string()));
    }
    Ok(next.run(request).await)
}

/// Middleware for the payment webhook
///
/// Webhooks are refused outright when no `WEBHOOK_SECRET` is configured, so
/// an unverifiable payment can never unlock anything.
pub async fn webhook_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let verified = match &state.config.webhook_secret {
        Some(secret) => secret_matches(header_str(&headers, WEBHOOK_SECRET_HEADER), secret),
        None => false,
    };

    if !verified {
        warn!("rejected unverified payment webhook");
        return Err(AppError::Unauthorized("Webhook could not be verified".to_string()));
    }
    Ok(next.run(request).await)
}
