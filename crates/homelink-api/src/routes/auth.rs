//! Account-linking routes — login form, OAuth code and token exchange.
//!
//! The flow the voice platform drives: it opens `/login`, the user submits
//! the provisioned credentials, we 301 back to the platform's redirect URI
//! with a one-shot cipher-wrapped code, and the platform exchanges it at
//! `/token` (or rotates at `/refresh`) for cipher-wrapped bearer tokens.

use crate::AppState;
use crate::registry::TOKEN_EXPIRE_TIMEOUT;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use homelink_common::config;
use homelink_common::crypto::Aes128Cbc;
use homelink_common::error::{HomelinkError, HomelinkResult};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/token", post(token))
        .route("/refresh", post(refresh))
        .route("/logo.png", get(logo))
}

/// Percent-decoded `application/x-www-form-urlencoded` fields.
fn form_fields(body: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

/// 301 with a Location header, as the platform's linking flow expects.
fn moved(location: &str) -> HomelinkResult<Response> {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .map_err(|error| HomelinkError::Internal(error.into()))
}

/// GET /login
///
/// Serves the login page with the OAuth round-trip parameters substituted
/// into the `%1..%5` placeholders of the template.
async fn login_page(Query(params): Query<HashMap<String, String>>) -> HomelinkResult<Response> {
    let path = format!("{}/login.html", config::get().server.path);
    let template = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| HomelinkError::NotFound {
            resource: "login page".into(),
        })?;

    let field = |key: &str| params.get(key).cloned().unwrap_or_default();
    let page = template
        .replace("%1", &field("client_id"))
        .replace("%2", &field("redirect_uri"))
        .replace("%3", &field("state"))
        .replace("%4", &field("username"))
        .replace("%5", &field("password"));

    Ok(Html(page).into_response())
}

/// POST /login
///
/// Validates credentials; success redirects to the platform with a fresh
/// authorization code, failure bounces back to the form with the submitted
/// fields preserved.
async fn login(State(state): State<Arc<AppState>>, body: String) -> HomelinkResult<Response> {
    let fields = form_fields(&body);
    let field = |key: &str| fields.get(key).map(String::as_str).unwrap_or_default();

    if field("client_id") != state.registry.client_id() {
        return Err(HomelinkError::Forbidden);
    }

    let Some(chat) = state
        .registry
        .authenticate(field("username"), field("password"))
    else {
        return moved(&format!("/login?{body}"));
    };

    let code = state
        .registry
        .issue_code(chat)
        .ok_or(HomelinkError::Unauthorized)?;

    tracing::info!(user = field("username"), "Logged in");

    moved(&format!(
        "{}?state={}&code={}",
        field("redirect_uri"),
        field("state"),
        code
    ))
}

enum Grant {
    AuthorizationCode,
    RefreshToken,
}

/// POST /token — authorization_code grant.
async fn token(State(state): State<Arc<AppState>>, body: String) -> HomelinkResult<Response> {
    exchange(state, body, Grant::AuthorizationCode).await
}

/// POST /refresh — refresh_token grant.
async fn refresh(State(state): State<Arc<AppState>>, body: String) -> HomelinkResult<Response> {
    exchange(state, body, Grant::RefreshToken).await
}

async fn exchange(state: Arc<AppState>, body: String, grant: Grant) -> HomelinkResult<Response> {
    let fields = form_fields(&body);
    let field = |key: &str| fields.get(key).map(String::as_str).unwrap_or_default();

    let expected = match grant {
        Grant::AuthorizationCode => "authorization_code",
        Grant::RefreshToken => "refresh_token",
    };

    if field("client_id") != state.registry.client_id() || field("grant_type") != expected {
        return Err(HomelinkError::Forbidden);
    }

    // Grants decrypt with the secret the client presented, not ours; a
    // mismatched secret simply yields garbage and a failed lookup.
    let secret = hex::decode(field("client_secret")).unwrap_or_default();
    let mut cipher = Aes128Cbc::from_secret(&secret).map_err(|_| HomelinkError::Unauthorized)?;

    let chat = match grant {
        Grant::AuthorizationCode => state.registry.exchange_code(&mut cipher, field("code")),
        Grant::RefreshToken => state.registry.find_by_refresh(&mut cipher, field("refresh_token")),
    }
    .ok_or(HomelinkError::Unauthorized)?;

    let (user, access_token, refresh_token) = state
        .registry
        .rotate_tokens(chat)
        .ok_or(HomelinkError::Unauthorized)?;

    homelink_db::repository::users::update_tokens(&state.db.pool, &user).await?;

    tracing::info!(
        user = %user.name,
        "Token {}",
        match grant {
            Grant::AuthorizationCode => "issued",
            Grant::RefreshToken => "refreshed",
        }
    );

    Ok(Json(json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "Bearer",
        "expires_in": TOKEN_EXPIRE_TIMEOUT,
    }))
    .into_response())
}

/// GET /logo.png
async fn logo() -> HomelinkResult<Response> {
    let path = format!("{}/logo.png", config::get().server.path);
    let image = tokio::fs::read(&path)
        .await
        .map_err(|_| HomelinkError::NotFound {
            resource: "logo".into(),
        })?;

    Ok(([(header::CONTENT_TYPE, "image/png")], image).into_response())
}
