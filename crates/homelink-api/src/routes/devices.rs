//! Smart-home device API — discovery, state query, action dispatch, unlink.
//!
//! Device ids on this surface are `<hub-uniqueId>/<service>/<device>[/<endpoint>]`.
//! Resolution walks the user's live hub sessions; a missing device is
//! `DEVICE_NOT_FOUND`, an unavailable device or missing endpoint is
//! `DEVICE_UNREACHABLE`.

use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, head, post};
use axum::{Json, Router};
use homelink_common::config;
use homelink_common::error::{HomelinkError, HomelinkResult};
use homelink_hub::SessionHandle;
use serde_json::{Value, json};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1.0", head(health))
        .route("/api/v1.0/user/unlink", post(unlink))
        .route("/api/v1.0/user/devices", get(devices))
        .route("/api/v1.0/user/devices/query", post(query))
        .route("/api/v1.0/user/devices/action", post(action))
}

/// HEAD /api/v1.0
async fn health() -> StatusCode {
    StatusCode::OK
}

/// Resolve the bearer token to a user or fail with 401.
fn authorize(state: &AppState, headers: &HeaderMap) -> HomelinkResult<(i64, String)> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    state
        .registry
        .bearer(header)
        .ok_or(HomelinkError::Unauthorized)
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("X-Request-Id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

/// POST /api/v1.0/user/unlink
async fn unlink(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HomelinkResult<Json<Value>> {
    let (chat, name) = authorize(&state, &headers)?;

    let user = state
        .registry
        .unlink(chat)
        .ok_or(HomelinkError::Unauthorized)?;
    homelink_db::repository::users::update_tokens(&state.db.pool, &user).await?;

    tracing::info!(user = %name, "Unlinked");

    Ok(Json(json!({ "request_id": request_id(&headers) })))
}

/// GET /api/v1.0/user/devices
///
/// Enumerate every endpoint of every device of every hub the user owns.
/// Endpoints without capabilities or properties are skipped.
async fn devices(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HomelinkResult<Json<Value>> {
    let (chat, name) = authorize(&state, &headers)?;
    let mut devices = Vec::new();

    for session in state.registry.sessions_of(chat) {
        let unique_id = session.unique_id().to_owned();
        let mut map = session.devices().lock().await;

        for device in map.values_mut() {
            let key = device.key.clone();
            let device_name = device.name.clone();
            let description = device.description.clone();

            for endpoint in device.endpoints.values_mut() {
                let mut capabilities = Vec::new();
                let mut properties = Vec::new();

                for index in 0..endpoint.capabilities.len() {
                    let state_json = endpoint.capability_state(index);
                    let capability = &endpoint.capabilities[index];
                    let mut item = json!({
                        "type": capability.wire_type(),
                        "retrievable": true,
                        "reportable": true,
                        "state": state_json,
                    });

                    if !capability.parameters.is_empty() {
                        item["parameters"] = Value::Object(capability.parameters.clone());
                    }

                    capabilities.push(item);
                }

                for property in endpoint.properties.values() {
                    let mut item = json!({
                        "type": property.wire_type(),
                        "retrievable": true,
                        "reportable": true,
                        "parameters": Value::Object(property.parameters.clone()),
                    });

                    // Properties without an observation ship without state
                    if property.value.is_some() {
                        item["state"] = property.state();
                    }

                    properties.push(item);
                }

                if capabilities.is_empty() && properties.is_empty() {
                    continue;
                }

                let mut id = format!("{unique_id}/{key}");
                let mut name = device_name.clone();
                let mut model = device_name.clone();

                if endpoint.id != 0 {
                    id.push_str(&format!("/{}", endpoint.id));
                    name.push_str(&format!(" {}", endpoint.id));
                }

                if !description.is_empty() {
                    model.push_str(&format!(" ({description})"));
                }

                devices.push(json!({
                    "id": id,
                    "name": name,
                    "type": endpoint.device_type(),
                    "capabilities": capabilities,
                    "properties": properties,
                    "device_info": { "model": model },
                }));
            }
        }
    }

    let response = json!({
        "request_id": request_id(&headers),
        "payload": { "user_id": name, "devices": devices },
    });

    if config::get().server.debug {
        tracing::debug!(user = %name, "Devices reply: {response}");
    }

    state.stats.count_api_call();
    Ok(Json(response))
}

/// Split a wire device id and resolve the session owning it.
fn resolve_session<'a>(
    sessions: &'a [Arc<SessionHandle>],
    id: &str,
) -> (Option<&'a Arc<SessionHandle>>, String, u8) {
    let mut parts = id.splitn(4, '/');
    let hub = parts.next().unwrap_or_default();
    let service = parts.next().unwrap_or_default();
    let device = parts.next().unwrap_or_default();
    let endpoint: u8 = parts.next().unwrap_or_default().parse().unwrap_or_default();

    (
        sessions.iter().find(|session| session.unique_id() == hub),
        format!("{service}/{device}"),
        endpoint,
    )
}

/// POST /api/v1.0/user/devices/query
async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> HomelinkResult<Json<Value>> {
    let (chat, name) = authorize(&state, &headers)?;
    let sessions = state.registry.sessions_of(chat);
    let mut devices = Vec::new();

    for item in body
        .get("devices")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
        devices.push(query_device(&sessions, id).await);
    }

    let response = json!({
        "request_id": request_id(&headers),
        "payload": { "devices": devices },
    });

    if config::get().server.debug {
        tracing::debug!(user = %name, "Query reply: {response}");
    }

    state.stats.count_api_call();
    Ok(Json(response))
}

async fn query_device(sessions: &[Arc<SessionHandle>], id: &str) -> Value {
    let error = |code: &str| json!({ "id": id, "error_code": code });
    let (session, key, endpoint_id) = resolve_session(sessions, id);

    let Some(session) = session else {
        return error("DEVICE_UNREACHABLE");
    };

    let mut map = session.devices().lock().await;

    let Some(device) = map.get_mut(&key) else {
        return error("DEVICE_NOT_FOUND");
    };

    if !device.available {
        return error("DEVICE_UNREACHABLE");
    }

    let Some(endpoint) = device.endpoints.get_mut(&endpoint_id) else {
        return error("DEVICE_UNREACHABLE");
    };

    let mut capabilities = Vec::new();
    let mut properties = Vec::new();

    for index in 0..endpoint.capabilities.len() {
        let state_json = endpoint.capability_state(index);
        capabilities.push(json!({
            "type": endpoint.capabilities[index].wire_type(),
            "state": state_json,
        }));
    }

    for property in endpoint.properties.values() {
        if property.value.is_none() {
            continue;
        }

        properties.push(json!({ "type": property.wire_type(), "state": property.state() }));
    }

    json!({ "id": id, "capabilities": capabilities, "properties": properties })
}

/// POST /api/v1.0/user/devices/action
async fn action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> HomelinkResult<Json<Value>> {
    let (chat, name) = authorize(&state, &headers)?;
    let sessions = state.registry.sessions_of(chat);
    let mut devices = Vec::new();

    for item in body
        .get("payload")
        .and_then(|payload| payload.get("devices"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
        let requested = item
            .get("capabilities")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        devices.push(dispatch_actions(&sessions, id, &requested).await);
    }

    let response = json!({
        "request_id": request_id(&headers),
        "payload": { "devices": devices },
    });

    if config::get().server.debug {
        tracing::debug!(user = %name, "Action reply: {response}");
    }

    state.stats.count_api_call();
    Ok(Json(response))
}

async fn dispatch_actions(
    sessions: &[Arc<SessionHandle>],
    id: &str,
    requested: &[Value],
) -> Value {
    let error = |code: &str| {
        json!({
            "id": id,
            "action_result": { "status": "ERROR", "error_code": code },
        })
    };

    let (session, key, endpoint_id) = resolve_session(sessions, id);

    let Some(session) = session else {
        return error("DEVICE_UNREACHABLE");
    };

    let mut map = session.devices().lock().await;

    let Some(device) = map.get_mut(&key) else {
        return error("DEVICE_NOT_FOUND");
    };

    let mut dispatched = false;

    if device.available {
        let topic = device.topic.clone();

        if let Some(endpoint) = device.endpoints.get_mut(&endpoint_id) {
            for request in requested {
                let wanted = request.get("type").and_then(Value::as_str).unwrap_or_default();
                let action_state = request.get("state").cloned().unwrap_or(Value::Null);

                // First capability of the requested type wins; unknown types
                // are skipped without failing the whole action
                if let Some(capability) = endpoint
                    .capabilities
                    .iter_mut()
                    .find(|capability| capability.wire_type() == wanted)
                {
                    let patch = capability.action(&action_state);
                    session.publish(&topic, endpoint.id, endpoint.numeric, patch);
                    dispatched = true;
                }
            }
        }
    }

    if dispatched {
        json!({ "id": id, "action_result": { "status": "DONE" } })
    } else {
        error("DEVICE_UNREACHABLE")
    }
}
