//! Telegram provisioning webhook.
//!
//! Private-chat commands drive the credential lifecycle: `/start` and
//! `/renew` mint credentials (renewal asks for confirmation first),
//! `/remove` deletes the account after confirmation, `/getid` reports the
//! chat id. Replies go out through the Bot API fire-and-forget; the webhook
//! itself always answers 200 so Telegram does not re-deliver.

use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use homelink_common::config;
use homelink_common::models::user::{BotStatus, User};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/telegram", post(webhook))
}

async fn webhook(State(state): State<Arc<AppState>>, Json(update): Json<Value>) -> StatusCode {
    handle_update(&state, &update).await;
    StatusCode::OK
}

fn credentials_block(user: &User, password: &str) -> String {
    format!(
        "Username:\n`{}`\n\nPassword:\n`{}`\n\nClient token:\n`{}`",
        user.name,
        password,
        hex::encode(&user.client_token)
    )
}

async fn handle_update(state: &AppState, update: &Value) {
    let message = update.get("message").cloned().unwrap_or_default();
    let chat = message.get("chat").cloned().unwrap_or_default();
    let from_bot = message
        .pointer("/from/is_bot")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if chat.get("type").and_then(Value::as_str) != Some("private") || from_bot {
        return;
    }

    let Some(id) = chat.get("id").and_then(Value::as_i64) else {
        return;
    };

    let command = message.get("text").and_then(Value::as_str).unwrap_or_default();
    let exists = state.registry.snapshot(id).is_some();
    let mut reply = String::new();
    let mut provision = false;
    let mut remove = false;

    match command {
        "/start" => {
            if !exists {
                reply = "Credentials created.\n\n".into();
                provision = true;
            }
        }
        "/renew" => {
            if exists {
                reply = "Are you really want to get new credentials?\nSend /confirm or /cancel."
                    .into();
                state.registry.set_bot_status(id, BotStatus::Renew);
            } else {
                reply = "Credentials created.\n\n".into();
                provision = true;
            }
        }
        "/remove" => {
            if exists {
                reply = "Are you really want to remove your credentials?\nSend /confirm or /cancel."
                    .into();
                state.registry.set_bot_status(id, BotStatus::Remove);
            } else {
                reply = "Credentials not found.".into();
            }
        }
        "/confirm" => match state.registry.bot_status(id) {
            Some(BotStatus::Renew) => {
                reply = "Credentials updated.\n\n".into();
                provision = true;
            }
            Some(BotStatus::Remove) => {
                reply = "Credentials successfully removed.".into();
                remove = true;
            }
            _ => {}
        },
        "/cancel" => {
            if exists && state.registry.bot_status(id) != Some(BotStatus::Idle) {
                reply = "Action cancelled.".into();
                state.registry.set_bot_status(id, BotStatus::Idle);
            }
        }
        "/getid" => {
            reply = format!("Your chat identifier:\n`{id}`");
        }
        _ => {}
    }

    if provision {
        let (user, password) = state.registry.provision(id);
        reply.push_str(&credentials_block(&user, &password));

        if let Err(error) =
            homelink_db::repository::users::upsert_credentials(&state.db.pool, &user).await
        {
            tracing::warn!(chat = id, "Failed to persist credentials: {error}");
        }

        tracing::info!(user = %user.name, chat = id, "Credentials provisioned");
    } else if remove {
        state.registry.remove(id);

        if let Err(error) = homelink_db::repository::users::delete(&state.db.pool, id).await {
            tracing::warn!(chat = id, "Failed to delete user: {error}");
        }

        tracing::info!(chat = id, "Credentials removed");
    }

    if !reply.is_empty() {
        send_message(state, id, reply);
    }
}

/// Fire-and-forget Bot API send.
fn send_message(state: &AppState, chat: i64, text: String) {
    let bot = &config::get().bot;

    if bot.token.is_empty() {
        return;
    }

    let request = state
        .http
        .post(format!("{}/bot{}/sendMessage", bot.url, bot.token))
        .json(&json!({ "chat_id": chat, "parse_mode": "Markdown", "text": text }));

    tokio::spawn(async move {
        if let Err(error) = request.send().await {
            tracing::debug!("Telegram send failed: {error}");
        }
    });
}
