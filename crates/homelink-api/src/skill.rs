//! Upstream skill callbacks — discovery and state pushes to the voice
//! platform. Fire-and-forget: spawned, never retried, failures logged at
//! debug. The event counter is the caller's concern and ticks whether or not
//! the POST lands.

use serde_json::{Value, json};

#[derive(Clone)]
pub struct SkillClient {
    http: reqwest::Client,
    id: String,
    token: String,
    url: String,
}

impl SkillClient {
    /// `url` is the callback base (empty disables callbacks entirely).
    pub fn new(http: reqwest::Client, id: &str, token: &str, url: &str) -> Self {
        Self {
            http,
            id: id.to_owned(),
            token: token.to_owned(),
            url: url.trim_end_matches('/').to_owned(),
        }
    }

    fn post(&self, callback: &'static str, payload: Value) {
        if self.url.is_empty() {
            return;
        }

        let request = self
            .http
            .post(format!(
                "{}/skills/{}/callback/{}",
                self.url, self.id, callback
            ))
            .header("Authorization", format!("OAuth {}", self.token))
            .json(&json!({
                "ts": chrono::Utc::now().timestamp(),
                "payload": payload,
            }));

        tokio::spawn(async move {
            if let Err(error) = request.send().await {
                tracing::debug!("Skill {callback} callback failed: {error}");
            }
        });
    }

    /// The user's device roster changed; upstream should re-discover.
    pub fn post_discovery(&self, user: &str) {
        self.post("discovery", json!({ "user_id": user }));
    }

    /// Push changed capability/property states for the user's devices.
    pub fn post_state(&self, user: &str, devices: Vec<Value>) {
        self.post("state", json!({ "user_id": user, "devices": devices }));
    }
}
