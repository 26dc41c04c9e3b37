//! The user/code/token registry — the bridge's single source of truth for
//! accounts, pending authorization codes, and live hub sessions.
//!
//! All maps are guarded by plain mutexes held briefly and never across an
//! await; persistence is the caller's job (routes write through
//! `homelink-db` after mutating here).
//!
//! OAuth codes and tokens travel cipher-wrapped: each operation builds a
//! fresh AES-CBC instance keyed by the client secret, so ciphertexts are
//! always decipherable from the initial IV regardless of operation order.

use homelink_common::crypto::{self, Aes128Cbc, BLOCK_SIZE};
use homelink_common::models::user::{BotStatus, User};
use homelink_hub::{SessionAuthorizer, SessionHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Authorization code lifetime, seconds.
pub const CODE_EXPIRE_TIMEOUT: i64 = 60;
/// Access token lifetime, seconds (100 days).
pub const TOKEN_EXPIRE_TIMEOUT: i64 = 8_640_000;

struct UserEntry {
    user: User,
    sessions: HashMap<String, Arc<SessionHandle>>,
}

pub struct UserRegistry {
    users: Mutex<HashMap<i64, UserEntry>>,
    /// Pending authorization codes → issuing user.
    codes: Mutex<HashMap<Vec<u8>, i64>>,
    client_id: String,
    client_secret: [u8; BLOCK_SIZE],
}

impl UserRegistry {
    /// `client_secret` keys the token cipher and must be 16 raw bytes.
    pub fn new(client_id: &str, client_secret: Vec<u8>) -> anyhow::Result<Self> {
        let client_secret = client_secret
            .try_into()
            .map_err(|secret: Vec<u8>| anyhow::anyhow!("client secret is {} bytes, expected {BLOCK_SIZE}", secret.len()))?;

        Ok(Self {
            users: Mutex::new(HashMap::new()),
            codes: Mutex::new(HashMap::new()),
            client_id: client_id.to_owned(),
            client_secret,
        })
    }

    /// Seed the registry from persistence at startup.
    pub fn load(&self, users: Vec<User>) {
        let mut map = self.users.lock().unwrap();

        for user in users {
            map.insert(
                user.chat,
                UserEntry {
                    user,
                    sessions: HashMap::new(),
                },
            );
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn token_cipher(&self) -> Aes128Cbc {
        Aes128Cbc::new(&self.client_secret, crypto::md5(&self.client_secret))
    }

    /// Cipher-wrap token material for delivery to the OAuth client.
    pub fn encrypt_token(&self, token: &[u8]) -> String {
        let mut buffer = token.to_vec();
        self.token_cipher().encrypt(&mut buffer);
        hex::encode(buffer)
    }

    fn decrypt_hex(cipher: &mut Aes128Cbc, encoded: &str) -> Option<Vec<u8>> {
        let mut buffer = hex::decode(encoded).ok()?;
        cipher.decrypt(&mut buffer).ok()?;
        Some(buffer)
    }

    /// Copy of the user for persistence, if present.
    pub fn snapshot(&self, chat: i64) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .get(&chat)
            .map(|entry| entry.user.clone())
    }

    /// Verify login-form credentials, returning the chat id.
    pub fn authenticate(&self, name: &str, password: &str) -> Option<i64> {
        let users = self.users.lock().unwrap();

        users
            .values()
            .find(|entry| entry.user.name == name)
            .filter(|entry| crypto::verify_password(&entry.user.hash, password))
            .map(|entry| entry.user.chat)
    }

    /// Resolve an `Authorization: Bearer <hex>` header to a user.
    pub fn bearer(&self, header: &str) -> Option<(i64, String)> {
        let mut parts = header.split(' ');

        if parts.next() != Some("Bearer") {
            return None;
        }

        let token = Self::decrypt_hex(&mut self.token_cipher(), parts.next()?)?;
        let now = chrono::Utc::now().timestamp();
        let users = self.users.lock().unwrap();

        users
            .values()
            .find(|entry| entry.user.access_token_valid(&token, now))
            .map(|entry| (entry.user.chat, entry.user.name.clone()))
    }

    /// Mint a one-shot authorization code for `chat` and return its
    /// cipher-wrapped hex form for the redirect URL.
    pub fn issue_code(&self, chat: i64) -> Option<String> {
        let code = crypto::random_bytes(32);

        {
            let mut users = self.users.lock().unwrap();
            let entry = users.get_mut(&chat)?;
            entry.user.code_expire = chrono::Utc::now().timestamp() + CODE_EXPIRE_TIMEOUT;
        }

        self.codes.lock().unwrap().insert(code.clone(), chat);

        let mut buffer = code;
        self.token_cipher().encrypt(&mut buffer);
        Some(hex::encode(buffer))
    }

    /// Consume an authorization code delivered by the client, decrypting it
    /// with the secret the client presented. Codes are single-use.
    pub fn exchange_code(&self, cipher: &mut Aes128Cbc, encoded: &str) -> Option<i64> {
        let code = Self::decrypt_hex(cipher, encoded)?;
        self.codes.lock().unwrap().remove(&code)
    }

    /// Find the user holding `refresh_token` (cipher-wrapped hex).
    pub fn find_by_refresh(&self, cipher: &mut Aes128Cbc, encoded: &str) -> Option<i64> {
        let token = Self::decrypt_hex(cipher, encoded)?;

        if token.is_empty() {
            return None;
        }

        let users = self.users.lock().unwrap();

        users
            .values()
            .find(|entry| entry.user.refresh_token == token)
            .map(|entry| entry.user.chat)
    }

    /// Mint a fresh access/refresh pair, invalidating the previous one.
    /// Returns the updated user for persistence plus the cipher-wrapped
    /// forms for the response body.
    pub fn rotate_tokens(&self, chat: i64) -> Option<(User, String, String)> {
        let user = {
            let mut users = self.users.lock().unwrap();
            let entry = users.get_mut(&chat)?;

            entry.user.access_token = crypto::random_bytes(32);
            entry.user.refresh_token = crypto::random_bytes(32);
            entry.user.token_expire = chrono::Utc::now().timestamp() + TOKEN_EXPIRE_TIMEOUT;
            entry.user.clone()
        };

        let access = self.encrypt_token(&user.access_token);
        let refresh = self.encrypt_token(&user.refresh_token);
        Some((user, access, refresh))
    }

    /// Zero the token pair without destroying the account.
    pub fn unlink(&self, chat: i64) -> Option<User> {
        let mut users = self.users.lock().unwrap();
        let entry = users.get_mut(&chat)?;
        entry.user.unlink();
        Some(entry.user.clone())
    }

    /// Drop expired authorization codes. Runs on a 1 s timer.
    pub fn sweep_codes(&self) {
        let now = chrono::Utc::now().timestamp();
        let users = self.users.lock().unwrap();

        self.codes.lock().unwrap().retain(|_, chat| {
            users
                .get(chat)
                .is_some_and(|entry| entry.user.code_expire >= now)
        });
    }

    /// Live hub sessions bound to `chat`.
    pub fn sessions_of(&self, chat: i64) -> Vec<Arc<SessionHandle>> {
        self.users
            .lock()
            .unwrap()
            .get(&chat)
            .map(|entry| entry.sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Gauge readings for the statistics task: (users, hub sessions).
    pub fn counts(&self) -> (usize, usize) {
        let users = self.users.lock().unwrap();
        let sessions = users.values().map(|entry| entry.sessions.len()).sum();
        (users.len(), sessions)
    }

    // === provisioning (Telegram bot) ===

    pub fn bot_status(&self, chat: i64) -> Option<BotStatus> {
        self.users
            .lock()
            .unwrap()
            .get(&chat)
            .map(|entry| entry.user.bot_status)
    }

    pub fn set_bot_status(&self, chat: i64, status: BotStatus) {
        if let Some(entry) = self.users.lock().unwrap().get_mut(&chat) {
            entry.user.bot_status = status;
        }
    }

    /// Create or renew credentials for `chat`. Returns the updated user and
    /// the cleartext password shown to the operator exactly once.
    pub fn provision(&self, chat: i64) -> (User, String) {
        let salt = crypto::random_bytes(16);
        let password = hex::encode(crypto::random_bytes(8));

        let mut users = self.users.lock().unwrap();
        let entry = users.entry(chat).or_insert_with(|| UserEntry {
            user: User {
                chat,
                ..Default::default()
            },
            sessions: HashMap::new(),
        });

        entry.user.name = format!("user_{}", hex::encode(crypto::random_bytes(5)));
        entry.user.hash = crypto::hash_password(&salt, &password);
        entry.user.client_token = crypto::random_bytes(32);
        entry.user.unlink();
        entry.user.bot_status = BotStatus::Idle;

        (entry.user.clone(), password)
    }

    /// Destroy the account. Hub sessions die on their own when the hub
    /// reconnects and fails authorization.
    pub fn remove(&self, chat: i64) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .remove(&chat)
            .map(|entry| entry.user)
    }
}

impl SessionAuthorizer for UserRegistry {
    fn authorize(&self, token: &[u8], session: &Arc<SessionHandle>) -> Option<String> {
        if token.is_empty() {
            return None;
        }

        let mut users = self.users.lock().unwrap();
        let entry = users
            .values_mut()
            .find(|entry| entry.user.client_token == token)?;

        entry
            .sessions
            .insert(session.unique_id().to_owned(), session.clone());
        Some(entry.user.name.clone())
    }

    fn release(&self, session: &Arc<SessionHandle>) {
        let mut users = self.users.lock().unwrap();

        for entry in users.values_mut() {
            entry
                .sessions
                .retain(|_, existing| !Arc::ptr_eq(existing, session));
        }
    }
}
