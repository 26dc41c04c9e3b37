//! User model — the account layer.
//!
//! Users are provisioned through the Telegram bot and identified by the chat
//! id that created them. Credentials (name, password hash, client token) and
//! OAuth tokens live here; hub sessions attach at runtime and are tracked by
//! the registry, not the model.

/// Provisioning-bot conversation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BotStatus {
    #[default]
    Idle,
    Renew,
    Remove,
}

/// A provisioned account.
#[derive(Debug, Clone, Default)]
pub struct User {
    /// Provisioning chat id (primary key).
    pub chat: i64,

    /// Generated login name, unique among users.
    pub name: String,

    /// Salted MD5 password hash, hex-encoded (salt prefix + digest).
    pub hash: String,

    /// 32-byte shared secret the user's hubs present during authorization.
    pub client_token: Vec<u8>,

    /// Current OAuth access token (32 bytes, empty when unlinked).
    pub access_token: Vec<u8>,

    /// Current OAuth refresh token (32 bytes, empty when unlinked).
    pub refresh_token: Vec<u8>,

    /// Absolute access-token expiry, Unix seconds.
    pub token_expire: i64,

    /// Absolute expiry of a pending authorization code, Unix seconds.
    pub code_expire: i64,

    /// Pending bot confirmation, if any.
    pub bot_status: BotStatus,
}

impl User {
    /// Whether `token` matches the current access token and it has not
    /// expired at `now`.
    pub fn access_token_valid(&self, token: &[u8], now: i64) -> bool {
        !self.access_token.is_empty() && self.access_token == token && self.token_expire >= now
    }

    /// Drop the OAuth token pair without destroying the account.
    pub fn unlink(&mut self) {
        self.access_token.clear();
        self.refresh_token.clear();
        self.token_expire = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlink_clears_tokens_only() {
        let mut user = User {
            chat: 42,
            name: "user_aa".into(),
            client_token: vec![1; 32],
            access_token: vec![2; 32],
            refresh_token: vec![3; 32],
            token_expire: 100,
            ..Default::default()
        };

        user.unlink();

        assert!(user.access_token.is_empty());
        assert!(user.refresh_token.is_empty());
        assert_eq!(user.token_expire, 0);
        assert_eq!(user.client_token, vec![1; 32]);
        assert_eq!(user.name, "user_aa");
    }

    #[test]
    fn expired_token_does_not_validate() {
        let user = User {
            access_token: vec![2; 32],
            token_expire: 100,
            ..Default::default()
        };

        assert!(user.access_token_valid(&[2; 32], 100));
        assert!(!user.access_token_valid(&[2; 32], 101));
        assert!(!user.access_token_valid(&[9; 32], 100));
    }
}
