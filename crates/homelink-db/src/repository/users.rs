//! Users table access.
//!
//! Binary fields (client token, access/refresh tokens) are stored
//! hex-encoded. NULL token columns read back as empty values.

use anyhow::Result;
use chrono::Utc;
use homelink_common::models::user::User;
use sqlx::{Row, SqlitePool};

/// Load every provisioned user. Called once at startup.
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<User>> {
    let rows = sqlx::query(
        "SELECT chat, name, hash, clientToken, accessToken, refreshToken, tokenExpire FROM users",
    )
    .fetch_all(pool)
    .await?;

    let mut users = Vec::with_capacity(rows.len());

    for row in rows {
        users.push(User {
            chat: row.try_get("chat")?,
            name: row.try_get("name")?,
            hash: row.try_get("hash")?,
            client_token: hex::decode(row.try_get::<String, _>("clientToken")?)?,
            access_token: hex::decode(
                row.try_get::<Option<String>, _>("accessToken")?.unwrap_or_default(),
            )?,
            refresh_token: hex::decode(
                row.try_get::<Option<String>, _>("refreshToken")?.unwrap_or_default(),
            )?,
            token_expire: row.try_get::<Option<i64>, _>("tokenExpire")?.unwrap_or(0),
            ..Default::default()
        });
    }

    Ok(users)
}

/// Insert or replace a user's credentials. Renewal zeroes the token columns —
/// previously linked accounts must re-link after a credential rotation.
pub async fn upsert_credentials(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (chat, name, hash, clientToken, timestamp) VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (chat) DO UPDATE SET
            name = excluded.name,
            hash = excluded.hash,
            clientToken = excluded.clientToken,
            accessToken = NULL,
            refreshToken = NULL,
            tokenExpire = NULL,
            timestamp = excluded.timestamp
        "#,
    )
    .bind(user.chat)
    .bind(&user.name)
    .bind(&user.hash)
    .bind(hex::encode(&user.client_token))
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a user's current token pair and expiry.
pub async fn update_tokens(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query(
        "UPDATE users SET accessToken = ?, refreshToken = ?, tokenExpire = ?, timestamp = ? WHERE chat = ?",
    )
    .bind(hex::encode(&user.access_token))
    .bind(hex::encode(&user.refresh_token))
    .bind(user.token_expire)
    .bind(Utc::now().timestamp())
    .bind(user.chat)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove a user entirely.
pub async fn delete(pool: &SqlitePool, chat: i64) -> Result<()> {
    sqlx::query("DELETE FROM users WHERE chat = ?")
        .bind(chat)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use homelink_common::crypto;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_user() -> User {
        User {
            chat: 100200300,
            name: "user_0102030405".into(),
            hash: crypto::hash_password(&crypto::random_bytes(16), "secret"),
            client_token: crypto::random_bytes(32),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn round_trips_credentials_and_tokens() {
        let pool = test_pool().await;
        let mut user = sample_user();

        upsert_credentials(&pool, &user).await.unwrap();

        let loaded = load_all(&pool).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].chat, user.chat);
        assert_eq!(loaded[0].client_token, user.client_token);
        assert!(loaded[0].access_token.is_empty());

        user.access_token = crypto::random_bytes(32);
        user.refresh_token = crypto::random_bytes(32);
        user.token_expire = 12345;
        update_tokens(&pool, &user).await.unwrap();

        let loaded = load_all(&pool).await.unwrap();
        assert_eq!(loaded[0].access_token, user.access_token);
        assert_eq!(loaded[0].token_expire, 12345);
    }

    #[tokio::test]
    async fn renewal_clears_tokens() {
        let pool = test_pool().await;
        let mut user = sample_user();

        upsert_credentials(&pool, &user).await.unwrap();
        user.access_token = crypto::random_bytes(32);
        user.refresh_token = crypto::random_bytes(32);
        user.token_expire = 999;
        update_tokens(&pool, &user).await.unwrap();

        // Renewed credentials: same chat, fresh token column state
        user.client_token = crypto::random_bytes(32);
        upsert_credentials(&pool, &user).await.unwrap();

        let loaded = load_all(&pool).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].access_token.is_empty());
        assert_eq!(loaded[0].token_expire, 0);
        assert_eq!(loaded[0].client_token, user.client_token);
    }

    #[tokio::test]
    async fn delete_removes_user() {
        let pool = test_pool().await;
        let user = sample_user();

        upsert_credentials(&pool, &user).await.unwrap();
        delete(&pool, user.chat).await.unwrap();

        assert!(load_all(&pool).await.unwrap().is_empty());
    }
}
