//! Application configuration loaded from an INI file and environment variables.
//!
//! Config precedence: env vars > INI file > defaults. The file location
//! defaults to `/etc/homelink/homelink.conf` and can be overridden with the
//! `--config` flag on the server binary.

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call homelink_common::config::init() first.")
}

/// Initialize the global configuration.
///
/// Should be called once at application startup, before any other code
/// accesses config.
pub fn init(path: Option<&str>) -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let file = path.unwrap_or("/etc/homelink/homelink.conf");

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.port", 8042)?
        .set_default("server.database", "/var/lib/homelink/homelink.db")?
        .set_default("server.path", "/usr/share/homelink")?
        .set_default("server.debug", false)?
        .set_default("http.port", 8084)?
        .set_default("client.id", "")?
        .set_default("client.secret", "")?
        .set_default("skill.id", "")?
        .set_default("skill.token", "")?
        .set_default("skill.url", "")?
        .set_default("bot.token", "")?
        .set_default("bot.url", "https://api.telegram.org")?
        .set_default("rrd.path", "")?
        // INI config file, optional
        .add_source(config::File::new(file, config::FileFormat::Ini).required(false))
        // Environment variables (HOMELINK_SERVER__PORT, HOMELINK_CLIENT__SECRET, etc.)
        .add_source(
            config::Environment::with_prefix("HOMELINK")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub http: HttpConfig,
    pub client: ClientConfig,
    pub skill: SkillConfig,
    pub bot: BotConfig,
    pub rrd: RrdConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Hub TCP protocol port.
    pub port: u16,
    /// SQLite database path.
    pub database: String,
    /// Static asset directory (login.html, logo.png).
    pub path: String,
    /// Log full request/reply payloads on the API surface.
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// HTTP front door port.
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// OAuth application id the voice platform presents.
    pub id: String,
    /// OAuth client secret, hex-encoded 16 bytes. Keys the token cipher.
    pub secret: String,
}

impl ClientConfig {
    /// Decoded client secret bytes.
    pub fn secret_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(hex::decode(&self.secret)?)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SkillConfig {
    /// Upstream skill id used in callback URLs.
    pub id: String,
    /// OAuth token sent in the `Authorization` header of callbacks.
    pub token: String,
    /// Callback base URL, e.g. `https://dialogs.example.net/api/v1`.
    /// Empty disables upstream callbacks.
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Telegram bot token. Empty disables provisioning replies.
    pub token: String,
    /// Bot API base URL.
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RrdConfig {
    /// Directory for RRD statistics files. Empty disables statistics.
    pub path: String,
}
