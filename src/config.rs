// =============================================================================
// Application Configuration — process environment
// =============================================================================
//
// Everything the process needs from its environment:
//
//   FEED_ENDPOINT        — WebSocket endpoint of the market feed
//   FEED_TOKEN           — authorization token for the feed session
//   DATABASE_URL         — handed to the (external) persistence layer
//   SESSION_SECRET       — optional secret for the session boundary
//   PORT                 — HTTP status API port (default 5000)
//   BOOTSTRAP_SESSIONS   — optional "chat:symbol:timeframe" list, comma
//                          separated, started at boot
// =============================================================================

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_FEED_ENDPOINT: &str = "wss://ws.binaryws.com/websockets/v3";
const DEFAULT_PORT: u16 = 5000;

/// A session to open automatically at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSession {
    pub chat_id: i64,
    pub symbol: String,
    pub timeframe: i64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feed_endpoint: String,
    pub feed_token: String,
    pub database_url: Option<String>,
    pub session_secret: Option<String>,
    pub port: u16,
    pub bootstrap_sessions: Vec<BootstrapSession>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let feed_token =
            std::env::var("FEED_TOKEN").context("FEED_TOKEN must be set")?;

        let feed_endpoint = std::env::var("FEED_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_FEED_ENDPOINT.to_string());

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid PORT value: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        };

        let bootstrap_sessions = match std::env::var("BOOTSTRAP_SESSIONS") {
            Ok(raw) => parse_bootstrap_sessions(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            feed_endpoint,
            feed_token,
            database_url: std::env::var("DATABASE_URL").ok(),
            session_secret: std::env::var("SESSION_SECRET").ok(),
            port,
            bootstrap_sessions,
        })
    }
}

/// Parse "chat:symbol:timeframe" entries, comma separated.
fn parse_bootstrap_sessions(raw: &str) -> Result<Vec<BootstrapSession>> {
    let mut sessions = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() != 3 {
            bail!("invalid BOOTSTRAP_SESSIONS entry '{entry}': expected chat:symbol:timeframe");
        }
        let chat_id: i64 = parts[0]
            .parse()
            .with_context(|| format!("invalid chat id in '{entry}'"))?;
        let timeframe: i64 = parts[2]
            .parse()
            .with_context(|| format!("invalid timeframe in '{entry}'"))?;
        if timeframe <= 0 {
            bail!("timeframe must be positive in '{entry}'");
        }
        sessions.push(BootstrapSession {
            chat_id,
            symbol: parts[1].to_string(),
            timeframe,
        });
    }
    Ok(sessions)
}
