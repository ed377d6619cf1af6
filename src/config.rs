use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

use crate::sources::DEFAULT_SEARCH_LIMIT;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Search
    pub youtube_api_key: Option<String>,
    pub search_limit: usize,
    pub request_timeout_secs: u64,

    // Playback
    pub ytdlp_path: String,
    pub default_volume: f32,

    // Rendering
    pub render_budget: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")
                .or_else(|_| std::env::var("TOKEN"))
                .context("DISCORD_TOKEN is not set")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            // Search
            youtube_api_key: std::env::var("YOUTUBE_API_KEY")
                .or_else(|_| std::env::var("YOUTUBE_API"))
                .ok()
                .filter(|key| !key.trim().is_empty()),
            search_limit: env_or("SEARCH_LIMIT", defaults.search_limit)?,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,

            // Playback
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,

            // Rendering
            render_budget: env_or("RENDER_BUDGET", defaults.render_budget)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Token and prefix must not be empty
    /// - Volume must be between 0.0 and 2.0
    /// - Search limit and timeout must be greater than 0
    /// - The render budget must fit in a Discord message (2000 characters)
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.search_limit == 0 {
            anyhow::bail!("Search limit must be greater than 0");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }

        if self.render_budget == 0 || self.render_budget > 2000 {
            anyhow::bail!(
                "Render budget must be between 1 and 2000, got: {}",
                self.render_budget
            );
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Secrets are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}'\n  \
            Search: YouTube API key {}, {} results, {}s timeout\n  \
            Playback: {}% vol, extractor '{}'\n  \
            Rendering: {} character budget",
            self.command_prefix,
            if self.youtube_api_key.is_some() { "set" } else { "missing" },
            self.search_limit,
            self.request_timeout_secs,
            (self.default_volume * 100.0) as u32,
            self.ytdlp_path,
            self.render_budget,
        )
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, value)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (token has no default - must be provided)
            discord_token: String::new(),
            command_prefix: "b!".to_string(),

            // Search defaults
            youtube_api_key: None,
            search_limit: DEFAULT_SEARCH_LIMIT,
            request_timeout_secs: 10,

            // Playback defaults
            ytdlp_path: "yt-dlp".to_string(),
            default_volume: 0.5,

            // Rendering defaults
            render_budget: 1900,
        }
    }
}
