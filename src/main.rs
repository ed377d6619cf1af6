use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod ui;

use crate::audio::{registry::SessionRegistry, transport::SongbirdConnector};
use crate::bot::{announcer::ChannelAnnouncer, Blothera};
use crate::config::Config;
use crate::sources::{TrackResolver, YouTubeApiClient, YtDlpFetcher};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("blothera=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting blothera v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());
    let config = Arc::new(config);

    // Content resolution
    let search = YouTubeApiClient::new(config.youtube_api_key.clone(), config.request_timeout())?;
    let fetcher = YtDlpFetcher::new(config.ytdlp_path.clone());
    let resolver = TrackResolver::new(Arc::new(search), Arc::new(fetcher));

    // Voice and announcements
    let songbird = Songbird::serenity();
    let http = Arc::new(Http::new(&config.discord_token));
    let connector = SongbirdConnector::new(
        Arc::clone(&songbird),
        reqwest::Client::new(),
        config.default_volume,
    );
    let sessions = Arc::new(SessionRegistry::new(
        resolver.clone(),
        Arc::new(connector),
        Arc::new(ChannelAnnouncer::new(http)),
    ));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = Blothera::new(Arc::clone(&config), Arc::clone(&sessions), resolver);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Graceful shutdown
    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        sessions.shutdown();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("{} is not usable", config.ytdlp_path);
    }
}
