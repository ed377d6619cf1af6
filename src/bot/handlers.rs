use anyhow::Result;
use serenity::{
    builder::{CreateEmbed, CreateMessage},
    model::{
        channel::Message,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, info, warn};

use super::{commands::Command, Blothera};
use crate::{
    audio::session::{RequestContext, SessionScheduler},
    error::MusicError,
    sources::Requester,
    ui::embeds,
};

/// Runs a parsed command.
///
/// Music errors are reported back to the channel; anything else is returned
/// to the caller for logging.
pub async fn handle_command(
    ctx: &Context,
    msg: &Message,
    command: Command,
    bot: &Blothera,
) -> Result<()> {
    let guild_id = msg
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside of a server"))?;

    info!(
        "📝 Command {:?} used by {} in guild {}",
        command, msg.author.name, guild_id
    );

    let result = match command {
        Command::Play(query) => handle_play(ctx, msg, guild_id, &query, bot).await,
        Command::Playlist(queries) => handle_playlist(ctx, msg, guild_id, &queries, bot).await,
        Command::Search(query) => handle_search(ctx, msg, &query, bot).await,
        Command::NowPlaying => handle_nowplaying(ctx, msg, guild_id, bot).await,
        Command::Queue(page) => handle_queue(ctx, msg, guild_id, page, bot).await,
        Command::Shuffle => handle_shuffle(ctx, msg, guild_id, bot).await,
        Command::Loop => handle_loop(ctx, msg, guild_id, bot).await,
        Command::Skip => handle_skip(ctx, msg, guild_id, bot).await,
        Command::Stop => handle_stop(ctx, msg, guild_id, bot).await,
        Command::MusicStates => handle_musicstates(ctx, msg, bot).await,
    };

    match result {
        Err(e) => match e.downcast_ref::<MusicError>() {
            Some(music_error) => {
                warn!("⚠️ Command failed in guild {}: {}", guild_id, music_error);
                send_embed(ctx, msg.channel_id, embeds::create_error_embed(&music_error.to_string()))
                    .await
            }
            None => Err(e),
        },
        Ok(()) => Ok(()),
    }
}

async fn handle_play(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    query: &str,
    bot: &Blothera,
) -> Result<()> {
    let Some(voice_channel) = author_voice_channel(ctx, guild_id, msg.author.id) else {
        msg.channel_id
            .say(&ctx.http, "You aren't in a voice channel")
            .await?;
        return Ok(());
    };

    let Some(track) = bot.resolver.resolve_one(query).await.map_err(MusicError::from)? else {
        msg.channel_id
            .say(&ctx.http, format!("No results found for **{}**", query))
            .await?;
        return Ok(());
    };

    let session = bot.sessions.get(guild_id);
    session.join_channel(voice_channel).await?;

    let reference = track.reference().to_string();
    session.add_song(track, false, request_context(msg)).await?;

    let visible = session.visible_queue().await?;
    let embed = match visible.iter().rposition(|t| t.reference() == reference) {
        Some(index) => embeds::create_song_added_embed(&visible[index], index + 1),
        // Already picked up by the driver and out of the queue.
        None => match session.current_track().await? {
            Some(current) => embeds::create_now_playing_embed(&current),
            None => return Ok(()),
        },
    };

    send_embed(ctx, msg.channel_id, embed).await
}

/// Bulk add: queries are resolved and queued one by one until the batch is
/// done or a `stop` vetoes it.
async fn handle_playlist(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    queries: &[String],
    bot: &Blothera,
) -> Result<()> {
    let Some(voice_channel) = author_voice_channel(ctx, guild_id, msg.author.id) else {
        msg.channel_id
            .say(&ctx.http, "You aren't in a voice channel")
            .await?;
        return Ok(());
    };

    let session = bot.sessions.get(guild_id);
    session.join_channel(voice_channel).await?;

    let mut added = 0;
    for query in queries {
        let track = match bot.resolver.resolve_one(query).await {
            Ok(Some(track)) => track,
            Ok(None) => {
                warn!("🔍 No results for playlist entry '{}'", query);
                continue;
            }
            Err(e) => {
                warn!("❌ Could not resolve playlist entry '{}': {}", query, e);
                continue;
            }
        };

        if !session.add_song(track, true, request_context(msg)).await? {
            info!("🚫 Playlist in guild {} stopped after {} songs", guild_id, added);
            break;
        }
        added += 1;
    }
    session.finish_batch()?;

    send_embed(
        ctx,
        msg.channel_id,
        embeds::create_playlist_added_embed(added, queries.len()),
    )
    .await
}

async fn handle_search(ctx: &Context, msg: &Message, query: &str, bot: &Blothera) -> Result<()> {
    let results = bot
        .resolver
        .resolve_many(query, bot.config.search_limit)
        .await
        .map_err(MusicError::from)?;

    send_embed(
        ctx,
        msg.channel_id,
        embeds::create_search_results_embed(query, &results, bot.config.render_budget),
    )
    .await
}

async fn handle_nowplaying(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    bot: &Blothera,
) -> Result<()> {
    let current = bot
        .sessions
        .get(guild_id)
        .current_track()
        .await?
        .ok_or(MusicError::MusicNotPlaying)?;

    send_embed(ctx, msg.channel_id, embeds::create_now_playing_embed(&current)).await
}

async fn handle_queue(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    page: usize,
    bot: &Blothera,
) -> Result<()> {
    let session = bot.sessions.get(guild_id);
    let current = session
        .current_track()
        .await?
        .ok_or(MusicError::QueueEmpty)?;
    let page = session.page(page).await?;

    send_embed(
        ctx,
        msg.channel_id,
        embeds::create_queue_embed(&current, &page, bot.config.render_budget),
    )
    .await
}

async fn handle_shuffle(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    bot: &Blothera,
) -> Result<()> {
    let reply = if bot.sessions.get(guild_id).shuffle().await? {
        "The queue is now shuffled"
    } else {
        "The queue has been unshuffled"
    };
    msg.channel_id.say(&ctx.http, reply).await?;
    Ok(())
}

async fn handle_loop(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &Blothera) -> Result<()> {
    let reply = if bot.sessions.get(guild_id).toggle_loop().await? {
        "The queue will now loop"
    } else {
        "The queue will no longer loop"
    };
    msg.channel_id.say(&ctx.http, reply).await?;
    Ok(())
}

async fn handle_skip(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &Blothera) -> Result<()> {
    bot.sessions.get(guild_id).skip().await?;
    msg.channel_id.say(&ctx.http, "Skipping...").await?;
    Ok(())
}

async fn handle_stop(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &Blothera) -> Result<()> {
    bot.sessions.get(guild_id).stop().await?;
    msg.channel_id
        .say(&ctx.http, "⏹️ Stopped the music and cleared the queue")
        .await?;
    Ok(())
}

/// Owner-only overview of every guild that is playing.
async fn handle_musicstates(ctx: &Context, msg: &Message, bot: &Blothera) -> Result<()> {
    let owner = ctx
        .http
        .get_current_application_info()
        .await?
        .owner
        .map(|user| user.id);
    if owner != Some(msg.author.id) {
        warn!("🔒 {} tried to use musicstates", msg.author.name);
        return Ok(());
    }

    let statuses = bot.sessions.statuses().await;
    let named = statuses.iter().map(|status| {
        let name = status
            .guild_id
            .name(&ctx.cache)
            .unwrap_or_else(|| status.guild_id.to_string());
        (name, status)
    });
    let rendered = embeds::render_session_states(named, bot.config.render_budget);

    msg.channel_id.say(&ctx.http, rendered).await?;
    Ok(())
}

fn request_context(msg: &Message) -> RequestContext {
    RequestContext {
        channel: msg.channel_id,
        requester: Requester {
            id: msg.author.id,
            name: msg.author.name.clone(),
        },
    }
}

/// The voice channel `user_id` is connected to, from the gateway cache.
pub(super) fn author_voice_channel(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

async fn send_embed(ctx: &Context, channel_id: ChannelId, embed: CreateEmbed) -> Result<()> {
    channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

/// Pauses a session whose voice channel was left empty, resumes it when
/// someone comes back.
pub(super) async fn sync_listeners(session: &SessionScheduler, listeners: usize) {
    let result = if listeners == 0 {
        info!("⏸️ Alone in voice in guild {}, pausing", session.guild_id());
        session.pause().await
    } else {
        session.resume().await
    };

    if let Err(e) = result {
        debug!("Listener sync skipped in guild {}: {}", session.guild_id(), e);
    }
}
