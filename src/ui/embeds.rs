use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{
        queue::QueuePage,
        session::{PlaybackState, SessionStatus},
    },
    sources::Track,
};

/// Standard colour palette for the bot
pub mod colors {
    use serenity::all::Colour;

    pub const BLOTHERA_RED: Colour = Colour::new(0xc62323);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
}

const STANDARD_FOOTER: &str = "🎵 blothera";

/// Embed for the track that just started.
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(track.title())
        .url(track.url())
        .colour(colors::BLOTHERA_RED)
        .field("Duration", display_duration(track.duration()), true)
        .field("Requester", requester_mention(track), true);

    if let Some(added_at) = track.added_at() {
        // Discord renders this as a relative time in the reader's locale.
        embed = embed.field("Queued", format!("<t:{}:R>", added_at.timestamp()), true);
    }

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed.timestamp(Timestamp::now())
}

/// Confirmation posted after `play` queued a track.
///
/// `position` is 1-based within the visible queue.
pub fn create_song_added_embed(track: &Track, position: usize) -> CreateEmbed {
    CreateEmbed::new()
        .colour(colors::BLOTHERA_RED)
        .author(CreateEmbedAuthor::new("+ Song added"))
        .footer(CreateEmbedFooter::new(format!(
            "{} has been added at position {} by {}",
            track.title(),
            position,
            requester_name(track)
        )))
}

/// Summary after a bulk add.
pub fn create_playlist_added_embed(added: usize, requested: usize) -> CreateEmbed {
    let description = if added == requested {
        format!("Added **{}** songs to the queue", added)
    } else {
        format!(
            "Added **{}** of {} songs to the queue before it was stopped",
            added, requested
        )
    };

    CreateEmbed::new()
        .colour(colors::BLOTHERA_RED)
        .author(CreateEmbedAuthor::new("+ Playlist added"))
        .description(description)
}

/// The queue listing: current track as the header, one page of the queue
/// below it.
pub fn create_queue_embed(current: &Track, page: &QueuePage, budget: usize) -> CreateEmbed {
    let mut description = format!("**{}**", current.title());

    let lines = page
        .items
        .iter()
        .enumerate()
        .map(|(i, track)| format!("**{}**. {}", page.offset + i + 1, track.title()));
    let lines = fit_to_budget(lines, budget.saturating_sub(description.len() + 20));
    if !lines.is_empty() {
        description.push_str("\n\n__Song Queue__\n");
        description.push_str(&lines.join("\n"));
    }

    let mut embed = CreateEmbed::new()
        .title("Now Playing")
        .url(current.url())
        .description(description)
        .colour(colors::BLOTHERA_RED);

    if let Some(thumbnail) = current.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    let mut footer = format!(
        "{} queued ({})",
        page.total_items,
        format_duration(page.total_duration)
    );
    if page.total_pages > 1 {
        footer = format!("Page {} of {} • {}", page.current_page, page.total_pages, footer);
    }
    embed.footer(CreateEmbedFooter::new(format!("{} • {}", footer, STANDARD_FOOTER)))
}

/// Numbered search hits, most relevant first.
pub fn create_search_results_embed(query: &str, results: &[Track], budget: usize) -> CreateEmbed {
    let lines = results
        .iter()
        .enumerate()
        .map(|(i, track)| format!("**{}**. [{}]({})", i + 1, track.title(), track.url()));
    let lines = fit_to_budget(lines, budget);

    let description = if lines.is_empty() {
        "No results".to_string()
    } else {
        lines.join("\n")
    };

    CreateEmbed::new()
        .title(format!("🔍 Results for \"{}\"", query))
        .description(description)
        .colour(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title("❌ Error")
        .description(description)
        .colour(colors::ERROR_RED)
        .timestamp(Timestamp::now())
}

/// One line per guild that is currently playing, for the `musicstates` command.
///
/// `L` marks a looping queue and `S` a shuffled one.
pub fn render_session_states<'a, I>(sessions: I, budget: usize) -> String
where
    I: IntoIterator<Item = (String, &'a SessionStatus)>,
{
    let lines = sessions
        .into_iter()
        .filter(|(_, status)| status.state == PlaybackState::Playing && status.transport_active)
        .map(|(name, status)| {
            let mut line = format!("{} - {}", name, status.queued);
            if status.looping {
                line.push_str(" L");
            }
            if status.shuffled {
                line.push_str(" S");
            }
            line
        });
    let lines = fit_to_budget(lines, budget.saturating_sub(6));

    if lines.is_empty() {
        "No servers are using voice currently".to_string()
    } else {
        format!("```{}```", lines.join("\n"))
    }
}

/// Keeps entries while their newline-joined length stays within `budget`
/// characters; the entry that crosses the budget is dropped and so is
/// everything after it.
pub fn fit_to_budget<I>(entries: I, budget: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut kept = Vec::new();
    let mut used = 0;

    for entry in entries {
        let separator = usize::from(!kept.is_empty());
        used += entry.chars().count() + separator;
        if used > budget {
            break;
        }
        kept.push(entry);
    }

    kept
}

fn requester_mention(track: &Track) -> String {
    track
        .requester()
        .map_or_else(|| "Unknown".to_string(), |r| format!("<@{}>", r.id))
}

fn requester_name(track: &Track) -> &str {
    track.requester().map_or("Unknown", |r| r.name.as_str())
}

fn display_duration(duration: Option<Duration>) -> String {
    duration.map_or_else(|| "🔴 Live".to_string(), format_duration)
}

/// Formats a duration for display
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Requester;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use serenity::model::id::{ChannelId, GuildId, UserId};
    use std::sync::Arc;

    fn track(name: &str) -> Track {
        let mut track = Track::new(format!("https://youtu.be/{name}"))
            .with_title(name)
            .with_duration(Duration::from_secs(754));
        track.stamp(
            ChannelId::new(1),
            Requester {
                id: UserId::new(2),
                name: "moth".to_string(),
            },
        );
        track
    }

    fn json(embed: &CreateEmbed) -> Value {
        serde_json::to_value(embed).unwrap()
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(754)), "12:34");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn budget_drops_the_entry_that_overflows() {
        let entries = vec!["a".repeat(10), "b".repeat(10), "c".repeat(10)];

        assert_eq!(fit_to_budget(entries.clone(), 21), vec!["a".repeat(10), "b".repeat(10)]);
        assert_eq!(fit_to_budget(entries.clone(), 32).len(), 3);
        assert!(fit_to_budget(entries, 5).is_empty());
    }

    #[test]
    fn now_playing_shows_duration_and_requester() {
        let value = json(&create_now_playing_embed(&track("Song")));

        assert_eq!(value["title"], "Song");
        assert_eq!(value["url"], "https://youtu.be/Song");
        assert_eq!(value["fields"][0]["value"], "12:34");
        assert_eq!(value["fields"][1]["value"], "<@2>");

        let queued = value["fields"][2]["value"].as_str().unwrap();
        assert!(queued.starts_with("<t:") && queued.ends_with(":R>"));
    }

    #[test]
    fn now_playing_skips_queue_time_for_unstamped_tracks() {
        let value = json(&create_now_playing_embed(&Track::new("https://youtu.be/x")));
        assert_eq!(value["fields"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn song_added_reports_position() {
        let value = json(&create_song_added_embed(&track("Song"), 3));
        assert_eq!(
            value["footer"]["text"],
            "Song has been added at position 3 by moth"
        );
    }

    #[test]
    fn queue_listing_numbers_from_the_page_offset() {
        let items: Vec<Arc<Track>> = ["K", "L"].iter().map(|n| Arc::new(track(n))).collect();
        let page = QueuePage {
            items,
            offset: 10,
            current_page: 2,
            total_pages: 2,
            total_items: 12,
            total_duration: Duration::from_secs(754 * 12),
        };

        let value = json(&create_queue_embed(&track("Now"), &page, 1900));
        let description = value["description"].as_str().unwrap();

        assert!(description.starts_with("**Now**"));
        assert!(description.contains("**11**. K\n**12**. L"));
        assert!(value["footer"]["text"]
            .as_str()
            .unwrap()
            .starts_with("Page 2 of 2"));
    }

    #[test]
    fn session_states_list_only_playing_guilds() {
        let status = |guild, state, looping, shuffled| SessionStatus {
            guild_id: GuildId::new(guild),
            state,
            queued: 4,
            shuffled,
            looping,
            transport_active: true,
        };
        let playing = status(1, PlaybackState::Playing, true, true);
        let idle = status(2, PlaybackState::Idle, false, false);

        let rendered = render_session_states(
            [("Moth Club".to_string(), &playing), ("Quiet".to_string(), &idle)],
            1900,
        );
        assert_eq!(rendered, "```Moth Club - 4 L S```");

        let rendered = render_session_states([("Quiet".to_string(), &idle)], 1900);
        assert_eq!(rendered, "No servers are using voice currently");
    }
}
