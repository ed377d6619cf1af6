use thiserror::Error;

/// A prefix command understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Playlist(Vec<String>),
    Search(String),
    NowPlaying,
    Queue(usize),
    Shuffle,
    Loop,
    Skip,
    Stop,
    MusicStates,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("Usage: `{prefix}{usage}`")]
    MissingArgument { prefix: String, usage: &'static str },

    #[error("'{0}' is not a valid page number")]
    InvalidPage(String),
}

/// Parses a chat message.
///
/// `None` means the message is not addressed to the bot (wrong prefix or
/// unknown command); `Some(Err(_))` is a known command used incorrectly.
pub fn parse(content: &str, prefix: &str) -> Option<Result<Command, UsageError>> {
    let body = content.trim().strip_prefix(prefix)?;
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };

    let missing = |usage| UsageError::MissingArgument {
        prefix: prefix.to_string(),
        usage,
    };

    let command = match name.to_lowercase().as_str() {
        "play" | "p" => {
            if args.is_empty() {
                return Some(Err(missing("play <url or search terms>")));
            }
            Command::Play(args.to_string())
        }
        "playlist" => {
            let queries: Vec<String> = args
                .split('|')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(String::from)
                .collect();
            if queries.is_empty() {
                return Some(Err(missing("playlist <song> | <song> | ...")));
            }
            Command::Playlist(queries)
        }
        "search" => {
            if args.is_empty() {
                return Some(Err(missing("search <search terms>")));
            }
            Command::Search(args.to_string())
        }
        "nowplaying" | "np" => Command::NowPlaying,
        "queue" | "q" => {
            if args.is_empty() {
                Command::Queue(1)
            } else {
                match args.parse() {
                    Ok(page) => Command::Queue(page),
                    Err(_) => return Some(Err(UsageError::InvalidPage(args.to_string()))),
                }
            }
        }
        "shuffle" => Command::Shuffle,
        "loop" => Command::Loop,
        "skip" | ">" => Command::Skip,
        "stop" => Command::Stop,
        "musicstates" => Command::MusicStates,
        _ => return None,
    };

    Some(Ok(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ok(content: &str) -> Command {
        parse(content, "b!").unwrap().unwrap()
    }

    #[test]
    fn ignores_other_messages() {
        assert_eq!(parse("hello there", "b!"), None);
        assert_eq!(parse("!play song", "b!"), None);
        assert_eq!(parse("b!dance", "b!"), None);
    }

    #[test]
    fn play_keeps_the_whole_query() {
        assert_eq!(
            ok("b!play  never gonna give you up "),
            Command::Play("never gonna give you up".to_string())
        );
        assert!(matches!(
            parse("b!play", "b!"),
            Some(Err(UsageError::MissingArgument { .. }))
        ));
    }

    #[test]
    fn playlist_splits_on_pipes() {
        assert_eq!(
            ok("b!playlist one | two ||three"),
            Command::Playlist(vec!["one".into(), "two".into(), "three".into()])
        );
    }

    #[test]
    fn aliases_and_queue_pages() {
        assert_eq!(ok("b!np"), Command::NowPlaying);
        assert_eq!(ok("b!q"), Command::Queue(1));
        assert_eq!(ok("b!queue 3"), Command::Queue(3));
        assert_eq!(ok("b!>"), Command::Skip);
        assert_eq!(ok("b!LOOP"), Command::Loop);
        assert_eq!(
            parse("b!queue last", "b!"),
            Some(Err(UsageError::InvalidPage("last".to_string())))
        );
    }

    #[test]
    fn usage_mentions_the_prefix() {
        let err = parse("b!search", "b!").unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Usage: `b!search <search terms>`");
    }
}
