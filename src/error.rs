//! Typed errors for the music subsystem.
//!
//! Every variant is recoverable at the command boundary: handlers turn them
//! into a user-visible message and the session's driver keeps running.

use thiserror::Error;

/// Failure talking to the external search/content service.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// The HTTP request itself failed (DNS, TLS, timeout, ...).
    #[error("request to {service} failed: {message}")]
    Network {
        service: &'static str,
        message: String,
    },
    /// The service answered, but with an error payload.
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },
    /// The extractor ran but its output could not be used.
    #[error("could not extract media for {reference}: {message}")]
    Extraction { reference: String, message: String },
    /// The blocking worker running the fetch died.
    #[error("fetch worker for {reference} did not complete")]
    WorkerLost { reference: String },
}

#[derive(Debug, Clone, Error)]
pub enum MusicError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("The queue is empty and nothing is being played")]
    QueueEmpty,

    #[error("No music is being played right now")]
    MusicNotPlaying,

    #[error("Please request a page within the range 1-{pages}")]
    PageOutOfRange { pages: usize },

    #[error("voice transport error: {0}")]
    Transport(String),

    /// The session task is gone (registry shut down).
    #[error("the music session has shut down")]
    SessionClosed,
}

pub type MusicResult<T> = Result<T, MusicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_out_of_range_reports_valid_range() {
        let err = MusicError::PageOutOfRange { pages: 2 };
        assert_eq!(err.to_string(), "Please request a page within the range 1-2");
    }

    #[test]
    fn resolution_errors_convert_transparently() {
        let err: MusicError = ResolutionError::Rejected {
            service: "YouTube API v3",
            reason: "quotaExceeded".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "YouTube API v3 rejected the request: quotaExceeded"
        );
    }
}
