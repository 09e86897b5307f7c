use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication rejected by server")]
    Unauthorized,

    #[error("credential store: {0}")]
    Credentials(String),

    #[error("no active server configured")]
    NoActiveServer,

    #[error("unknown server {0}")]
    UnknownServer(Uuid),

    #[error("no password stored for server {0}")]
    MissingPassword(Uuid),

    #[error("invalid horizon: {0}")]
    InvalidHorizon(String),

    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("daemon (pid {0}) is running; send it SIGUSR1 to sync")]
    DaemonRunning(u32),

    #[error("scheduler: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Shorten a response body for inclusion in an error message.
pub(crate) fn truncate_body(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let truncated: String = input.chars().take(max_chars).collect();
    format!("{}...", truncated)
}
