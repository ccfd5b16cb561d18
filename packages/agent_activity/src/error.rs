use tokio_tungstenite::tungstenite;

/// Errors raised while opening or reading a live feed.
///
/// These never reach snapshot consumers; the connection manager turns them
/// into reconnection attempts and, eventually, `is_connected = false`.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed server is unavailable")]
    Unavailable,

    #[error("invalid feed url template {0:?}: expected a {{session_id}} placeholder")]
    InvalidUrl(String),

    #[error("feed closed by server")]
    Closed,

    #[error(transparent)]
    Transport(#[from] tungstenite::Error),
}

impl FeedError {
    /// Classify a websocket error, folding refused/reset connections into
    /// [`FeedError::Unavailable`].
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            tungstenite::Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                Self::Unavailable
            }
            _ => Self::Transport(err),
        }
    }
}

/// Errors from the content-generation call.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("agent endpoint is unavailable")]
    Unavailable,

    #[error("agent endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SubmitError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }
}
