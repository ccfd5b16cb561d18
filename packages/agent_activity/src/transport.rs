//! Feed transports.
//!
//! A transport opens the raw message stream for one session identifier. The
//! connection manager owns retries and teardown; a transport only connects
//! once per call and reports how the stream ended.

use std::future::Future;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::FeedError;

/// Placeholder substituted with the percent-encoded session identifier in
/// feed URLs.
pub const SESSION_PLACEHOLDER: &str = "{session_id}";

/// Raw messages of one open feed. The stream ending, or yielding an error,
/// is a transport-level disconnect.
pub type FeedStream = BoxStream<'static, Result<String, FeedError>>;

pub trait FeedTransport: Send + Sync + 'static {
    /// Open the live feed for `session_id`. Resolves once the transport has
    /// acknowledged the connection.
    fn connect(&self, session_id: &str)
    -> impl Future<Output = Result<FeedStream, FeedError>> + Send;
}

/// Live feed over a WebSocket, one socket per session.
#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    url_template: String,
}

impl WebSocketTransport {
    /// `url_template` must contain `{session_id}`, e.g.
    /// `ws://127.0.0.1:8080/events/{session_id}`.
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }

    pub fn feed_url(&self, session_id: &str) -> Result<String, FeedError> {
        if !self.url_template.contains(SESSION_PLACEHOLDER) {
            return Err(FeedError::InvalidUrl(self.url_template.clone()));
        }
        let segment = urlencoding::encode(session_id);
        Ok(self.url_template.replace(SESSION_PLACEHOLDER, &segment))
    }
}

impl FeedTransport for WebSocketTransport {
    async fn connect(&self, session_id: &str) -> Result<FeedStream, FeedError> {
        let url = self.feed_url(session_id)?;
        debug!(url = %url, "opening websocket feed");

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(FeedError::from_tungstenite)?;

        // Control frames are handled by tungstenite; only payloads and the
        // close handshake matter here.
        let feed = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(Message::Close(_)) => Some(Err(FeedError::Closed)),
                Ok(_) => None,
                Err(e) => Some(Err(FeedError::from_tungstenite(e))),
            }
        });

        Ok(feed.boxed())
    }
}
