//! # Agent Activity
//!
//! Follow what a remote agent is doing while a request is in flight.
//!
//! A live feed carries heterogeneous status messages for one session. This
//! crate decodes them into typed [`ActivityEvent`]s, keeps the feed alive
//! across transport drops, and folds the events into an [`ActivitySnapshot`]:
//! connection status, the active agent, whether it is processing, and a
//! de-duplicated transcript of its thinking output.
//!
//! ## Pipeline
//!
//! ```text
//! session id ─► ConnectionManager ─► raw messages ─► decode ─► ActivityEvent
//!                                                                   │
//!               consumer ◄── watch::Receiver ◄── ActivitySnapshot ◄─┘ (reducer)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_activity::{ActivityConfig, WebSocketTransport, subscribe};
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = WebSocketTransport::new("ws://127.0.0.1:8080/events/{session_id}");
//!     let sub = subscribe(transport, Some("session-1".to_string()), ActivityConfig::default());
//!
//!     // Cover the gap before the first agent event arrives
//!     sub.set_processing(true);
//!
//!     let mut rx = sub.watch();
//!     while rx.changed().await.is_ok() {
//!         let snapshot = rx.borrow_and_update().clone();
//!         if let Some(thought) = snapshot.last_thinking_message() {
//!             println!("thinking: {thought}");
//!         }
//!     }
//! }
//! ```
//!
//! Delivery is best-effort: events missed while reconnecting are simply
//! absent, and nothing here is ever fatal to the host process.

pub mod client;
pub mod config;
pub mod connection;
mod error;
pub mod event;
pub mod reducer;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use client::{AgentClient, SubmitResponse};
pub use config::{ActivityConfig, FileConfig, load_config};
pub use connection::{ConnectionManager, ConnectionState, FeedEvent, ReconnectPolicy};
pub use error::{FeedError, SubmitError};
pub use event::{ActivityEvent, ThinkingFragment, decode};
pub use reducer::{ActivitySnapshot, LogLimits, reduce};
pub use subscription::{ActivitySubscription, subscribe};
pub use transport::{FeedStream, FeedTransport, WebSocketTransport};
