//! Chat transport
//!
//! Client of the session-based chat service: open a conversation, then
//! exchange one message at a time, receiving the reply incrementally.
//! Two strategies implement the same contract: [`SseChatTransport`] streams
//! over server-sent events; [`PollingChatTransport`] is the bounded-retry
//! fallback for deployments without streaming.

mod polling;
mod sse;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use polling::PollingChatTransport;
pub use sse::SseChatTransport;

use crate::Result;

/// Immutable server-side conversation identifier
///
/// Created by [`ChatTransport::open`]; a reset produces a new value rather
/// than mutating shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw identifier returned by the service
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental event from an in-flight response
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A content chunk arrived; `accumulated` is the full text so far
    Chunk {
        /// Newly received fragment
        delta: String,
        /// Everything received so far, in arrival order
        accumulated: String,
    },

    /// Suggested follow-up questions from the service
    Suggestions(Vec<String>),

    /// Response complete; carries the final full text
    Done(String),

    /// Stream or poll failure mid-conversation
    Error(String),
}

/// Cancelable reference to an in-flight chat response
///
/// At most one handle is live per coordinator; [`Self::close`] is idempotent
/// and safe to call after the response has completed. The underlying task
/// may still deliver a final event after close — consumers drop events for
/// handles they no longer consider current.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Create a handle around a cancellation token
    #[must_use]
    pub const fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Cancel the in-flight response; idempotent
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the handle has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Contract between the coordinator and the chat service
///
/// `stream` delivers zero or more `Chunk` events in emission order, then
/// exactly one of `Done` or `Error`, into the provided channel. Dropping the
/// receiver or closing the returned handle abandons the exchange.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a conversation, returning its immutable identifier
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SessionInit`] if the service call fails or
    /// yields no usable identifier.
    async fn open(&self) -> Result<SessionId>;

    /// Send one user message and stream the reply into `events`
    fn stream(
        &self,
        session: &SessionId,
        message: &str,
        events: mpsc::Sender<StreamEvent>,
    ) -> StreamHandle;
}
