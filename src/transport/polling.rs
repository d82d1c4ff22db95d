//! Polling chat transport
//!
//! Fallback strategy for deployments where the streaming endpoint is
//! unavailable: submit the message, then poll the reply resource on a fixed
//! delay until it is marked complete. Gives up with a timeout error once the
//! configured attempt bound is exhausted.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChatTransport, SessionId, StreamEvent, StreamHandle};
use crate::config::ChatConfig;
use crate::{Error, Result};

#[derive(serde::Deserialize)]
struct InitResponse {
    session_id: Option<String>,
}

#[derive(serde::Deserialize)]
struct SendResponse {
    message_id: String,
}

/// Current state of a polled reply
#[derive(serde::Deserialize)]
struct ReplyResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    suggested_questions: Option<Vec<String>>,
    #[serde(default)]
    error: Option<String>,
}

/// Chat transport that polls for replies on a fixed interval
pub struct PollingChatTransport {
    client: reqwest::Client,
    config: ChatConfig,
}

impl PollingChatTransport {
    /// Create a transport for the configured chat service
    #[must_use]
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.api_token)
    }
}

#[async_trait::async_trait]
impl ChatTransport for PollingChatTransport {
    async fn open(&self) -> Result<SessionId> {
        let response = self
            .client
            .post(format!("{}/api/token-chat/init/", self.config.base_url))
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| Error::SessionInit(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SessionInit(format!("init failed {status}: {body}")));
        }

        let init: InitResponse = response
            .json()
            .await
            .map_err(|e| Error::SessionInit(e.to_string()))?;

        init.session_id
            .filter(|id| !id.is_empty())
            .map(SessionId::new)
            .ok_or_else(|| Error::SessionInit("no session id in init response".to_string()))
    }

    fn stream(
        &self,
        session: &SessionId,
        message: &str,
        events: mpsc::Sender<StreamEvent>,
    ) -> StreamHandle {
        let poller = Poller {
            client: self.client.clone(),
            base_url: self.config.base_url.clone(),
            auth: self.auth_header(),
            session: session.clone(),
            message: message.to_string(),
            attempts: self.config.poll_attempts,
            delay: self.config.poll_delay,
        };

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = task_cancel.cancelled() => {
                    tracing::debug!("poll loop cancelled");
                }
                () = poller.run(events) => {}
            }
        });

        StreamHandle::new(cancel)
    }
}

/// One message exchange driven by polling
struct Poller {
    client: reqwest::Client,
    base_url: String,
    auth: String,
    session: SessionId,
    message: String,
    attempts: u32,
    delay: std::time::Duration,
}

impl Poller {
    async fn run(&self, events: mpsc::Sender<StreamEvent>) {
        let message_id = match self.submit().await {
            Ok(id) => id,
            Err(e) => {
                let _ = events.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
        };

        let mut accumulated = String::new();

        for _ in 0..self.attempts {
            tokio::time::sleep(self.delay).await;

            let reply = match self.fetch_reply(&message_id).await {
                Ok(r) => r,
                Err(e) => {
                    let _ = events.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
            };

            if let Some(message) = reply.error {
                let _ = events.send(StreamEvent::Error(message)).await;
                return;
            }

            // Content only ever grows; forward the new suffix as a chunk
            if reply.content.len() > accumulated.len() {
                let delta = reply.content[accumulated.len()..].to_string();
                accumulated = reply.content;
                let chunk = StreamEvent::Chunk {
                    delta,
                    accumulated: accumulated.clone(),
                };
                if events.send(chunk).await.is_err() {
                    return;
                }
            }

            if let Some(questions) = reply.suggested_questions
                && events.send(StreamEvent::Suggestions(questions)).await.is_err()
            {
                return;
            }

            if reply.done {
                let _ = events.send(StreamEvent::Done(accumulated)).await;
                return;
            }
        }

        let _ = events
            .send(StreamEvent::Error(format!(
                "reply not complete after {} polls",
                self.attempts
            )))
            .await;
    }

    async fn submit(&self) -> Result<String> {
        let response = self
            .client
            .post(format!(
                "{}/api/chat/sessions/{}/messages/",
                self.base_url, self.session
            ))
            .header("Authorization", &self.auth)
            .json(&serde_json::json!({ "message": self.message }))
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("send failed {status}: {body}")));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(sent.message_id)
    }

    async fn fetch_reply(&self, message_id: &str) -> Result<ReplyResponse> {
        let response = self
            .client
            .get(format!(
                "{}/api/chat/sessions/{}/messages/{message_id}/",
                self.base_url, self.session
            ))
            .header("Authorization", &self.auth)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("poll failed {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
