//! Streaming chat transport over server-sent events

use eventsource_stream::Eventsource;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChatTransport, SessionId, StreamEvent, StreamHandle};
use crate::config::ChatConfig;
use crate::{Error, Result};

/// Response from the session init endpoint
#[derive(serde::Deserialize)]
struct InitResponse {
    session_id: Option<String>,
}

/// One event payload on the SSE stream
///
/// The service multiplexes event kinds through a `type` discriminator on the
/// data payload rather than the SSE event name.
#[derive(serde::Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    suggested_questions: Option<Vec<String>>,
    #[serde(default)]
    error: Option<String>,
}

/// Chat transport that streams replies over SSE
pub struct SseChatTransport {
    client: reqwest::Client,
    config: ChatConfig,
}

impl SseChatTransport {
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

    fn stream_url(&self, session: &SessionId, message: &str) -> String {
        format!(
            "{}/api/chat/sessions/{}/stream/?message={}",
            self.config.base_url,
            session,
            urlencoding::encode(message)
        )
    }
}

#[async_trait::async_trait]
impl ChatTransport for SseChatTransport {
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
            return Err(Error::SessionInit(format!(
                "init failed {status}: {body}"
            )));
        }

        let init: InitResponse = response
            .json()
            .await
            .map_err(|e| Error::SessionInit(e.to_string()))?;

        let raw = init
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::SessionInit("no session id in init response".to_string()))?;

        tracing::info!(session = %raw, "chat session opened");
        Ok(SessionId::new(raw))
    }

    fn stream(
        &self,
        session: &SessionId,
        message: &str,
        events: mpsc::Sender<StreamEvent>,
    ) -> StreamHandle {
        let url = self.stream_url(session, message);
        let auth = self.auth_header();
        let client = self.client.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = task_cancel.cancelled() => {
                    tracing::debug!("stream cancelled before completion");
                }
                () = run_stream(client, url, auth, events) => {}
            }
        });

        StreamHandle::new(cancel)
    }
}

/// Drive one SSE exchange to its terminal event
///
/// Sends exactly one of `Done`/`Error` unless the receiver goes away first.
async fn run_stream(
    client: reqwest::Client,
    url: String,
    auth: String,
    events: mpsc::Sender<StreamEvent>,
) {
    let response = match client.get(&url).header("Authorization", auth).send().await {
        Ok(r) => r,
        Err(e) => {
            let _ = events.send(StreamEvent::Error(e.to_string())).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let _ = events
            .send(StreamEvent::Error(format!("stream failed {status}: {body}")))
            .await;
        return;
    }

    let mut accumulated = String::new();
    let mut source = response.bytes_stream().eventsource();

    while let Some(event) = source.next().await {
        let event = match event {
            Ok(e) => e,
            Err(e) => {
                let _ = events.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
        };

        match parse_wire_event(&event.data, &mut accumulated) {
            Parsed::Chunk(delta) => {
                let chunk = StreamEvent::Chunk {
                    delta,
                    accumulated: accumulated.clone(),
                };
                if events.send(chunk).await.is_err() {
                    return;
                }
            }
            Parsed::Suggestions(questions) => {
                if events.send(StreamEvent::Suggestions(questions)).await.is_err() {
                    return;
                }
            }
            Parsed::Done => {
                let _ = events.send(StreamEvent::Done(accumulated)).await;
                return;
            }
            Parsed::Error(message) => {
                let _ = events.send(StreamEvent::Error(message)).await;
                return;
            }
            Parsed::Ignored => {}
        }
    }

    // Connection closed without a done event
    let _ = events
        .send(StreamEvent::Error("stream ended unexpectedly".to_string()))
        .await;
}

/// Decoded wire event, with content already folded into the accumulator
enum Parsed {
    Chunk(String),
    Suggestions(Vec<String>),
    Done,
    Error(String),
    Ignored,
}

fn parse_wire_event(data: &str, accumulated: &mut String) -> Parsed {
    let Ok(wire) = serde_json::from_str::<WireEvent>(data) else {
        tracing::warn!(data, "unparseable stream event");
        return Parsed::Ignored;
    };

    match wire.kind.as_str() {
        "content" => {
            let delta = wire.content.unwrap_or_default();
            accumulated.push_str(&delta);
            Parsed::Chunk(delta)
        }
        "suggested_questions" => Parsed::Suggestions(wire.suggested_questions.unwrap_or_default()),
        "done" => Parsed::Done,
        "error" => Parsed::Error(
            wire.error
                .unwrap_or_else(|| "response generation failed".to_string()),
        ),
        "message_id" => {
            tracing::debug!(message_id = ?wire.message_id, "message accepted");
            Parsed::Ignored
        }
        other => {
            tracing::debug!(kind = other, "unknown stream event type");
            Parsed::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_events_accumulate_in_order() {
        let mut acc = String::new();

        let Parsed::Chunk(delta) =
            parse_wire_event(r#"{"type":"content","content":"Hello"}"#, &mut acc)
        else {
            panic!("expected chunk");
        };
        assert_eq!(delta, "Hello");
        assert_eq!(acc, "Hello");

        let Parsed::Chunk(delta) =
            parse_wire_event(r#"{"type":"content","content":", world"}"#, &mut acc)
        else {
            panic!("expected chunk");
        };
        assert_eq!(delta, ", world");
        assert_eq!(acc, "Hello, world");
    }

    #[test]
    fn done_and_error_are_terminal_kinds() {
        let mut acc = String::new();
        assert!(matches!(
            parse_wire_event(r#"{"type":"done"}"#, &mut acc),
            Parsed::Done
        ));
        assert!(matches!(
            parse_wire_event(r#"{"type":"error","error":"boom"}"#, &mut acc),
            Parsed::Error(msg) if msg == "boom"
        ));
    }

    #[test]
    fn suggestions_pass_through() {
        let mut acc = String::new();
        let parsed = parse_wire_event(
            r#"{"type":"suggested_questions","suggested_questions":["a?","b?"]}"#,
            &mut acc,
        );
        assert!(matches!(parsed, Parsed::Suggestions(q) if q == vec!["a?", "b?"]));
    }

    #[test]
    fn message_id_and_unknown_kinds_are_ignored() {
        let mut acc = String::new();
        assert!(matches!(
            parse_wire_event(r#"{"type":"message_id","message_id":"m1"}"#, &mut acc),
            Parsed::Ignored
        ));
        assert!(matches!(
            parse_wire_event(r#"{"type":"typing"}"#, &mut acc),
            Parsed::Ignored
        ));
        assert!(matches!(parse_wire_event("not json", &mut acc), Parsed::Ignored));
        assert!(acc.is_empty());
    }

    #[test]
    fn stream_url_encodes_the_message() {
        let transport = SseChatTransport::new(ChatConfig {
            base_url: "http://chat.example".to_string(),
            api_token: "tok".to_string(),
            poll_attempts: 3,
            poll_delay: std::time::Duration::from_millis(10),
        });
        let url = transport.stream_url(&SessionId::new("s1"), "change it to night mode?");
        assert_eq!(
            url,
            "http://chat.example/api/chat/sessions/s1/stream/?message=change%20it%20to%20night%20mode%3F"
        );
    }
}
