//! Signals the coordinator emits for the presentation layer

use crate::history::ConversationTurn;
use crate::intent::SceneSetting;

use super::SessionState;

/// Output signal consumed by the presentation layer
///
/// Signals are broadcast fire-and-forget; a slow subscriber may miss
/// intermediate values but always observes the latest state eventually.
#[derive(Debug, Clone)]
pub enum CoordinatorSignal {
    /// The session state changed
    StateChanged(SessionState),

    /// The avatar-is-speaking signal (drives lip-sync) flipped
    SpeakingChanged(bool),

    /// Speech capture started or stopped
    ListeningChanged(bool),

    /// Interim transcript while listening; cleared text means the
    /// transcript buffer was discarded
    Transcript(String),

    /// A conversation turn was appended or its streaming content grew
    TurnUpdated(ConversationTurn),

    /// Suggested follow-up questions from the chat service
    Suggestions(Vec<String>),

    /// The intent side channel requests a scene change
    SceneChange(SceneSetting),

    /// Microphone access was refused; offer a text-only fallback
    PermissionDenied(String),

    /// A failure surfaced to the caller (session init after retry)
    Error(String),
}
