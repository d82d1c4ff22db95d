//! Scene-change intent detection
//!
//! Best-effort side channel that watches (user text, assistant text) pairs
//! for a background-change request the assistant agreed to. Pattern-table
//! driven and inherently fuzzy; it is a pluggable strategy so a different
//! locale table can be swapped in, or the channel disabled, without touching
//! the coordinator.

use regex::Regex;

/// Scene the presentation layer should switch to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneSetting {
    /// Daytime default scene
    Default,
    /// Night scene
    Night,
    /// Sunset scene
    Sunset,
    /// Dawn scene
    Dawn,
}

impl std::fmt::Display for SceneSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Night => write!(f, "night"),
            Self::Sunset => write!(f, "sunset"),
            Self::Dawn => write!(f, "dawn"),
        }
    }
}

/// Strategy for deriving a scene-change effect from a conversation exchange
///
/// Implementations must be infallible: a classifier that cannot decide
/// returns `None`, never an error.
pub trait IntentClassifier: Send + Sync {
    /// Inspect one user/assistant text pair and return the requested scene,
    /// if the user asked for a change and the assistant agreed
    fn classify(&self, user_text: &str, assistant_text: &str) -> Option<SceneSetting>;
}

/// Classifier that never fires; use to disable the side channel
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledClassifier;

impl IntentClassifier for DisabledClassifier {
    fn classify(&self, _user_text: &str, _assistant_text: &str) -> Option<SceneSetting> {
        None
    }
}

/// Regex-table classifier
///
/// A scene fires only when the user text matches that scene's request
/// pattern AND the assistant text sounds affirmative. Both checks run on
/// lowercased input.
pub struct RegexIntentClassifier {
    requests: Vec<(SceneSetting, Regex)>,
    affirmative: Regex,
}

impl RegexIntentClassifier {
    /// Build the default English pattern table
    #[must_use]
    pub fn new() -> Self {
        let table = [
            (
                SceneSetting::Night,
                r"(night|dark|evening)\s*(mode|scene|background)|turn\s+(off\s+the\s+lights?|the\s+lights?\s+off)|make\s+it\s+(dark|night)|switch.*\bnight\b",
            ),
            (
                SceneSetting::Sunset,
                r"(sunset|dusk|golden\s+hour)\s*(mode|scene|background)?|switch.*\bsunset\b|change.*\bsunset\b",
            ),
            (
                SceneSetting::Dawn,
                r"(dawn|sunrise|morning)\s*(mode|scene|background)|switch.*\b(dawn|morning)\b|change.*\b(dawn|sunrise)\b",
            ),
            (
                SceneSetting::Default,
                r"(default|day|daytime|normal)\s*(mode|scene|background)|turn\s+(on\s+the\s+lights?|the\s+lights?\s+on)|make\s+it\s+(bright|light)|back\s+to\s+(normal|default)",
            ),
        ];

        let requests = table
            .into_iter()
            .map(|(scene, pattern)| (scene, Regex::new(pattern).expect("valid regex")))
            .collect();

        let affirmative = Regex::new(
            r"\b(sure|okay|ok|yes|done|of\s+course|switched|changed|changing|applied|turning|turned|set|here\s+you\s+go|no\s+problem)\b",
        )
        .expect("valid regex");

        Self { requests, affirmative }
    }
}

impl Default for RegexIntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier for RegexIntentClassifier {
    fn classify(&self, user_text: &str, assistant_text: &str) -> Option<SceneSetting> {
        let user = user_text.to_lowercase();
        let assistant = assistant_text.to_lowercase();

        let requested = self
            .requests
            .iter()
            .find(|(_, pattern)| pattern.is_match(&user))
            .map(|(scene, _)| *scene)?;

        if self.affirmative.is_match(&assistant) {
            tracing::debug!(scene = %requested, "scene-change intent detected");
            Some(requested)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn night_request_with_affirmative_reply_fires() {
        let classifier = RegexIntentClassifier::new();
        let scene = classifier.classify(
            "can you change it to night mode?",
            "Sure, I've switched to night mode for you.",
        );
        assert_eq!(scene, Some(SceneSetting::Night));
    }

    #[test]
    fn request_without_affirmative_reply_does_not_fire() {
        let classifier = RegexIntentClassifier::new();
        let scene = classifier.classify(
            "can you change it to night mode?",
            "I'm afraid the lighting is fixed in this demo.",
        );
        assert_eq!(scene, None);
    }

    #[test]
    fn affirmative_reply_without_request_does_not_fire() {
        let classifier = RegexIntentClassifier::new();
        let scene = classifier.classify("what's the weather like?", "Sure, let me check.");
        assert_eq!(scene, None);
    }

    #[test]
    fn lights_off_phrasing_maps_to_night() {
        let classifier = RegexIntentClassifier::new();
        let scene = classifier.classify("please turn off the lights", "Okay, turning them off.");
        assert_eq!(scene, Some(SceneSetting::Night));
    }

    #[test]
    fn sunset_and_dawn_phrasings() {
        let classifier = RegexIntentClassifier::new();
        assert_eq!(
            classifier.classify("switch the background to sunset", "Done!"),
            Some(SceneSetting::Sunset)
        );
        assert_eq!(
            classifier.classify("give me the dawn scene", "Of course, applied."),
            Some(SceneSetting::Dawn)
        );
    }

    #[test]
    fn back_to_default_maps_to_default() {
        let classifier = RegexIntentClassifier::new();
        assert_eq!(
            classifier.classify("set it back to normal please", "Sure thing, changed."),
            Some(SceneSetting::Default)
        );
    }

    #[test]
    fn disabled_classifier_never_fires() {
        let classifier = DisabledClassifier;
        assert_eq!(
            classifier.classify("night mode please", "Sure, switched."),
            None
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        let classifier = RegexIntentClassifier::new();
        assert_eq!(
            classifier.classify("NIGHT MODE, please", "SURE!"),
            Some(SceneSetting::Night)
        );
    }
}
