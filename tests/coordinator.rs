//! Session coordinator integration tests
//!
//! Drive the state machine with scripted adapters — no network, no audio
//! hardware. Adapter events are injected tagged with the coordinator's
//! current generation, exactly as the forwarding tasks would deliver them.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use holo_assistant::config::TuningConfig;
use holo_assistant::voice::{PlaybackEvent, RecognitionEvent};
use holo_assistant::{
    CoordinatorEvent, CoordinatorSignal, RegexIntentClassifier, SceneSetting, SessionCoordinator,
    SessionState, StreamEvent,
};

mod common;
use common::{MockSpeech, MockTransport, MockVoice};

fn tuning() -> TuningConfig {
    TuningConfig {
        synthesis_debounce: Duration::from_millis(1),
        ..TuningConfig::default()
    }
}

fn make_coordinator(
    transport: Arc<MockTransport>,
    voice: Arc<MockVoice>,
    speech: Option<Arc<MockSpeech>>,
) -> SessionCoordinator {
    SessionCoordinator::new(
        tuning(),
        transport,
        voice,
        speech.map(|s| s as Arc<dyn holo_assistant::voice::SpeechInput>),
        Arc::new(RegexIntentClassifier::new()),
    )
}

/// Process queued events until the queue stays quiet
async fn drain(coordinator: &mut SessionCoordinator) {
    while let Ok(true) =
        tokio::time::timeout(Duration::from_millis(50), coordinator.process_next()).await
    {}
}

async fn feed_chunk(coordinator: &mut SessionCoordinator, accumulated: &str) {
    let generation = coordinator.stream_generation();
    coordinator
        .handle_event(CoordinatorEvent::Stream {
            generation,
            event: StreamEvent::Chunk {
                delta: String::new(),
                accumulated: accumulated.to_string(),
            },
        })
        .await;
}

async fn feed_done(coordinator: &mut SessionCoordinator, text: &str) {
    let generation = coordinator.stream_generation();
    coordinator
        .handle_event(CoordinatorEvent::Stream {
            generation,
            event: StreamEvent::Done(text.to_string()),
        })
        .await;
}

async fn feed_transport_error(coordinator: &mut SessionCoordinator, message: &str) {
    let generation = coordinator.stream_generation();
    coordinator
        .handle_event(CoordinatorEvent::Stream {
            generation,
            event: StreamEvent::Error(message.to_string()),
        })
        .await;
}

async fn feed_recognition(coordinator: &mut SessionCoordinator, event: RecognitionEvent) {
    let generation = coordinator.listen_generation();
    coordinator
        .handle_event(CoordinatorEvent::Recognition { generation, event })
        .await;
}

fn collect_signals(
    rx: &mut tokio::sync::broadcast::Receiver<CoordinatorSignal>,
) -> Vec<CoordinatorSignal> {
    let mut out = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        out.push(signal);
    }
    out
}

#[tokio::test]
async fn streamed_chunks_apply_in_order_and_done_finalizes() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(Arc::clone(&transport), Arc::clone(&voice), None);

    c.submit_utterance("hello").await.unwrap();
    assert_eq!(c.state(), SessionState::AwaitingResponse);
    // User turn plus assistant placeholder
    assert_eq!(c.history().len(), 2);
    assert!(!c.history().last().unwrap().is_final);

    feed_chunk(&mut c, "Hi").await;
    assert_eq!(c.state(), SessionState::StreamingResponse);
    assert_eq!(c.history().last().unwrap().content, "Hi");

    feed_chunk(&mut c, "Hi there").await;
    assert_eq!(c.history().last().unwrap().content, "Hi there");

    feed_done(&mut c, "Hi there!").await;
    let last = c.history().last().unwrap();
    assert_eq!(last.content, "Hi there!");
    assert!(last.is_final);
    assert_eq!(c.state(), SessionState::Speaking);

    drain(&mut c).await;
    assert_eq!(voice.spoken_texts(), vec!["Hi there!".to_string()]);
}

#[tokio::test]
async fn new_utterance_closes_previous_stream_first() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(Arc::clone(&transport), voice, None);

    c.submit_utterance("first question").await.unwrap();
    c.submit_utterance("second question").await.unwrap();

    assert_eq!(transport.stream_count(), 2);
    assert!(transport.token(0).is_cancelled());
    assert!(!transport.token(1).is_cancelled());
}

#[tokio::test]
async fn late_chunk_from_superseded_stream_is_dropped() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, voice, None);

    c.submit_utterance("first").await.unwrap();
    let stale_generation = c.stream_generation();
    c.submit_utterance("second").await.unwrap();

    c.handle_event(CoordinatorEvent::Stream {
        generation: stale_generation,
        event: StreamEvent::Chunk {
            delta: String::new(),
            accumulated: "stale text from the cancelled stream".to_string(),
        },
    })
    .await;

    // The new turn's placeholder is untouched
    assert_eq!(c.history().last().unwrap().content, "…");
    assert_eq!(c.state(), SessionState::AwaitingResponse);
}

#[tokio::test]
async fn new_playback_supersedes_previous_resource() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, Arc::clone(&voice), None);

    c.submit_utterance("one").await.unwrap();
    feed_done(&mut c, "short answer one").await;
    drain(&mut c).await;
    voice.emit(0, PlaybackEvent::Started).await;
    drain(&mut c).await;
    assert!(c.is_speaking());

    // Second utterance supersedes the active audio before anything else
    c.submit_utterance("two").await.unwrap();
    assert!(!c.is_speaking());
    assert!(voice.handle(0).is_cancelled());

    feed_done(&mut c, "short answer two").await;
    drain(&mut c).await;
    assert_eq!(voice.playback_count(), 2);
    assert!(!voice.handle(1).is_cancelled());
}

#[tokio::test]
async fn transport_error_becomes_spoken_apology_and_settles_idle() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, Arc::clone(&voice), None);
    let apology = tuning().apology_text;

    c.submit_utterance("hello").await.unwrap();
    feed_chunk(&mut c, "par").await;
    feed_transport_error(&mut c, "connection reset").await;

    let last = c.history().last().unwrap();
    assert_eq!(last.content, apology);
    assert!(last.is_final);
    assert_eq!(c.state(), SessionState::Speaking);

    drain(&mut c).await;
    assert_eq!(voice.spoken_texts(), vec![apology]);

    voice.emit(0, PlaybackEvent::Started).await;
    drain(&mut c).await;
    assert!(c.is_speaking());

    voice.emit(0, PlaybackEvent::Ended).await;
    drain(&mut c).await;
    assert!(!c.is_speaking());
    assert_eq!(c.state(), SessionState::Idle);
}

#[tokio::test]
async fn synthesis_failure_never_leaves_the_machine_stuck() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    voice.fail.store(true, Ordering::SeqCst);
    let mut c = make_coordinator(transport, voice, None);

    c.submit_utterance("hello").await.unwrap();
    feed_done(&mut c, "an answer nobody will hear").await;
    assert_eq!(c.state(), SessionState::Speaking);

    drain(&mut c).await;
    assert_eq!(c.state(), SessionState::Idle);
    assert!(!c.is_speaking());
}

#[tokio::test]
async fn night_mode_scenario_fires_scene_change_once() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, Arc::clone(&voice), None);
    let mut signals = c.subscribe();

    let reply = "Sure, I've switched to night mode for you.";

    c.submit_utterance("can you change it to night mode?")
        .await
        .unwrap();
    feed_chunk(&mut c, "Sure, I've switched").await;
    feed_chunk(&mut c, reply).await;
    feed_done(&mut c, reply).await;

    // Final turn content equals the full streamed sentence
    let last = c.history().last().unwrap();
    assert_eq!(last.content, reply);
    assert!(last.is_final);

    // Exactly one night scene-change effect
    let scenes: Vec<SceneSetting> = collect_signals(&mut signals)
        .into_iter()
        .filter_map(|s| match s {
            CoordinatorSignal::SceneChange(scene) => Some(scene),
            _ => None,
        })
        .collect();
    assert_eq!(scenes, vec![SceneSetting::Night]);

    // Under the early-trigger threshold: synthesis runs once, for the
    // final text
    drain(&mut c).await;
    assert_eq!(voice.spoken_texts(), vec![reply.to_string()]);
}

#[tokio::test]
async fn non_matching_exchange_fires_no_scene_change() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, voice, None);
    let mut signals = c.subscribe();

    c.submit_utterance("what's the weather like?").await.unwrap();
    feed_chunk(&mut c, "It's sunny today.").await;
    feed_done(&mut c, "It's sunny today.").await;

    let fired = collect_signals(&mut signals)
        .iter()
        .any(|s| matches!(s, CoordinatorSignal::SceneChange(_)));
    assert!(!fired);
    assert_eq!(c.state(), SessionState::Speaking);
}

#[tokio::test]
async fn long_response_triggers_early_synthesis_then_final_supersedes() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, Arc::clone(&voice), None);

    let prefix = "This is a fairly long answer that keeps going well past fifty characters";
    let full = format!("{prefix} and then finally wraps up.");

    c.submit_utterance("tell me everything").await.unwrap();
    feed_chunk(&mut c, prefix).await;

    // Let the debounce elapse and the prefix synthesis dispatch
    tokio::time::sleep(Duration::from_millis(10)).await;
    drain(&mut c).await;
    assert_eq!(voice.spoken_texts(), vec![prefix.to_string()]);

    // Playback has not started, so the final text supersedes the prefix
    feed_done(&mut c, &full).await;
    drain(&mut c).await;
    assert_eq!(
        voice.spoken_texts(),
        vec![prefix.to_string(), full.clone()]
    );
    assert!(voice.handle(0).is_cancelled());
    assert!(!voice.handle(1).is_cancelled());
    assert_eq!(c.history().last().unwrap().content, full);
}

#[tokio::test]
async fn audible_prefix_is_not_restarted_by_done() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, Arc::clone(&voice), None);

    let prefix = "This is a fairly long answer that keeps going well past fifty characters";
    let full = format!("{prefix} and then finally wraps up.");

    c.submit_utterance("tell me everything").await.unwrap();
    feed_chunk(&mut c, prefix).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    drain(&mut c).await;

    // Prefix audio is audibly playing when the stream completes
    voice.emit(0, PlaybackEvent::Started).await;
    drain(&mut c).await;
    assert!(c.is_speaking());

    feed_done(&mut c, &full).await;
    drain(&mut c).await;

    // No second synthesis; the final text still lands in history
    assert_eq!(voice.spoken_texts(), vec![prefix.to_string()]);
    assert_eq!(c.history().last().unwrap().content, full);
    assert_eq!(c.state(), SessionState::Speaking);
}

#[tokio::test]
async fn stop_mid_listen_clears_transcript_without_submitting() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let speech = MockSpeech::new();
    let mut c = make_coordinator(
        Arc::clone(&transport),
        voice,
        Some(Arc::clone(&speech)),
    );

    c.toggle_listening().unwrap();
    assert_eq!(c.state(), SessionState::Listening);
    assert_eq!(speech.starts.load(Ordering::SeqCst), 1);

    feed_recognition(
        &mut c,
        RecognitionEvent::Result {
            text: "turn the ligh".to_string(),
            is_final: false,
        },
    )
    .await;

    assert_eq!(c.transcript(), "turn the ligh");

    // Cancel semantics: stop discards the partial transcript
    c.toggle_listening().unwrap();
    assert_eq!(c.state(), SessionState::Idle);
    assert_eq!(c.transcript(), "");
    assert_eq!(transport.stream_count(), 0);
}

#[tokio::test]
async fn final_transcript_auto_submits_and_stops_listening() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let speech = MockSpeech::new();
    let mut c = make_coordinator(Arc::clone(&transport), voice, Some(speech));
    let mut signals = c.subscribe();

    c.toggle_listening().unwrap();
    feed_recognition(
        &mut c,
        RecognitionEvent::Result {
            text: "what time is it".to_string(),
            is_final: true,
        },
    )
    .await;

    assert_eq!(transport.stream_count(), 1);
    assert_eq!(
        transport.streamed.lock().unwrap()[0],
        "what time is it"
    );
    assert_eq!(c.state(), SessionState::AwaitingResponse);

    let stopped_listening = collect_signals(&mut signals)
        .iter()
        .any(|s| matches!(s, CoordinatorSignal::ListeningChanged(false)));
    assert!(stopped_listening);
}

#[tokio::test]
async fn recognition_end_without_final_settles_idle() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let speech = MockSpeech::new();
    let mut c = make_coordinator(Arc::clone(&transport), voice, Some(speech));

    c.toggle_listening().unwrap();
    feed_recognition(&mut c, RecognitionEvent::End).await;

    assert_eq!(c.state(), SessionState::Idle);
    assert_eq!(transport.stream_count(), 0);
}

#[tokio::test]
async fn session_open_retries_once_then_succeeds() {
    let transport = MockTransport::new().fail_opens(1);
    let voice = MockVoice::new();
    let mut c = make_coordinator(Arc::clone(&transport), voice, None);

    c.submit_utterance("hello").await.unwrap();
    assert_eq!(transport.open_calls.load(Ordering::SeqCst), 2);
    assert_eq!(c.state(), SessionState::AwaitingResponse);
}

#[tokio::test]
async fn session_open_failure_after_retry_surfaces_to_caller() {
    let transport = MockTransport::new().fail_opens(2);
    let voice = MockVoice::new();
    let mut c = make_coordinator(Arc::clone(&transport), voice, None);
    let mut signals = c.subscribe();

    let result = c.submit_utterance("hello").await;
    assert!(result.is_err());
    // Exactly one retry: two open attempts total
    assert_eq!(transport.open_calls.load(Ordering::SeqCst), 2);
    assert_eq!(c.state(), SessionState::Idle);
    // No turns were appended for the failed submit
    assert!(c.history().is_empty());

    let surfaced = collect_signals(&mut signals)
        .iter()
        .any(|s| matches!(s, CoordinatorSignal::Error(_)));
    assert!(surfaced);
}

#[tokio::test]
async fn microphone_refusal_is_a_signal_not_a_turn() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let speech = MockSpeech::denying();
    let mut c = make_coordinator(transport, voice, Some(speech));
    let mut signals = c.subscribe();

    let result = c.toggle_listening();
    assert!(result.is_err());
    assert_eq!(c.state(), SessionState::Idle);
    assert!(c.history().is_empty());

    let denied = collect_signals(&mut signals)
        .iter()
        .any(|s| matches!(s, CoordinatorSignal::PermissionDenied(_)));
    assert!(denied);
}

#[tokio::test]
async fn greet_appends_and_speaks_the_welcome_turn() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, Arc::clone(&voice), None);
    let welcome = tuning().welcome_text;

    c.greet();
    let last = c.history().last().unwrap();
    assert_eq!(last.content, welcome);
    assert!(last.is_final);
    assert_eq!(c.state(), SessionState::Speaking);

    drain(&mut c).await;
    assert_eq!(voice.spoken_texts(), vec![welcome]);

    voice.emit(0, PlaybackEvent::Started).await;
    voice.emit(0, PlaybackEvent::Ended).await;
    drain(&mut c).await;
    assert_eq!(c.state(), SessionState::Idle);
}

#[tokio::test]
async fn suggestions_are_surfaced_as_a_signal() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, voice, None);
    let mut signals = c.subscribe();

    c.submit_utterance("hello").await.unwrap();
    let generation = c.stream_generation();
    c.handle_event(CoordinatorEvent::Stream {
        generation,
        event: StreamEvent::Suggestions(vec![
            "What else can you do?".to_string(),
            "Change the scene?".to_string(),
        ]),
    })
    .await;

    let suggestions = collect_signals(&mut signals)
        .into_iter()
        .find_map(|s| match s {
            CoordinatorSignal::Suggestions(q) => Some(q),
            _ => None,
        })
        .expect("suggestions signal");
    assert_eq!(suggestions.len(), 2);
}

#[tokio::test]
async fn paused_playback_lowers_the_speaking_signal() {
    let transport = MockTransport::new();
    let voice = MockVoice::new();
    let mut c = make_coordinator(transport, Arc::clone(&voice), None);

    c.submit_utterance("hello").await.unwrap();
    feed_done(&mut c, "short reply").await;
    drain(&mut c).await;

    voice.emit(0, PlaybackEvent::Started).await;
    drain(&mut c).await;
    assert!(c.is_speaking());

    voice.emit(0, PlaybackEvent::Paused).await;
    drain(&mut c).await;
    assert!(!c.is_speaking());
    // The resource is still alive; only the lip-sync signal dropped
    assert_eq!(c.state(), SessionState::Speaking);
}
