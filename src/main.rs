use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use holo_assistant::voice::{
    AudioPlayback, MicRecognizer, Microphone, SpeechInput, SpeechSynthesizer, Transcriber,
    VoiceOutput, VoicePipeline,
};
use holo_assistant::{
    ChatTransport, Config, ConversationRole, CoordinatorSignal, PollingChatTransport,
    RegexIntentClassifier, SessionCoordinator, SseChatTransport,
};

/// Holo - voice-driven avatar assistant session core
#[derive(Parser)]
#[command(name = "holo", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice input (text-only mode)
    #[arg(long, env = "HOLO_DISABLE_VOICE")]
    disable_voice: bool,

    /// Use the polling transport instead of SSE streaming
    #[arg(long, env = "HOLO_POLL")]
    poll: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,holo_assistant=info",
        1 => "info,holo_assistant=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestTts { text } => test_tts(&text).await,
        };
    }

    let config = Config::load_with_options(cli.disable_voice)?;

    let transport: Arc<dyn ChatTransport> = if cli.poll {
        Arc::new(PollingChatTransport::new(config.chat.clone()))
    } else {
        Arc::new(SseChatTransport::new(config.chat.clone()))
    };

    let voice = Arc::new(VoicePipeline::new(
        build_synthesizer(&config)?,
        AudioPlayback::new()?,
    ));

    let speech: Option<Arc<dyn SpeechInput>> = if config.voice.enabled {
        let transcriber = Arc::new(build_transcriber(&config)?);
        Some(Arc::new(MicRecognizer::new(transcriber)))
    } else {
        None
    };

    let coordinator = SessionCoordinator::new(
        config.tuning.clone(),
        transport,
        voice,
        speech,
        Arc::new(RegexIntentClassifier::new()),
    );

    let handle = coordinator.handle();
    let signals = coordinator.subscribe();
    tokio::spawn(render_signals(signals));
    let runner = tokio::spawn(coordinator.run());

    handle.greet().await;

    println!("Type a message, /listen to toggle the microphone, /quit to exit.");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/listen" => handle.toggle_listening().await,
                    text => handle.submit(text).await,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    let _ = runner.await;
    Ok(())
}

/// Pick the TTS backend from the configured keys
fn build_synthesizer(config: &Config) -> anyhow::Result<SpeechSynthesizer> {
    if let Some(key) = config.api_keys.elevenlabs.clone() {
        return Ok(SpeechSynthesizer::new_elevenlabs(
            key,
            config.voice.tts_voice.clone(),
            config.voice.tts_model.clone(),
        )?);
    }
    let key = config
        .api_keys
        .openai
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no TTS API key configured (OPENAI_API_KEY)"))?;
    Ok(SpeechSynthesizer::new_openai(
        key,
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
        config.voice.tts_model.clone(),
    )?)
}

/// Pick the STT backend from the configured keys
fn build_transcriber(config: &Config) -> anyhow::Result<Transcriber> {
    if let Some(key) = config.api_keys.deepgram.clone() {
        return Ok(Transcriber::new_deepgram(
            key,
            config.voice.stt_model.clone(),
            config.voice.language.clone(),
        )?);
    }
    let key = config
        .api_keys
        .openai
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no STT API key configured (OPENAI_API_KEY)"))?;
    Ok(Transcriber::new_whisper(
        key,
        config.voice.stt_model.clone(),
        config.voice.language.clone(),
    )?)
}

/// Render coordinator signals to the terminal
async fn render_signals(
    mut signals: tokio::sync::broadcast::Receiver<CoordinatorSignal>,
) {
    loop {
        match signals.recv().await {
            Ok(CoordinatorSignal::TurnUpdated(turn)) if turn.is_final => {
                let who = match turn.role {
                    ConversationRole::User => "you",
                    ConversationRole::Assistant => "holo",
                };
                println!("{who}: {}", turn.content);
            }
            Ok(CoordinatorSignal::Transcript(text)) if !text.is_empty() => {
                println!("(heard) {text}");
            }
            Ok(CoordinatorSignal::ListeningChanged(listening)) => {
                println!("[microphone {}]", if listening { "on" } else { "off" });
            }
            Ok(CoordinatorSignal::SceneChange(scene)) => {
                println!("[scene -> {scene}]");
            }
            Ok(CoordinatorSignal::Suggestions(questions)) => {
                for q in questions {
                    println!("  try: {q}");
                }
            }
            Ok(CoordinatorSignal::PermissionDenied(message)) => {
                println!("[microphone unavailable: {message} - text input still works]");
            }
            Ok(CoordinatorSignal::Error(message)) => {
                println!("[error: {message}]");
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut mic = Microphone::open()?;
    mic.start()?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = mic.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    mic.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test TTS output through the full synthesis + playback path
async fn test_tts(text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    println!("Synthesizing: \"{text}\"");

    let pipeline = VoicePipeline::new(build_synthesizer(&config)?, AudioPlayback::new()?);

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let _handle = pipeline.speak(text, tx).await?;

    while let Some(event) = rx.recv().await {
        use holo_assistant::PlaybackEvent;
        match event {
            PlaybackEvent::Started => println!("Playing..."),
            PlaybackEvent::Ended => {
                println!("Done.");
                break;
            }
            PlaybackEvent::Error(e) => {
                println!("Playback error: {e}");
                break;
            }
            PlaybackEvent::Paused => println!("Paused."),
        }
    }
    Ok(())
}
