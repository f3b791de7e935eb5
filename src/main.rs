use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use huayu_buddy::config::save_config_file;
use huayu_buddy::live::{HttpSignaling, WebRtcPeerFactory};
use huayu_buddy::server::{OPENAI_API_BASE, OpenAiUpstream, Server, ServerState, Upstream};
use huayu_buddy::tutor::{NoticeLevel, TurnOptions};
use huayu_buddy::voice::{
    AmplitudeMeter, AudioOutput, AudioPlayer, Backend, CpalMicrophone, EspeakSynthesizer,
    FallbackPlayer, InputOutcome, LocalSynthesizer, MicrophoneArbiter, NoopObserver, Speaker,
    SpeechInputEngine, SpeechOutputEngine, Utterance, tone, zh_voice_hint,
};
use huayu_buddy::{
    Config, ConversationStore, ConversationTurn, HttpLanguageService, LanguageService,
    LiveSessionManager, TextFileVocabulary, TurnController, TutorEvent,
};

/// Huayu - spoken Mandarin conversation tutor
#[derive(Parser)]
#[command(name = "huayu", version, about)]
struct Cli {
    /// Serving layer base URL
    #[arg(long, env = "HUAYU_API_URL")]
    api_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the serving layer
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Practice conversation: type a reply, or press Enter on an empty line to record
    Chat(ChatArgs),
    /// Open a live voice session; Enter toggles push-to-talk
    Live {
        /// Realtime model
        #[arg(long)]
        model: Option<String>,
        /// Realtime voice
        #[arg(long)]
        voice: Option<String>,
    },
    /// Record two seconds and play them back
    TestMic,
    /// Play a test tone
    TestSpeaker,
    /// Speak a line through the speech output engine
    TestTts {
        /// Text to speak
        #[arg(default_value = "你好！我是你的中文老师。")]
        text: String,
        /// Language tag
        #[arg(long, default_value = "zh-CN")]
        language: String,
        /// Force remote synthesis
        #[arg(long)]
        remote: bool,
    },
}

#[derive(Args)]
struct ChatArgs {
    /// Vocabulary file (`term<TAB>romanization` per line)
    #[arg(long)]
    vocab: PathBuf,
    /// Difficulty 0-100
    #[arg(long)]
    difficulty: Option<u8>,
    /// Topic constraint
    #[arg(long)]
    topic: Option<String>,
    /// Force remote synthesis
    #[arg(long)]
    remote_tts: bool,
    /// Speak the English gloss after the Mandarin line
    #[arg(long)]
    speak_gloss: bool,
    /// Persist these preferences to the config file
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,huayu_buddy=info",
        1 => "info,huayu_buddy=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
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
    let mut config = Config::load();
    if let Some(url) = cli.api_url {
        config.server.api_url = url;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Serve { port } => serve(config, port).await,
        Command::Chat(args) => chat(config, args).await,
        Command::Live { model, voice } => live(config, model, voice).await,
        Command::TestMic => test_mic(&config).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts {
            text,
            language,
            remote,
        } => test_tts(config, &text, &language, remote).await,
    }
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let upstream = match &config.server.openai_api_key {
        Some(key) => {
            Some(Arc::new(OpenAiUpstream::new(key.clone(), OPENAI_API_BASE)?) as Arc<dyn Upstream>)
        }
        None => None,
    };
    let state = ServerState {
        upstream,
        defaults: config.models.clone(),
    };

    Server::new(state, port.unwrap_or(config.server.port)).run().await?;
    Ok(())
}

/// Client for the serving layer, adopting its model defaults (best effort)
async fn connect_service(config: &mut Config) -> anyhow::Result<Arc<dyn LanguageService>> {
    let service: Arc<dyn LanguageService> = Arc::new(HttpLanguageService::new(&config.server.api_url)?);

    match service.config().await {
        Ok(remote) => config.apply_service_defaults(&remote),
        Err(e) => tracing::warn!(error = %e, "could not fetch server config, using defaults"),
    }
    match service.health().await {
        Ok(health) => tracing::info!(
            mode = %health.mode,
            voices = health.tts_voices.len(),
            "server ok"
        ),
        Err(e) => tracing::warn!(error = %e, url = %config.server.api_url, "server unreachable"),
    }
    Ok(service)
}

fn speech_engine(
    service: &Arc<dyn LanguageService>,
    meter: &AmplitudeMeter,
) -> Arc<SpeechOutputEngine> {
    let player: Arc<dyn AudioPlayer> = Arc::new(FallbackPlayer::system(meter.clone()));
    let local = EspeakSynthesizer::detect().map(|s| Arc::new(s) as Arc<dyn LocalSynthesizer>);
    if local.is_none() {
        tracing::info!("espeak-ng not found, remote synthesis only");
    }
    Arc::new(SpeechOutputEngine::new(Arc::clone(service), player, local))
}

fn print_turn(turn: &ConversationTurn) {
    let reply = &turn.parsed_reply;
    println!("\n  {}", reply.primary_text);
    if !reply.romanized_text.is_empty() {
        println!("  {}", reply.romanized_text);
    }
    if let Some(gloss) = &reply.gloss_text {
        println!("  {gloss}");
    }
    if !turn.used_vocab.is_empty() {
        let used: Vec<&str> = turn.used_vocab.iter().map(|v| v.term.as_str()).collect();
        println!("  [vocab: {}]", used.join(", "));
    }
    println!();
}

async fn print_events(mut events: broadcast::Receiver<TutorEvent>) {
    loop {
        match events.recv().await {
            Ok(TutorEvent::Notice { level, message }) => match level {
                NoticeLevel::Error | NoticeLevel::Warn => eprintln!("! {message}"),
                NoticeLevel::Info => eprintln!("* {message}"),
            },
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn chat(mut config: Config, args: ChatArgs) -> anyhow::Result<()> {
    if let Some(difficulty) = args.difficulty {
        config.tutor.difficulty = difficulty.min(100);
    }
    if let Some(topic) = args.topic {
        config.tutor.topic = topic;
    }
    config.voice.remote_tts |= args.remote_tts;
    config.tutor.speak_gloss |= args.speak_gloss;
    if args.save {
        let path = save_config_file(&config.to_file())?;
        println!("Saved preferences to {}", path.display());
    }

    let service = connect_service(&mut config).await?;
    let meter = AmplitudeMeter::new();
    let speaker = speech_engine(&service, &meter);
    let controller = Arc::new(TurnController::new(
        Arc::clone(&service),
        speaker,
        ConversationStore::shared(),
        config.tutor_settings(),
    ));
    let input = SpeechInputEngine::new(
        Arc::clone(&service),
        Arc::new(CpalMicrophone),
        MicrophoneArbiter::new(),
        None,
        config.input_settings(),
    )?;
    let printer = tokio::spawn(print_events(controller.subscribe()));

    println!("Commands: empty line = record, :r = repeat, :clear = clear history, :q = quit");
    let source = TextFileVocabulary::new(args.vocab);
    if let Some(greeting) = controller.load_vocabulary(&source).await? {
        print_turn(&greeting);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let text = match line.trim() {
            ":q" | ":quit" => break,
            ":r" | ":repeat" => {
                if let Err(e) = controller.repeat_last().await {
                    eprintln!("! {e}");
                }
                continue;
            }
            ":clear" => {
                controller.clear_history().await;
                println!("History cleared");
                continue;
            }
            "" => {
                if let Ok(output) = AudioOutput::shared() {
                    let _ = output.beep(&meter).await;
                }
                println!("Recording... press Enter to stop");
                let release = async {
                    let _ = lines.next_line().await;
                };
                match input.listen(release).await {
                    Ok(InputOutcome::Transcript(text)) => {
                        println!("You said: {text}");
                        text
                    }
                    Ok(InputOutcome::NoSpeech) => {
                        println!("No speech detected");
                        continue;
                    }
                    Err(e) => {
                        eprintln!("! {e}");
                        continue;
                    }
                }
            }
            typed => typed.to_string(),
        };

        controller.record_user_response(&text).await;
        match controller.submit_turn(&text, TurnOptions::default()).await {
            Ok(turn) => print_turn(&turn),
            Err(e) => tracing::debug!(error = %e, "turn failed"),
        }
    }

    controller.shutdown();
    printer.abort();
    Ok(())
}

async fn live(mut config: Config, model: Option<String>, voice: Option<String>) -> anyhow::Result<()> {
    let service = connect_service(&mut config).await?;
    let signaling = Arc::new(HttpSignaling::new(service, &config.server.realtime_endpoint)?);
    let factory = Arc::new(WebRtcPeerFactory::new(
        Arc::new(CpalMicrophone),
        config.input.device.clone(),
    ));
    let manager = LiveSessionManager::new(signaling, factory, MicrophoneArbiter::new());

    let model = model.unwrap_or_else(|| config.models.realtime_model.clone());
    let voice = voice.unwrap_or_else(|| config.voice.realtime_voice.clone());
    println!("Connecting to {model} ({voice})...");
    manager.connect(&model, &voice).await?;
    println!("Live. Enter toggles push-to-talk, q then Enter disconnects.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(l) if l.trim() != "q" => match manager.toggle_push_to_talk().await {
                    Ok(true) => println!("Microphone on"),
                    Ok(false) => println!("Microphone muted"),
                    Err(e) => {
                        eprintln!("! {e}");
                        break;
                    }
                },
                _ => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.disconnect().await;
    println!("Disconnected");
    Ok(())
}

/// Diagnostic capture
async fn test_mic(config: &Config) -> anyhow::Result<()> {
    let service: Arc<dyn LanguageService> = Arc::new(HttpLanguageService::new(&config.server.api_url)?);
    let input = SpeechInputEngine::new(
        service,
        Arc::new(CpalMicrophone),
        MicrophoneArbiter::new(),
        None,
        config.input_settings(),
    )?;

    let devices = input.devices();
    if devices.is_empty() {
        println!("No input devices found");
    } else {
        println!("Input devices:");
        for name in &devices {
            println!("  {name}");
        }
    }

    println!("\nRecording 2 seconds... speak now!");
    let player = FallbackPlayer::system(AmplitudeMeter::new());
    let report = input.diagnostic_capture(&player).await?;

    println!("Captured {} bytes ({:.1}s)", report.bytes, report.seconds);
    if report.captured {
        println!("Played back. If you heard yourself, your microphone works!");
    } else {
        println!("No audio captured. Check the input device and its levels.");
    }
    Ok(())
}

/// Play a one-second 880 Hz tone
async fn test_speaker() -> anyhow::Result<()> {
    let output = AudioOutput::shared()?;
    println!("Playing a test tone on {}...", output.device_name());

    let rate = output.sample_rate();
    let samples = tone(880.0, rate as usize, rate, 400, 0.8);

    let meter = AmplitudeMeter::new();
    let mut levels = meter.subscribe();
    let watcher = tokio::spawn(async move {
        let mut peak = 0.0f32;
        while let Ok(event) = levels.recv().await {
            if let huayu_buddy::voice::MeterEvent::Level(level) = event {
                peak = peak.max(level);
            }
        }
        peak
    });

    output.play(samples, rate, &meter).await?;
    drop(meter);
    let peak = watcher.await.unwrap_or_default();

    println!("Peak level {peak:.2}. If you heard the tone, your speakers work!");
    Ok(())
}

async fn test_tts(mut config: Config, text: &str, language: &str, remote: bool) -> anyhow::Result<()> {
    let service = connect_service(&mut config).await?;
    let speaker = speech_engine(&service, &AmplitudeMeter::new());

    let prefix = language.split('-').next().unwrap_or(language).to_lowercase();
    let voices = speaker.local_voices(&prefix).await;
    println!("Local {prefix} voices: {}", voices.len());

    let mut selection = config.tutor_settings().primary_voice;
    if remote {
        selection.backend = Backend::Remote;
    }
    let utterance = Utterance::new(text, language, selection)
        .with_hint(zh_voice_hint())
        .with_fallback(config.voice.allow_fallback);

    println!("Speaking: \"{text}\"");
    let outcome = speaker.speak(&utterance, &NoopObserver).await?;
    match outcome.backend {
        Backend::Remote => {
            if let (Some(voice), Some(model)) = (&outcome.voice, &outcome.model) {
                println!(
                    "Remote synthesis: voice {} (requested {}), model {} (requested {})",
                    voice.value, voice.requested, model.value, model.requested
                );
            }
        }
        Backend::Local => println!(
            "Local synthesis: voice {}",
            outcome.local_voice.as_deref().unwrap_or("default")
        ),
    }
    Ok(())
}
