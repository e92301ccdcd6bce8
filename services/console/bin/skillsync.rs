//! Main Entrypoint for the SkillSync Console
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Optionally uploading a technical manual to the simulation service.
//! 3. Detecting audio and speech capabilities.
//! 4. Running the session engine and rendering its state until the user quits.

use anyhow::Context;
use clap::Parser;
use skillsync_console::{
    audio::SpeakerBackend,
    config::Config,
    screen::{HELP, Input, Screen, parse_input},
    voice::CommandSynthesizer,
};
use skillsync_core::{
    client::{HttpSimulationClient, SimulationApi},
    engine::{EngineSettings, SessionCommand, SessionEngine, StartEntry},
    models::Language,
    speech::{Capability, SpeechBridge},
    tone::ToneGenerator,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "skillsync", version, about = "Interactive equipment-maintenance simulation")]
struct Args {
    /// Technical manual to ingest before the session starts.
    #[arg(long)]
    document: Option<PathBuf>,
    /// Narrative language, overriding SKILLSYNC_LANGUAGE.
    #[arg(long)]
    language: Option<Language>,
    /// Start with sound effects off.
    #[arg(long)]
    mute: bool,
    /// Fetch the opening narrative from the dedicated start endpoint.
    #[arg(long)]
    start_endpoint: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded");

    // --- 3. Connect to the Simulation Service ---
    let client = HttpSimulationClient::new(config.api_url.as_str(), config.tunnel_token.as_deref())
        .context("Failed to build simulation client")?;
    info!(base_url = %client.base_url(), "Simulation client ready");

    if let Some(document) = &args.document {
        let receipt = client
            .upload_document(document)
            .await
            .with_context(|| format!("Failed to upload {}", document.display()))?;
        match receipt.char_count {
            Some(chars) => println!("[MANUAL INGESTED: {chars} characters]"),
            None => println!("[MANUAL INGESTED: {}]", receipt.status),
        }
    }
    let api: Arc<dyn SimulationApi> = Arc::new(client);

    // --- 4. Detect Capabilities ---
    let tones = ToneGenerator::new(Box::new(SpeakerBackend));
    let speech = SpeechBridge::new(
        Capability::Unavailable,
        CommandSynthesizer::detect(),
        CAPTURE_TIMEOUT,
    );

    let settings = EngineSettings {
        reveal_interval: config.reveal_interval,
        entry: if args.start_endpoint {
            StartEntry::Endpoint
        } else {
            StartEntry::HiddenAction
        },
        narrate: config.narrate,
        language: args.language.unwrap_or(config.language),
        sound_on: config.sound_on && !args.mute,
        ..EngineSettings::default()
    };

    // --- 5. Run the Session ---
    let handle = SessionEngine::new(api.clone(), tones, speech, settings).spawn();
    let mut view = handle.subscribe();
    let (mut screen, mut images) = Screen::new(std::io::stdout(), api, config.image_dir.clone());

    println!("{HELP}\n");
    screen.render(&view.borrow_and_update().clone())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    warn!("Session engine stopped unexpectedly");
                    break;
                }
                let session = view.borrow_and_update().clone();
                screen.render(&session)?;
            }
            Some(notice) = images.recv() => screen.show_image(notice)?,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Command(SessionCommand::Listen)
                        if !handle.current().voice_input_enabled() =>
                    {
                        screen.notice("VOICE INPUT UNAVAILABLE")?;
                    }
                    Input::Command(SessionCommand::Speak)
                        if !handle.current().voice_output_enabled() =>
                    {
                        screen.notice("VOICE OUTPUT UNAVAILABLE")?;
                    }
                    Input::Command(command) => handle.send(command).await?,
                    Input::Help => println!("{HELP}"),
                    Input::Invalid(reason) => screen.notice(&reason)?,
                    Input::Quit => break,
                    Input::Empty => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt. Shutting down...");
                break;
            }
        }
    }

    handle.shutdown().await;
    info!("Session closed.");
    Ok(())
}
