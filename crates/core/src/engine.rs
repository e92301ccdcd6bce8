//! Session Engine
//!
//! The event loop that drives a [`Session`]. It is the only owner of the
//! session state and of every scheduled task that touches it: the in-flight
//! exchange, the reveal timer, speech capture and playback. Callers talk to
//! it through a [`SessionHandle`]: commands go in over a channel and every
//! state change is published on a `watch` channel for the screen to render.

use crate::client::{self, SimulateOutcome, SimulationApi};
use crate::models::Language;
use crate::reveal::{RevealEvent, RevealFeed, RevealScheduler};
use crate::session::{Resolution, Session};
use crate::speech::{CaptureOutcome, SpeechBridge};
use crate::tone::{ToneGenerator, ToneKind};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How the opening narrative is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartEntry {
    /// Send the hidden start action through `/simulate`.
    #[default]
    HiddenAction,
    /// Call the dedicated `/start-simulation` route.
    Endpoint,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub reveal_interval: Duration,
    /// A keystroke tone sounds on every Nth revealed character.
    pub chime_every: usize,
    /// Request the opening narrative as soon as the engine runs.
    pub auto_start: bool,
    pub entry: StartEntry,
    /// Read every new narrative aloud while sound is on.
    pub narrate: bool,
    pub language: Language,
    pub sound_on: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reveal_interval: Duration::from_millis(10),
            chime_every: 4,
            auto_start: true,
            entry: StartEntry::HiddenAction,
            narrate: false,
            language: Language::English,
            sound_on: true,
        }
    }
}

/// Requests a caller can make of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Request the opening narrative. Only the first effective call does
    /// anything.
    Start,
    Submit(String),
    /// Submit whatever is in the input buffer.
    SubmitInput,
    SetInput(String),
    SetLanguage(Language),
    ToggleSound,
    /// Capture one spoken utterance into the input buffer.
    Listen,
    /// Read the current narrative aloud.
    Speak,
    /// Show the rest of the current narrative at once.
    SkipReveal,
}

enum Internal {
    Resolved(SimulateOutcome),
    Captured(CaptureOutcome),
}

pub struct SessionEngine {
    session: Session,
    api: Arc<dyn SimulationApi>,
    tones: ToneGenerator,
    speech: SpeechBridge,
    reveal: RevealScheduler,
    feed: RevealFeed,
    settings: EngineSettings,
    view: watch::Sender<Session>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl SessionEngine {
    pub fn new(
        api: Arc<dyn SimulationApi>,
        tones: ToneGenerator,
        speech: SpeechBridge,
        settings: EngineSettings,
    ) -> Self {
        let session = Session::new(settings.language, settings.sound_on)
            .with_voice(speech.can_capture(), speech.can_speak());
        let (reveal, feed) = RevealScheduler::new(settings.reveal_interval, settings.chime_every);
        let (view, _) = watch::channel(session.clone());
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            session,
            api,
            tones,
            speech,
            reveal,
            feed,
            settings,
            view,
            internal_tx,
            internal_rx,
        }
    }

    /// Runs the engine on its own task.
    pub fn spawn(self) -> SessionHandle {
        let (commands, rx) = mpsc::channel(32);
        let view = self.view.subscribe();
        let task = tokio::spawn(self.run(rx));
        SessionHandle {
            commands,
            view,
            task,
        }
    }

    /// Processes commands until every [`SessionHandle`] sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(language = %self.session.language(), "Session engine running");
        if self.settings.auto_start {
            self.start();
            self.publish();
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                Some(event) = self.feed.recv() => self.handle_reveal(event),
            }
            self.publish();
        }

        self.reveal.cancel();
        self.speech.cancel_playback();
        info!(turns = self.session.history().len(), "Session engine stopped");
    }

    fn publish(&self) {
        self.view.send_if_modified(|current| {
            if *current == self.session {
                false
            } else {
                *current = self.session.clone();
                true
            }
        });
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start => self.start(),
            SessionCommand::Submit(action) => self.submit(&action),
            SessionCommand::SubmitInput => {
                let action = self.session.input_buffer().to_string();
                self.submit(&action);
            }
            SessionCommand::SetInput(text) => self.session.set_input(text),
            SessionCommand::SetLanguage(language) => {
                info!(%language, "Language changed");
                self.session.set_language(language);
            }
            SessionCommand::ToggleSound => {
                let on = self.session.toggle_sound();
                if !on {
                    self.speech.cancel_playback();
                }
                info!(sound_on = on, "Sound toggled");
            }
            SessionCommand::Listen => self.listen(),
            SessionCommand::Speak => self.speak(),
            SessionCommand::SkipReveal => {
                if let Some(job) = self.reveal.active_job() {
                    debug!(job, "Skipping the rest of the reveal");
                }
                self.reveal.cancel();
                self.session.reveal_all();
            }
        }
    }

    fn start(&mut self) {
        let Some(request) = self.session.begin_start() else {
            debug!("Opening narrative already requested");
            return;
        };
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        let entry = self.settings.entry;
        info!(?entry, "Requesting opening narrative");
        tokio::spawn(async move {
            let outcome = match entry {
                StartEntry::HiddenAction => client::simulate(api.as_ref(), &request).await,
                StartEntry::Endpoint => client::start_simulation(api.as_ref()).await,
            };
            let _ = tx.send(Internal::Resolved(outcome));
        });
    }

    fn submit(&mut self, action: &str) {
        let Some(request) = self.session.begin_submit(action) else {
            debug!(
                pending = self.session.is_pending(),
                "Submission rejected"
            );
            return;
        };
        let api = self.api.clone();
        let tx = self.internal_tx.clone();
        info!(action = %request.action, language = %request.language, "Submitting action");
        tokio::spawn(async move {
            let outcome = client::simulate(api.as_ref(), &request).await;
            let _ = tx.send(Internal::Resolved(outcome));
        });
    }

    fn listen(&mut self) {
        if self.session.is_listening() {
            debug!("Already listening");
            return;
        }
        let tx = self.internal_tx.clone();
        let started = self
            .speech
            .begin_capture(self.session.language(), move |outcome| {
                let _ = tx.send(Internal::Captured(outcome));
            });
        match started {
            Ok(()) => {
                self.session.set_listening(true);
                if self.session.is_sound_on() {
                    self.tones.play(ToneKind::Type);
                }
            }
            Err(e) => warn!(error = %e, "Voice input unavailable"),
        }
    }

    fn speak(&mut self) {
        if !self.session.is_sound_on() || self.session.raw_response_text().is_empty() {
            return;
        }
        let text = self.session.raw_response_text().to_string();
        if let Err(e) = self.speech.speak(&text, self.session.language()) {
            debug!(error = %e, "Voice output unavailable");
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Resolved(outcome) => {
                if let Some(resolution) = self.session.resolve(outcome) {
                    self.present(resolution);
                }
            }
            Internal::Captured(outcome) => {
                self.session.set_listening(false);
                match outcome {
                    CaptureOutcome::Captured(text) => self.session.set_input(text),
                    CaptureOutcome::NotCaptured => debug!("Nothing captured"),
                }
            }
        }
    }

    fn present(&mut self, resolution: Resolution) {
        info!(status = %resolution.status, chars = resolution.narrative.chars().count(), "Narrative received");
        if let Some(tone) = resolution.tone {
            self.tones.play(tone);
        }
        let job = self.reveal.start(&resolution.narrative);
        debug!(job, "Reveal scheduled");
        if self.settings.narrate {
            self.speak();
        }
    }

    fn handle_reveal(&mut self, event: RevealEvent) {
        match event {
            RevealEvent::Progress {
                revealed, chime, ..
            } => {
                self.session.reveal_to(revealed);
                if chime && self.session.is_sound_on() {
                    self.tones.play(ToneKind::Type);
                }
            }
            RevealEvent::Finished { job } => {
                self.session.reveal_all();
                debug!(job, "Reveal finished");
            }
        }
    }
}

/// Caller side of a running [`SessionEngine`].
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<Session>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Session engine has stopped"))
    }

    pub async fn start(&self) -> Result<()> {
        self.send(SessionCommand::Start).await
    }

    pub async fn submit(&self, action: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::Submit(action.into())).await
    }

    pub async fn set_language(&self, language: Language) -> Result<()> {
        self.send(SessionCommand::SetLanguage(language)).await
    }

    pub async fn toggle_sound(&self) -> Result<()> {
        self.send(SessionCommand::ToggleSound).await
    }

    /// A receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.view.clone()
    }

    pub fn current(&self) -> Session {
        self.view.borrow().clone()
    }

    /// Closes the command channel and waits for the engine to tear down.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Session engine task failed");
        }
    }
}
