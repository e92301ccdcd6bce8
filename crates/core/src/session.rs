//! Session State Machine
//!
//! The pure state of one simulation session and the rules that move it:
//! which actions may be dispatched, what a resolved exchange does to history
//! and status, and how the reveal cursor advances. It performs no I/O; the
//! [`crate::engine`] loop executes the requests it emits and feeds back the
//! results.

use crate::client::SimulateOutcome;
use crate::content::{classify, strip_role_prefixes};
use crate::models::{Language, SimulateRequest, Status, Turn};
use crate::tone::ToneKind;
use serde::Serialize;

/// The hidden action that asks the service for the opening narrative.
pub const START_ACTION: &str = "START SIMULATION";

/// Effects the caller must carry out after an exchange resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub status: Status,
    /// Cleaned narrative; the reveal restarts with it.
    pub narrative: String,
    /// Tone to play, already filtered by the sound switch.
    pub tone: Option<ToneKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    history: Vec<Turn>,
    status: Status,
    language: Language,
    raw_response_text: String,
    revealed_text: String,
    input_buffer: String,
    pending: bool,
    started: bool,
    sound_on: bool,
    listening: bool,
    voice_input: bool,
    voice_output: bool,
}

impl Session {
    pub fn new(language: Language, sound_on: bool) -> Self {
        Self {
            history: vec![],
            status: Status::Idle,
            language,
            raw_response_text: String::new(),
            revealed_text: String::new(),
            input_buffer: String::new(),
            pending: false,
            started: false,
            sound_on,
            listening: false,
            voice_input: false,
            voice_output: false,
        }
    }

    /// Records which voice controls the platform supports.
    pub fn with_voice(mut self, input: bool, output: bool) -> Self {
        self.voice_input = input;
        self.voice_output = output;
        self
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn raw_response_text(&self) -> &str {
        &self.raw_response_text
    }

    pub fn revealed_text(&self) -> &str {
        &self.revealed_text
    }

    pub fn input_buffer(&self) -> &str {
        &self.input_buffer
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_sound_on(&self) -> bool {
        self.sound_on
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn voice_input_enabled(&self) -> bool {
        self.voice_input
    }

    pub fn voice_output_enabled(&self) -> bool {
        self.voice_output
    }

    pub fn is_fully_revealed(&self) -> bool {
        self.revealed_text.len() == self.raw_response_text.len()
    }

    /// Whether the opening exchange still has to be requested.
    pub fn needs_start(&self) -> bool {
        !self.started && self.history.is_empty() && !self.pending
    }

    /// Claims the one opening exchange of the session.
    ///
    /// Returns the hidden start request the first time it is called on an
    /// empty, idle session and `None` ever after.
    pub fn begin_start(&mut self) -> Option<SimulateRequest> {
        if !self.needs_start() {
            return None;
        }
        self.started = true;
        Some(self.dispatch(START_ACTION.to_string()))
    }

    /// Accepts a user action.
    ///
    /// Blank actions and actions arriving while an exchange is in flight are
    /// rejected without touching any state.
    pub fn begin_submit(&mut self, action: &str) -> Option<SimulateRequest> {
        if action.trim().is_empty() || self.pending {
            return None;
        }
        let request = self.dispatch(action.to_string());
        self.started = true;
        self.history.push(Turn::user(action));
        Some(request)
    }

    fn dispatch(&mut self, action: String) -> SimulateRequest {
        self.pending = true;
        SimulateRequest {
            action,
            history: self.history.clone(),
            language: self.language,
        }
    }

    /// Applies the result of the in-flight exchange.
    ///
    /// Returns `None` when nothing was pending.
    pub fn resolve(&mut self, outcome: SimulateOutcome) -> Option<Resolution> {
        if !self.pending {
            return None;
        }

        let (status, narrative, tone) = match outcome {
            SimulateOutcome::Delivered(raw) => {
                let narrative = strip_role_prefixes(&raw);
                let (status, tone) = classify(&narrative);
                self.history.push(Turn::system(narrative.clone()));
                (status, narrative, tone)
            }
            SimulateOutcome::Severed => (
                Status::Critical,
                SimulateOutcome::Severed.text().to_string(),
                Some(ToneKind::Error),
            ),
        };

        self.status = status;
        self.raw_response_text = narrative.clone();
        self.revealed_text.clear();
        self.input_buffer.clear();
        self.pending = false;

        Some(Resolution {
            status,
            narrative,
            tone: tone.filter(|_| self.sound_on),
        })
    }

    /// Shows the first `chars` characters of the current narrative.
    ///
    /// The revealed text only ever grows and never exceeds the narrative.
    pub fn reveal_to(&mut self, chars: usize) {
        let end = self
            .raw_response_text
            .char_indices()
            .nth(chars)
            .map_or(self.raw_response_text.len(), |(idx, _)| idx);
        if end > self.revealed_text.len() {
            self.revealed_text = self.raw_response_text[..end].to_string();
        }
    }

    /// Skips the reveal to the full narrative.
    pub fn reveal_all(&mut self) {
        self.revealed_text = self.raw_response_text.clone();
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    /// Flips the sound switch and returns the new value.
    pub fn toggle_sound(&mut self) -> bool {
        self.sound_on = !self.sound_on;
        self.sound_on
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input_buffer = text.into();
    }

    pub fn set_listening(&mut self, listening: bool) {
        self.listening = listening;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SEVERED_NARRATIVE;
    use crate::models::Role;

    fn session() -> Session {
        Session::new(Language::English, true)
    }

    #[test]
    fn test_submit_builds_request_from_prior_history() {
        let mut s = session();
        let request = s.begin_submit("open valve").unwrap();
        assert_eq!(
            request,
            SimulateRequest {
                action: "open valve".to_string(),
                history: vec![],
                language: Language::English,
            }
        );
        assert!(s.is_pending());
        assert_eq!(s.history(), &[Turn::user("open valve")]);
    }

    #[test]
    fn test_blank_or_pending_submissions_change_nothing() {
        let mut s = session();
        s.set_input("   ");
        let before = s.clone();
        assert_eq!(s.begin_submit("   \t\n"), None);
        assert_eq!(s, before);

        s.begin_submit("open valve").unwrap();
        let before = s.clone();
        assert_eq!(s.begin_submit("close valve"), None);
        assert_eq!(s, before);
    }

    #[test]
    fn test_start_is_hidden_and_claimed_once() {
        let mut s = session();
        assert!(s.needs_start());
        let request = s.begin_start().unwrap();
        assert_eq!(request.action, START_ACTION);
        assert!(s.history().is_empty());
        assert_eq!(s.begin_start(), None);

        s.resolve(SimulateOutcome::Delivered("Welcome, operator.".into()))
            .unwrap();
        assert!(!s.needs_start());
        assert_eq!(s.begin_start(), None);
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].role, Role::System);
    }

    #[test]
    fn test_start_not_needed_after_user_action() {
        let mut s = session();
        s.begin_submit("look around").unwrap();
        s.resolve(SimulateOutcome::Severed).unwrap();
        assert_eq!(s.begin_start(), None);
    }

    #[test]
    fn test_resolve_cleans_and_classifies() {
        let mut s = session();
        s.set_input("check seal");
        s.begin_submit("check seal").unwrap();
        let resolution = s
            .resolve(SimulateOutcome::Delivered("Trainer: You failed the check ❌".into()))
            .unwrap();

        assert_eq!(
            resolution,
            Resolution {
                status: Status::Critical,
                narrative: "You failed the check ❌".to_string(),
                tone: Some(ToneKind::Error),
            }
        );
        assert_eq!(s.status(), Status::Critical);
        assert_eq!(s.raw_response_text(), "You failed the check ❌");
        assert_eq!(s.revealed_text(), "");
        assert_eq!(s.input_buffer(), "");
        assert!(!s.is_pending());
    }

    #[test]
    fn test_severed_exchange_keeps_user_turn() {
        let mut s = session();
        s.begin_submit("open valve").unwrap();
        let resolution = s.resolve(SimulateOutcome::Severed).unwrap();

        assert_eq!(resolution.status, Status::Critical);
        assert_eq!(resolution.narrative, SEVERED_NARRATIVE);
        assert_eq!(s.history(), &[Turn::user("open valve")]);
        assert!(!s.is_pending());
    }

    #[test]
    fn test_muted_session_emits_no_tone() {
        let mut s = session();
        assert!(!s.toggle_sound());
        s.begin_submit("open valve").unwrap();
        let resolution = s
            .resolve(SimulateOutcome::Delivered("Correct ✅".into()))
            .unwrap();
        assert_eq!(resolution.status, Status::Safe);
        assert_eq!(resolution.tone, None);
    }

    #[test]
    fn test_resolve_without_pending_is_ignored() {
        let mut s = session();
        assert_eq!(s.resolve(SimulateOutcome::Severed), None);
        assert_eq!(s.status(), Status::Idle);
    }

    #[test]
    fn test_reveal_is_monotonic_prefix() {
        let mut s = session();
        s.begin_submit("go").unwrap();
        s.resolve(SimulateOutcome::Delivered("ok ✅ done".into()))
            .unwrap();

        s.reveal_to(4);
        assert_eq!(s.revealed_text(), "ok ✅");
        s.reveal_to(2);
        assert_eq!(s.revealed_text(), "ok ✅");
        s.reveal_to(100);
        assert_eq!(s.revealed_text(), "ok ✅ done");
        assert!(s.is_fully_revealed());
    }

    #[test]
    fn test_language_change_keeps_history() {
        let mut s = session();
        s.begin_submit("open valve").unwrap();
        s.resolve(SimulateOutcome::Delivered("The valve creaks.".into()))
            .unwrap();
        s.set_language(Language::French);

        let request = s.begin_submit("fermer").unwrap();
        assert_eq!(request.language, Language::French);
        assert_eq!(request.history.len(), 2);
    }
}
