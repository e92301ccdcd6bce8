//! Speech Bridge
//!
//! Best-effort voice input and output. Each direction is an optional
//! capability detected once by the host: speech capture resolves a single
//! utterance, speech playback reads a block of text aloud and is interrupted
//! by any newer playback.

use crate::models::Language;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// Whether the platform offers a given speech capability.
pub enum Capability<T> {
    Available(T),
    Unavailable,
}

impl<T> Capability<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpeechError {
    #[error("Speech capability is not available on this platform")]
    Unavailable,
    #[error("A speech capture is already in progress")]
    Busy,
}

/// Speech-to-text for one utterance.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Returns the best transcript, or `None` when nothing was recognized.
    async fn capture(&self, locale: &str) -> Result<Option<String>>;
}

/// Text-to-speech playback. The returned future completes when playback ends.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str, locale: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(String),
    NotCaptured,
}

pub struct SpeechBridge {
    recognizer: Capability<Arc<dyn SpeechRecognizer>>,
    synthesizer: Capability<Arc<dyn SpeechSynthesizer>>,
    capture_timeout: Duration,
    capture: Option<JoinHandle<()>>,
    playback: Option<JoinHandle<()>>,
}

impl SpeechBridge {
    pub fn new(
        recognizer: Capability<Arc<dyn SpeechRecognizer>>,
        synthesizer: Capability<Arc<dyn SpeechSynthesizer>>,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            capture_timeout,
            capture: None,
            playback: None,
        }
    }

    /// A bridge with neither capability.
    pub fn unavailable() -> Self {
        Self::new(
            Capability::Unavailable,
            Capability::Unavailable,
            Duration::from_secs(10),
        )
    }

    pub fn can_capture(&self) -> bool {
        self.recognizer.is_available()
    }

    pub fn can_speak(&self) -> bool {
        self.synthesizer.is_available()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Starts capturing one utterance; `on_done` receives the outcome.
    ///
    /// Errors, timeouts and empty transcripts all resolve to
    /// [`CaptureOutcome::NotCaptured`].
    pub fn begin_capture<F>(&mut self, language: Language, on_done: F) -> Result<(), SpeechError>
    where
        F: FnOnce(CaptureOutcome) + Send + 'static,
    {
        let Capability::Available(recognizer) = &self.recognizer else {
            return Err(SpeechError::Unavailable);
        };
        if self.is_capturing() {
            return Err(SpeechError::Busy);
        }

        let recognizer = recognizer.clone();
        let timeout = self.capture_timeout;
        let locale = language.locale();
        info!(%locale, "Listening for an utterance");
        self.capture = Some(tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, recognizer.capture(locale)).await {
                Ok(Ok(Some(text))) if !text.trim().is_empty() => {
                    CaptureOutcome::Captured(text.trim().to_string())
                }
                Ok(Ok(_)) => {
                    debug!("No speech recognized");
                    CaptureOutcome::NotCaptured
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Speech capture failed");
                    CaptureOutcome::NotCaptured
                }
                Err(_) => {
                    warn!(?timeout, "Speech capture timed out");
                    CaptureOutcome::NotCaptured
                }
            };
            on_done(outcome);
        }));
        Ok(())
    }

    /// Reads `text` aloud, cancelling any playback still running.
    pub fn speak(&mut self, text: &str, language: Language) -> Result<(), SpeechError> {
        let Capability::Available(synthesizer) = &self.synthesizer else {
            return Err(SpeechError::Unavailable);
        };
        let synthesizer = synthesizer.clone();
        self.cancel_playback();

        let text = text.to_string();
        let locale = language.locale();
        self.playback = Some(tokio::spawn(async move {
            if let Err(e) = synthesizer.speak(&text, locale).await {
                warn!(error = %e, "Speech playback failed");
            }
        }));
        Ok(())
    }

    pub fn cancel_playback(&mut self) {
        if let Some(handle) = self.playback.take() {
            handle.abort();
            debug!("Cancelled speech playback");
        }
    }
}

impl Drop for SpeechBridge {
    fn drop(&mut self) {
        if let Some(handle) = self.capture.take() {
            handle.abort();
        }
        self.cancel_playback();
    }
}
