//! Tone Signal Generator
//!
//! Synthesizes the short audio cues that accompany typing, failures and
//! successes. Waveforms are fixed per cue and rendered to mono f32 samples;
//! the samples are handed to an [`AudioContext`] that the generator opens
//! lazily on first use and keeps until it is dropped.

use anyhow::Result;
use std::f32::consts::TAU;
use tracing::{debug, warn};

/// The three event classes that have an audible cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneKind {
    Type,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oscillator {
    Sine,
    Square,
    Sawtooth,
}

impl Oscillator {
    /// Value of the waveform at `phase`, measured in cycles.
    fn sample(self, phase: f32) -> f32 {
        let frac = phase.fract();
        match self {
            Oscillator::Sine => (TAU * frac).sin(),
            Oscillator::Square => {
                if frac < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Oscillator::Sawtooth => 2.0 * frac - 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ramp {
    Linear { from: f32, to: f32 },
    Exponential { from: f32, to: f32 },
}

impl Ramp {
    /// Value of the ramp at `progress` in `0.0..=1.0`.
    fn at(self, progress: f32) -> f32 {
        let t = progress.clamp(0.0, 1.0);
        match self {
            Ramp::Linear { from, to } => from + (to - from) * t,
            Ramp::Exponential { from, to } => from * (to / from).powf(t),
        }
    }
}

/// Complete description of one cue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneShape {
    pub oscillator: Oscillator,
    pub frequency: Ramp,
    pub gain: Ramp,
    pub duration_secs: f32,
}

impl ToneKind {
    pub fn shape(self) -> ToneShape {
        match self {
            ToneKind::Type => ToneShape {
                oscillator: Oscillator::Square,
                frequency: Ramp::Exponential { from: 800.0, to: 100.0 },
                gain: Ramp::Exponential { from: 0.02, to: 0.001 },
                duration_secs: 0.03,
            },
            ToneKind::Error => ToneShape {
                oscillator: Oscillator::Sawtooth,
                frequency: Ramp::Linear { from: 100.0, to: 50.0 },
                gain: Ramp::Linear { from: 0.1, to: 0.001 },
                duration_secs: 0.4,
            },
            ToneKind::Success => ToneShape {
                oscillator: Oscillator::Sine,
                frequency: Ramp::Exponential { from: 600.0, to: 1200.0 },
                gain: Ramp::Exponential { from: 0.1, to: 0.001 },
                duration_secs: 0.2,
            },
        }
    }
}

impl ToneShape {
    /// Renders the cue into mono samples at `sample_rate`.
    pub fn render(&self, sample_rate: u32) -> Vec<f32> {
        let rate = sample_rate as f32;
        let total = (self.duration_secs * rate).round() as usize;
        let mut phase = 0.0f32;
        let mut samples = Vec::with_capacity(total);
        for n in 0..total {
            let progress = n as f32 / total as f32;
            samples.push(self.oscillator.sample(phase) * self.gain.at(progress));
            phase += self.frequency.at(progress) / rate;
        }
        samples
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// An open handle to an audio output device.
pub trait AudioContext: Send {
    fn state(&self) -> ContextState;
    fn resume(&mut self) -> Result<()>;
    fn sample_rate(&self) -> u32;
    /// Queues samples for playback without waiting for them to be played.
    fn enqueue(&mut self, samples: &[f32]) -> Result<()>;
}

/// Opens audio contexts. Implemented by the hosting platform.
pub trait AudioBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioContext>>;
}

enum ContextSlot {
    Unopened,
    Open(Box<dyn AudioContext>),
    Unavailable,
}

/// Plays cues through one shared audio context.
///
/// Every failure is swallowed: a missing backend, a device that refuses to
/// open or a closed context all turn `play` into a no-op.
pub struct ToneGenerator {
    backend: Option<Box<dyn AudioBackend>>,
    slot: ContextSlot,
}

impl ToneGenerator {
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self {
            backend: Some(backend),
            slot: ContextSlot::Unopened,
        }
    }

    /// A generator for hosts without an audio subsystem.
    pub fn silent() -> Self {
        Self {
            backend: None,
            slot: ContextSlot::Unavailable,
        }
    }

    pub fn play(&mut self, kind: ToneKind) {
        let Some(ctx) = self.context() else {
            return;
        };

        if ctx.state() == ContextState::Suspended {
            if let Err(e) = ctx.resume() {
                warn!(error = %e, "Failed to resume audio context");
                return;
            }
        }
        if ctx.state() == ContextState::Closed {
            return;
        }

        let samples = kind.shape().render(ctx.sample_rate());
        if let Err(e) = ctx.enqueue(&samples) {
            warn!(?kind, error = %e, "Audio context rejected tone");
        }
    }

    fn context(&mut self) -> Option<&mut Box<dyn AudioContext>> {
        if matches!(self.slot, ContextSlot::Unopened) {
            self.slot = match self.backend.as_ref().map(|b| b.open()) {
                Some(Ok(ctx)) => {
                    debug!(sample_rate = ctx.sample_rate(), "Audio context opened");
                    ContextSlot::Open(ctx)
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Audio output unavailable; tones disabled");
                    ContextSlot::Unavailable
                }
                None => ContextSlot::Unavailable,
            };
        }
        match &mut self.slot {
            ContextSlot::Open(ctx) => Some(ctx),
            _ => None,
        }
    }
}
