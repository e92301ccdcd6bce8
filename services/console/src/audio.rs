//! Speaker output for the tone generator.
//!
//! A cpal `Stream` is not `Send`, so it lives on a dedicated thread that
//! takes play/pause commands over a channel. Samples reach the device
//! callback through a lock-free ring buffer.

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use skillsync_core::tone::{AudioBackend, AudioContext, ContextState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One second of headroom at common device rates.
const QUEUE_CAPACITY: usize = 48_000;

enum Control {
    Play,
    Pause,
}

/// Opens the default output device of the default host.
pub struct SpeakerBackend;

impl AudioBackend for SpeakerBackend {
    fn open(&self) -> Result<Box<dyn AudioContext>> {
        let (producer, consumer) = HeapRb::<f32>::new(QUEUE_CAPACITY).split();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (control_tx, control_rx) = mpsc::channel::<Control>();
        let alive = Arc::new(AtomicBool::new(true));
        let thread_alive = alive.clone();

        std::thread::Builder::new()
            .name("skillsync-audio".to_string())
            .spawn(move || {
                let (stream, sample_rate) = match build_stream(consumer) {
                    Ok(built) => built,
                    Err(e) => {
                        thread_alive.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));

                while let Ok(control) = control_rx.recv() {
                    let result = match control {
                        Control::Play => stream.play().map_err(|e| e.to_string()),
                        Control::Pause => stream.pause().map_err(|e| e.to_string()),
                    };
                    if let Err(e) = result {
                        error!(error = %e, "Audio stream control failed");
                        break;
                    }
                }
                thread_alive.store(false, Ordering::SeqCst);
                debug!("Audio thread exiting");
            })
            .context("Failed to spawn audio thread")?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| anyhow!("Audio thread exited before reporting"))??;
        info!(sample_rate, "Audio output opened");

        Ok(Box::new(SpeakerContext {
            producer,
            control: control_tx,
            alive,
            state: ContextState::Suspended,
            sample_rate,
        }))
    }
}

fn build_stream(mut consumer: HeapCons<f32>) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    let supported = device
        .default_output_config()
        .context("Failed to get output config")?;
    if supported.sample_format() != SampleFormat::F32 {
        bail!(
            "Unsupported output sample format {:?}",
            supported.sample_format()
        );
    }

    let config: StreamConfig = supported.into();
    let channels = config.channels as usize;
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill_frames(&mut consumer, data, channels);
            },
            |e| warn!(error = %e, "Output stream error"),
            None,
        )
        .context("Failed to build output stream")?;
    // Streams may start on creation; hold it until the first tone.
    if let Err(e) = stream.pause() {
        warn!(error = %e, "Failed to pause new output stream");
    }

    Ok((stream, config.sample_rate.0))
}

/// Copies queued mono samples into every channel of the device buffer,
/// padding with silence once the queue runs dry.
fn fill_frames(queue: &mut impl Consumer<Item = f32>, data: &mut [f32], channels: usize) {
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = queue.try_pop().unwrap_or(0.0);
        frame.fill(sample);
    }
}

struct SpeakerContext {
    producer: HeapProd<f32>,
    control: mpsc::Sender<Control>,
    alive: Arc<AtomicBool>,
    state: ContextState,
    sample_rate: u32,
}

impl SpeakerContext {
    fn send(&mut self, control: Control) -> Result<()> {
        if self.control.send(control).is_err() {
            self.state = ContextState::Closed;
            bail!("Audio thread is gone");
        }
        Ok(())
    }
}

impl AudioContext for SpeakerContext {
    fn state(&self) -> ContextState {
        if self.alive.load(Ordering::SeqCst) {
            self.state
        } else {
            ContextState::Closed
        }
    }

    fn resume(&mut self) -> Result<()> {
        self.send(Control::Play)?;
        self.state = ContextState::Running;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn enqueue(&mut self, samples: &[f32]) -> Result<()> {
        let pushed = self.producer.push_slice(samples);
        if pushed < samples.len() {
            debug!(dropped = samples.len() - pushed, "Audio queue full");
        }
        Ok(())
    }
}

impl Drop for SpeakerContext {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Pause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_frames_duplicates_mono_into_channels() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(8).split();
        producer.push_slice(&[0.5, -0.25]);

        let mut data = [1.0f32; 6];
        fill_frames(&mut consumer, &mut data, 2);

        assert_eq!(data, [0.5, 0.5, -0.25, -0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_frames_with_empty_queue_is_silent() {
        let (_producer, mut consumer) = HeapRb::<f32>::new(4).split();
        let mut data = [0.7f32; 3];
        fill_frames(&mut consumer, &mut data, 1);
        assert_eq!(data, [0.0; 3]);
    }

    #[test]
    fn test_open_without_device_reports_error_or_context() {
        // CI machines usually have no sound card; either outcome is fine as
        // long as it does not panic or hang.
        match SpeakerBackend.open() {
            Ok(context) => assert!(context.sample_rate() > 0),
            Err(e) => assert!(!e.to_string().is_empty()),
        }
    }
}
