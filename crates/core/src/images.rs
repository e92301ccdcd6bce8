//! Image resolution units for inline cues.
//!
//! Each cue occurrence owns an [`ImageSlot`] that calls the image endpoint
//! exactly once and tracks its own loading state. Slots are independent:
//! dropping one does not abort its request, the result is simply discarded.

use crate::client::{ImageData, SimulationApi};
use crate::content::{Segment, segments};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    /// Placeholder shown while the schematic renders.
    Loading,
    Ready(ImageData),
    Failed,
}

/// Clones share the same pending request.
#[derive(Clone)]
pub struct ImageSlot {
    cue: String,
    state: watch::Receiver<ImageState>,
}

impl ImageSlot {
    /// Starts resolving `cue` in the background.
    pub fn spawn(api: Arc<dyn SimulationApi>, cue: &str) -> Self {
        let (tx, rx) = watch::channel(ImageState::Loading);
        let prompt = cue.to_string();
        tokio::spawn(async move {
            let state = match api.generate_image(&prompt).await {
                Ok(image) => {
                    debug!(cue = %prompt, "Image resolved");
                    ImageState::Ready(image)
                }
                Err(e) => {
                    warn!(cue = %prompt, error = %e, "Image generation failed");
                    ImageState::Failed
                }
            };
            let _ = tx.send(state);
        });
        Self {
            cue: cue.to_string(),
            state: rx,
        }
    }

    pub fn cue(&self) -> &str {
        &self.cue
    }

    pub fn state(&self) -> ImageState {
        self.state.borrow().clone()
    }

    /// Waits until the slot leaves [`ImageState::Loading`].
    pub async fn resolved(&mut self) -> ImageState {
        match self.state.wait_for(|s| *s != ImageState::Loading).await {
            Ok(state) => state.clone(),
            Err(_) => ImageState::Failed,
        }
    }
}

/// The image slots of the narrative currently on screen, one per cue
/// occurrence.
pub struct CueBoard {
    api: Arc<dyn SimulationApi>,
    slots: Vec<ImageSlot>,
}

impl CueBoard {
    pub fn new(api: Arc<dyn SimulationApi>) -> Self {
        Self { api, slots: vec![] }
    }

    /// Brings the slots in line with the cues found in `text`.
    ///
    /// Occurrences already tracked keep their slot; new occurrences get a
    /// fresh one. Returns the indices of slots created by this call.
    pub fn sync(&mut self, text: &str) -> Vec<usize> {
        let cues: Vec<&str> = segments(text)
            .into_iter()
            .filter_map(|s| match s {
                Segment::Cue(cue) => Some(cue),
                Segment::Text(_) => None,
            })
            .collect();

        let kept = self
            .slots
            .iter()
            .zip(&cues)
            .take_while(|(slot, cue)| slot.cue() == **cue)
            .count();
        self.slots.truncate(kept);

        let mut created = vec![];
        for cue in &cues[kept..] {
            created.push(self.slots.len());
            self.slots.push(ImageSlot::spawn(self.api.clone(), cue));
        }
        created
    }

    /// Forgets every slot, e.g. when a new narrative replaces the old one.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn slots(&self) -> &[ImageSlot] {
        &self.slots
    }
}
