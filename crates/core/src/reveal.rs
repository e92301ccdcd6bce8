//! Incremental Reveal Scheduler
//!
//! Discloses a narrative one character per tick. A single scheduler serves a
//! whole session: starting a new reveal tears down the running timer first, so
//! there is never more than one ticking job, and the paired [`RevealFeed`]
//! drops anything a superseded job managed to emit before it was stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::debug;

const NO_JOB: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealEvent {
    /// `revealed` characters of the job's text are now visible.
    Progress {
        job: u64,
        revealed: usize,
        /// Set on every Nth character, when a keystroke tone is due.
        chime: bool,
    },
    /// The whole text is visible and the job has stopped ticking.
    Finished { job: u64 },
}

impl RevealEvent {
    pub fn job(&self) -> u64 {
        match self {
            RevealEvent::Progress { job, .. } | RevealEvent::Finished { job } => *job,
        }
    }
}

/// Receiving side of a [`RevealScheduler`].
pub struct RevealFeed {
    rx: mpsc::UnboundedReceiver<RevealEvent>,
    current: Arc<AtomicU64>,
}

impl RevealFeed {
    /// Next event of the current job. Events from cancelled jobs are skipped.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<RevealEvent> {
        loop {
            let event = self.rx.recv().await?;
            if event.job() == self.current.load(Ordering::Acquire) {
                return Some(event);
            }
        }
    }
}

pub struct RevealScheduler {
    interval: Duration,
    chime_every: usize,
    last_job: u64,
    current: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<RevealEvent>,
    task: Option<JoinHandle<()>>,
}

impl RevealScheduler {
    /// `chime_every == 0` disables chimes.
    pub fn new(interval: Duration, chime_every: usize) -> (Self, RevealFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let current = Arc::new(AtomicU64::new(NO_JOB));
        let scheduler = Self {
            interval,
            chime_every,
            last_job: NO_JOB,
            current: current.clone(),
            tx,
            task: None,
        };
        (scheduler, RevealFeed { rx, current })
    }

    /// Starts revealing `text` from zero, superseding any running job.
    pub fn start(&mut self, text: &str) -> u64 {
        self.cancel();

        self.last_job += 1;
        let job = self.last_job;
        self.current.store(job, Ordering::Release);

        let chars = text.chars().count();
        let interval = self.interval;
        let chime_every = self.chime_every;
        let tx = self.tx.clone();
        debug!(job, chars, "Starting reveal");

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            for index in 0..chars {
                ticker.tick().await;
                let chime = chime_every > 0 && index % chime_every == 0;
                let progress = RevealEvent::Progress {
                    job,
                    revealed: index + 1,
                    chime,
                };
                if tx.send(progress).is_err() {
                    return;
                }
            }
            let _ = tx.send(RevealEvent::Finished { job });
        }));
        job
    }

    /// Stops the running job, if any. No further events from it are delivered.
    pub fn cancel(&mut self) {
        self.current.store(NO_JOB, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// The job currently ticking, if it has not finished yet.
    pub fn active_job(&self) -> Option<u64> {
        let job = self.current.load(Ordering::Acquire);
        let running = self.task.as_ref().is_some_and(|t| !t.is_finished());
        (job != NO_JOB && running).then_some(job)
    }
}

impl Drop for RevealScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
