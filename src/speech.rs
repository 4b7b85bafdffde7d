//! Speech playback controller.
//!
//! There is a single "active utterance" slot. Starting playback cancels
//! whatever holds the slot; `stop_all` empties it. A preempted or stopped
//! utterance never reports completion.

use crate::ai::SpeechSynthesizer;
use crate::audio::AudioSink;
use crate::session::VoiceSwitch;
use crate::types::Persona;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How an utterance ended, reported exactly once unless it was preempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Audio played to the end.
    Played,
    /// The synthesizer produced nothing.
    NoAudio,
    /// Voice output was switched off before playback could start.
    VoiceDisabled,
    /// The output device refused to start or failed mid-play.
    Failed,
}

#[derive(Debug)]
struct ActiveUtterance {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct SpeechPlayback {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    voice: VoiceSwitch,
    active: Arc<Mutex<Option<ActiveUtterance>>>,
    next_id: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
}

impl SpeechPlayback {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, sink: Arc<dyn AudioSink>, voice: VoiceSwitch) -> Self {
        Self {
            synthesizer,
            sink,
            voice,
            active: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Synthesises `text` and plays it in the background.
    ///
    /// `on_start` runs when audio actually begins. `on_complete` runs once with
    /// the outcome, except when the utterance is preempted by another `speak`
    /// or by [`stop_all`](Self::stop_all), in which case neither runs again.
    pub fn speak<S, C>(&self, text: String, persona: Persona, on_start: S, on_complete: C) -> JoinHandle<()>
    where
        S: FnOnce() + Send + 'static,
        C: FnOnce(SpeechOutcome) + Send + 'static,
    {
        let this = self.clone();
        let epoch = self.epoch.load(Ordering::SeqCst);
        tokio::spawn(async move {
            let Some(clip) = this.synthesizer.synthesize(&text, persona).await else {
                debug!("no audio for utterance");
                on_complete(SpeechOutcome::NoAudio);
                return;
            };
            if clip.is_empty() {
                on_complete(SpeechOutcome::NoAudio);
                return;
            }
            if !this.voice.is_enabled() {
                debug!("voice switched off during synthesis");
                on_complete(SpeechOutcome::VoiceDisabled);
                return;
            }
            if this.superseded(epoch) {
                return;
            }
            if let Err(e) = this.sink.resume().await {
                warn!(error = %e, "audio output could not be resumed");
                on_complete(SpeechOutcome::Failed);
                return;
            }

            let Some((id, cancel)) = this.claim(epoch) else {
                return;
            };
            on_start();
            debug!(utterance = id, duration = ?clip.duration(), "playback started");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                result = this.sink.play(clip) => Some(result),
            };
            this.release(id);

            match outcome {
                None => debug!(utterance = id, "playback preempted"),
                Some(Ok(())) => on_complete(SpeechOutcome::Played),
                Some(Err(e)) => {
                    warn!(utterance = id, error = %e, "playback failed");
                    on_complete(SpeechOutcome::Failed);
                }
            }
        })
    }

    /// Stops current playback and discards anything still being synthesised.
    pub fn stop_all(&self) {
        let mut active = self.active.lock().expect("playback slot poisoned");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(utterance) = active.take() {
            debug!(utterance = utterance.id, "stopping playback");
            utterance.cancel.cancel();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.active.lock().expect("playback slot poisoned").is_some()
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// Takes the slot, cancelling the previous holder.
    fn claim(&self, epoch: u64) -> Option<(u64, CancellationToken)> {
        let mut active = self.active.lock().expect("playback slot poisoned");
        if self.superseded(epoch) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        if let Some(previous) = active.replace(ActiveUtterance {
            id,
            cancel: cancel.clone(),
        }) {
            debug!(utterance = previous.id, "preempting playback");
            previous.cancel.cancel();
        }
        Some((id, cancel))
    }

    fn release(&self, id: u64) {
        let mut active = self.active.lock().expect("playback slot poisoned");
        if active.as_ref().is_some_and(|utterance| utterance.id == id) {
            *active = None;
        }
    }
}
