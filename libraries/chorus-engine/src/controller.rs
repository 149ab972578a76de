//! Desktop engine controller
//!
//! Implements the session core's engine seam on top of the symphonia
//! source, the rubato effects stages, and the cpal output thread. One
//! controller holds at most one pipeline; `load` disposes the previous
//! pipeline before building the next, and a failed load leaves nothing
//! behind.

use crate::effects::EffectsProcessor;
use crate::error::Result;
use crate::output::{OutputSink, SharedStatus};
use crate::source::FileAudioSource;
use chorus_playback::{EngineFactory, EngineStatus, PlaybackEngine, StoppedNotice};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Frames decoded per pull iteration
const DECODE_CHUNK_FRAMES: usize = 1024;

/// Decode source + effects chain, shared between the controller and the
/// output callback
pub(crate) struct Pipeline {
    source: FileAudioSource,
    effects: EffectsProcessor,
    /// Processed samples waiting for the output callback
    ready: VecDeque<f32>,
    scratch: Vec<f32>,
    /// Whether the effects stages have been flushed after exhaustion
    drained: bool,
}

impl Pipeline {
    fn new(source: FileAudioSource, effects: EffectsProcessor) -> Self {
        Self {
            source,
            effects,
            ready: VecDeque::new(),
            scratch: vec![0.0; DECODE_CHUNK_FRAMES * 2],
            drained: false,
        }
    }

    /// Fill `out` with processed stereo samples. Returns the count written;
    /// anything short of `out.len()` with [`Self::is_finished`] true means
    /// the file has been consumed.
    pub(crate) fn pull(&mut self, out: &mut [f32]) -> Result<usize> {
        let mut written = 0;
        loop {
            while written < out.len() {
                match self.ready.pop_front() {
                    Some(sample) => {
                        out[written] = sample;
                        written += 1;
                    }
                    None => break,
                }
            }
            if written == out.len() {
                return Ok(written);
            }
            if self.source.is_exhausted() {
                if self.drained {
                    return Ok(written);
                }
                // The stages hold up to one chunk of undelivered input;
                // flush it so the end of the file is not cut off.
                self.ready.extend(self.effects.drain()?);
                self.drained = true;
                continue;
            }

            let n = self.source.read(&mut self.scratch)?;
            if n == 0 {
                continue;
            }
            let processed = self.effects.process(&self.scratch[..n])?;
            self.ready.extend(processed);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.source.is_exhausted() && self.drained && self.ready.is_empty()
    }

    fn seek(&mut self, position: Duration) -> Result<Duration> {
        let landed = self.source.seek(position)?;
        self.effects.reset();
        self.ready.clear();
        self.drained = false;
        Ok(landed)
    }

    fn position(&self) -> Duration {
        self.source.position()
    }

    fn duration(&self) -> Duration {
        self.source.duration()
    }
}

/// Everything that exists only while a file is loaded
struct Internals {
    pipeline: Arc<Mutex<Pipeline>>,
    sink: OutputSink,
    status: Arc<SharedStatus>,
}

/// Desktop implementation of the engine seam
pub struct EngineController {
    notices: mpsc::UnboundedSender<StoppedNotice>,
    internals: Option<Internals>,
    rate: f32,
    semitones: f32,
}

impl EngineController {
    pub fn new(notices: mpsc::UnboundedSender<StoppedNotice>) -> Self {
        Self {
            notices,
            internals: None,
            rate: 1.0,
            semitones: 0.0,
        }
    }

    fn lock_pipeline(internals: &Internals) -> std::sync::MutexGuard<'_, Pipeline> {
        // Poison only means the audio callback panicked mid-pull; the
        // pipeline state itself is still consistent enough to drive.
        internals
            .pipeline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl PlaybackEngine for EngineController {
    fn load(&mut self, path: &Path) -> chorus_playback::Result<()> {
        // Dispose the previous pipeline first; its audio thread shuts
        // down without posting a notice.
        self.internals = None;

        let source = FileAudioSource::open(path)?;
        let source_rate = source.sample_rate();
        let duration = source.duration();

        let status = SharedStatus::new(EngineStatus::Paused);
        let pipeline = Arc::new(Mutex::new(Pipeline::new(source, EffectsProcessor::new())));
        // On any failure below, source and sink unwind with the locals.
        let sink = OutputSink::open(
            Arc::clone(&pipeline),
            Arc::clone(&status),
            self.notices.clone(),
        )
        .map_err(chorus_playback::SessionError::from)?;

        {
            let mut guard = pipeline.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .effects
                .initialize(source_rate, sink.device_rate())
                .map_err(chorus_playback::SessionError::from)?;
            guard
                .effects
                .set_tempo(self.rate)
                .map_err(chorus_playback::SessionError::from)?;
            guard
                .effects
                .set_pitch_semitones(self.semitones)
                .map_err(chorus_playback::SessionError::from)?;
        }

        info!(path = %path.display(), ?duration, source_rate, "pipeline loaded");
        self.internals = Some(Internals {
            pipeline,
            sink,
            status,
        });
        Ok(())
    }

    fn play(&mut self) {
        if let Some(internals) = &self.internals {
            internals.status.set(EngineStatus::Playing);
            internals.sink.play();
        }
    }

    fn pause(&mut self) {
        if let Some(internals) = &self.internals {
            internals.sink.pause();
            internals.status.set(EngineStatus::Paused);
        }
    }

    fn stop(&mut self) {
        if let Some(internals) = &self.internals {
            internals.status.set(EngineStatus::Stopped);
            internals.sink.stop();
        }
    }

    fn seek(&mut self, position: Duration) {
        if let Some(internals) = &self.internals {
            let mut pipeline = Self::lock_pipeline(internals);
            match pipeline.seek(position) {
                Ok(landed) => debug!(?position, ?landed, "seek"),
                Err(e) => warn!(?position, error = %e, "seek failed"),
            }
        }
    }

    fn position(&self) -> Duration {
        self.internals
            .as_ref()
            .map(|i| Self::lock_pipeline(i).position())
            .unwrap_or(Duration::ZERO)
    }

    fn duration(&self) -> Duration {
        self.internals
            .as_ref()
            .map(|i| Self::lock_pipeline(i).duration())
            .unwrap_or(Duration::ZERO)
    }

    fn status(&self) -> EngineStatus {
        self.internals
            .as_ref()
            .map_or(EngineStatus::Stopped, |i| i.status.get())
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
        if let Some(internals) = &self.internals {
            let mut pipeline = Self::lock_pipeline(internals);
            if let Err(e) = pipeline.effects.set_tempo(rate) {
                warn!(rate, error = %e, "rate change failed");
            }
        }
    }

    fn set_pitch_semitones(&mut self, semitones: f32) {
        self.semitones = semitones;
        if let Some(internals) = &self.internals {
            let mut pipeline = Self::lock_pipeline(internals);
            if let Err(e) = pipeline.effects.set_pitch_semitones(semitones) {
                warn!(semitones, error = %e, "pitch change failed");
            }
        }
    }

    fn release_internals(&mut self) {
        // Drops the sink (audio thread shuts down silently) and with it
        // the file handle. No stop notice is posted.
        if self.internals.take().is_some() {
            info!("pipeline released");
        }
    }
}

/// Factory for desktop engines
#[derive(Debug, Default, Clone)]
pub struct DesktopEngineFactory;

impl EngineFactory for DesktopEngineFactory {
    type Engine = EngineController;

    fn create(&self, notices: mpsc::UnboundedSender<StoppedNotice>) -> EngineController {
        EngineController::new(notices)
    }
}
