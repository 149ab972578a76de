//! Tempo and pitch stages
//!
//! Two chained rubato resamplers over interleaved stereo f32. The tempo
//! stage also absorbs the file-rate to device-rate conversion, so its base
//! ratio is `device_rate / source_rate`; a playback rate `r` scales that by
//! `1/r` (faster playback consumes input faster). The pitch stage runs at
//! `1 / 2^(semitones/12)`.
//!
//! Ratio changes are `set_resample_ratio` parameter updates on the live
//! resamplers, no rebuild. `initialize` drops and rebuilds both stages for
//! a new source format.

use crate::error::{EngineError, Result};
use rubato::{
    Resampler, SincFixedOut, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

const CHANNELS: usize = 2;
const CHUNK_FRAMES: usize = 1024;

/// Ratios are clamped so `set_resample_ratio` stays inside the range the
/// resamplers were constructed for.
const MAX_RATIO_RELATIVE: f64 = 8.0;
const MIN_RATE: f32 = 0.25;
const MAX_RATE: f32 = 4.0;

/// One resampler stage with its input accumulator
struct Stage {
    resampler: SincFixedOut<f32>,
    /// Planar input waiting for a full chunk
    pending: [Vec<f32>; CHANNELS],
}

impl Stage {
    fn new(ratio: f64) -> Result<Self> {
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler =
            SincFixedOut::<f32>::new(ratio, MAX_RATIO_RELATIVE, params, CHUNK_FRAMES, CHANNELS)
                .map_err(|e| EngineError::PipelineInit(format!("resampler creation: {e}")))?;
        Ok(Self {
            resampler,
            pending: [Vec::new(), Vec::new()],
        })
    }

    fn set_ratio(&mut self, ratio: f64) -> Result<()> {
        self.resampler
            .set_resample_ratio(ratio, true)
            .map_err(|e| EngineError::PipelineInit(format!("resample ratio: {e}")))
    }

    /// Push planar input through the stage; emits every full output chunk
    /// that became available.
    fn process(&mut self, input: &[Vec<f32>; CHANNELS]) -> Result<[Vec<f32>; CHANNELS]> {
        for (pending, channel) in self.pending.iter_mut().zip(input.iter()) {
            pending.extend_from_slice(channel);
        }

        let mut out: [Vec<f32>; CHANNELS] = [Vec::new(), Vec::new()];
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let frame_in: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|p| p.drain(..needed).collect())
                .collect();
            let produced = self
                .resampler
                .process(&frame_in, None)
                .map_err(|e| EngineError::Output(format!("resample: {e}")))?;
            for (out_ch, produced_ch) in out.iter_mut().zip(produced.iter()) {
                out_ch.extend_from_slice(produced_ch);
            }
        }
        Ok(out)
    }

    /// Push the remaining buffered input through, zero-padded to a full
    /// chunk. Called once the source is exhausted.
    fn flush(&mut self) -> Result<[Vec<f32>; CHANNELS]> {
        let mut out: [Vec<f32>; CHANNELS] = [Vec::new(), Vec::new()];
        if self.pending[0].is_empty() {
            return Ok(out);
        }
        let frame_in: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
        let produced = self
            .resampler
            .process_partial(Some(&frame_in), None)
            .map_err(|e| EngineError::Output(format!("resample flush: {e}")))?;
        for (out_ch, produced_ch) in out.iter_mut().zip(produced.iter()) {
            out_ch.extend_from_slice(produced_ch);
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.resampler.reset();
        for pending in &mut self.pending {
            pending.clear();
        }
    }
}

/// Tempo stage followed by pitch stage
pub struct EffectsProcessor {
    tempo: Option<Stage>,
    pitch: Option<Stage>,
    /// `device_rate / source_rate`, folded into the tempo stage
    base_ratio: f64,
    rate: f32,
    semitones: f32,
}

impl EffectsProcessor {
    pub fn new() -> Self {
        Self {
            tempo: None,
            pitch: None,
            base_ratio: 1.0,
            rate: 1.0,
            semitones: 0.0,
        }
    }

    /// Build both stages for a source/device rate pair, dropping any prior
    /// stages first. Safe to call again for the next file.
    pub fn initialize(&mut self, source_rate: u32, device_rate: u32) -> Result<()> {
        self.tempo = None;
        self.pitch = None;
        self.base_ratio = f64::from(device_rate) / f64::from(source_rate);
        self.tempo = Some(Stage::new(self.tempo_ratio())?);
        self.pitch = Some(Stage::new(self.pitch_ratio())?);
        debug!(source_rate, device_rate, "effects stages built");
        Ok(())
    }

    fn tempo_ratio(&self) -> f64 {
        self.base_ratio / f64::from(self.rate.clamp(MIN_RATE, MAX_RATE))
    }

    fn pitch_ratio(&self) -> f64 {
        1.0 / f64::from(2.0f32.powf(self.semitones / 12.0))
    }

    /// Change the playback rate live.
    pub fn set_tempo(&mut self, rate: f32) -> Result<()> {
        self.rate = rate.clamp(MIN_RATE, MAX_RATE);
        if let Some(stage) = self.tempo.as_mut() {
            stage.set_ratio(self.base_ratio / f64::from(self.rate))?;
        }
        Ok(())
    }

    /// Change the pitch shift live.
    pub fn set_pitch_semitones(&mut self, semitones: f32) -> Result<()> {
        self.semitones = semitones.clamp(-12.0, 12.0);
        let ratio = self.pitch_ratio();
        if let Some(stage) = self.pitch.as_mut() {
            stage.set_ratio(ratio)?;
        }
        Ok(())
    }

    /// Run interleaved stereo input through both stages; output is whatever
    /// full chunks the stages produced (possibly empty while they fill).
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let (Some(tempo), Some(pitch)) = (self.tempo.as_mut(), self.pitch.as_mut()) else {
            return Ok(input.to_vec());
        };

        let planar = deinterleave(input);
        let after_tempo = tempo.process(&planar)?;
        let after_pitch = pitch.process(&after_tempo)?;
        Ok(interleave(&after_pitch))
    }

    /// Flush audio still buffered inside the stages.
    ///
    /// The stages only emit whole chunks, so the end of a file leaves up
    /// to one chunk of input stranded in each accumulator. Call this once
    /// the source is exhausted to get the tail out.
    pub fn drain(&mut self) -> Result<Vec<f32>> {
        let (Some(tempo), Some(pitch)) = (self.tempo.as_mut(), self.pitch.as_mut()) else {
            return Ok(Vec::new());
        };

        let tempo_tail = tempo.flush()?;
        let mut out = pitch.process(&tempo_tail)?;
        let pitch_tail = pitch.flush()?;
        for (out_ch, tail_ch) in out.iter_mut().zip(pitch_tail.iter()) {
            out_ch.extend_from_slice(tail_ch);
        }
        Ok(interleave(&out))
    }

    /// Drop buffered audio (after a seek).
    pub fn reset(&mut self) {
        if let Some(stage) = self.tempo.as_mut() {
            stage.reset();
        }
        if let Some(stage) = self.pitch.as_mut() {
            stage.reset();
        }
    }
}

impl Default for EffectsProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn deinterleave(input: &[f32]) -> [Vec<f32>; CHANNELS] {
    let frames = input.len() / CHANNELS;
    let mut planar: [Vec<f32>; CHANNELS] =
        [Vec::with_capacity(frames), Vec::with_capacity(frames)];
    for frame in input.chunks_exact(CHANNELS) {
        planar[0].push(frame[0]);
        planar[1].push(frame[1]);
    }
    planar
}

fn interleave(planar: &[Vec<f32>; CHANNELS]) -> Vec<f32> {
    let frames = planar[0].len();
    let mut out = Vec::with_capacity(frames * CHANNELS);
    for i in 0..frames {
        out.push(planar[0][i]);
        out.push(planar[1][i]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(effects: &mut EffectsProcessor, total_frames: usize) -> usize {
        let input = vec![0.25f32; 2048];
        let mut produced = 0;
        let mut fed = 0;
        while fed < total_frames * 2 {
            produced += effects.process(&input).unwrap().len();
            fed += input.len();
        }
        produced
    }

    #[test]
    fn passthrough_before_initialize() {
        let mut effects = EffectsProcessor::new();
        let input = vec![0.5f32; 512];
        let output = effects.process(&input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn unity_ratio_preserves_throughput() {
        let mut effects = EffectsProcessor::new();
        effects.initialize(44100, 44100).unwrap();

        let frames_in = 44100;
        let samples_out = feed(&mut effects, frames_in);
        // Sinc stages carry latency, so allow a couple of chunks of slack.
        let expected = frames_in * 2;
        assert!(samples_out as i64 >= expected as i64 - 4 * 1024 * 2);
        assert!(samples_out <= expected + 4 * 1024 * 2);
    }

    #[test]
    fn double_rate_halves_output() {
        let mut effects = EffectsProcessor::new();
        effects.initialize(44100, 44100).unwrap();
        effects.set_tempo(2.0).unwrap();

        let frames_in = 44100;
        let samples_out = feed(&mut effects, frames_in);
        let expected = frames_in; // half the frames, stereo
        assert!((samples_out as i64 - expected as i64).unsigned_abs() < 8 * 1024 * 2);
    }

    #[test]
    fn rate_is_clamped() {
        let mut effects = EffectsProcessor::new();
        effects.initialize(44100, 44100).unwrap();
        assert!(effects.set_tempo(100.0).is_ok());
        assert!(effects.set_tempo(0.0).is_ok());
    }

    #[test]
    fn pitch_shift_changes_output_length() {
        let mut effects = EffectsProcessor::new();
        effects.initialize(44100, 44100).unwrap();
        // One octave up resamples to half length.
        effects.set_pitch_semitones(12.0).unwrap();

        let frames_in = 44100;
        let samples_out = feed(&mut effects, frames_in);
        assert!((samples_out as i64 - frames_in as i64).unsigned_abs() < 8 * 1024 * 2);
    }

    #[test]
    fn drain_flushes_the_buffered_tail() {
        let mut effects = EffectsProcessor::new();
        assert!(effects.drain().unwrap().is_empty());

        effects.initialize(44100, 44100).unwrap();

        // Less than one chunk: nothing comes out until the flush.
        let input = vec![0.3f32; 600 * 2];
        assert!(effects.process(&input).unwrap().is_empty());
        let tail = effects.drain().unwrap();
        assert!(!tail.is_empty());
    }

    #[test]
    fn initialize_twice_is_safe() {
        let mut effects = EffectsProcessor::new();
        effects.initialize(44100, 48000).unwrap();
        effects.set_tempo(1.5).unwrap();
        effects.initialize(48000, 48000).unwrap();

        let input = vec![0.1f32; 4096];
        assert!(effects.process(&input).is_ok());
    }
}
