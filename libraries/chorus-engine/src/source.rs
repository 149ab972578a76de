//! Streaming file decode using Symphonia
//!
//! One `FileAudioSource` per loaded file. Output is always interleaved
//! stereo f32 in [-1.0, 1.0]; multi-channel input is folded down with the
//! ITU-R BS.775 -3dB coefficient.

use crate::error::{EngineError, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

/// -3dB fold-down coefficient for center/surround channels
const FOLD: f32 = 0.707;

/// Streaming decoder for one audio file
pub struct FileAudioSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    duration: Option<Duration>,
    time_base: Option<TimeBase>,
    /// Decoded frames delivered so far (source-side position)
    position_frames: u64,
    /// Decoded samples not yet handed out
    leftover: VecDeque<f32>,
    exhausted: bool,
}

impl FileAudioSource {
    /// Open `path` for streaming decode. A failed open allocates nothing.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::NotFound(path.display().to_string()));
        }

        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::UnsupportedFormat(format!("probe failed: {e}")))?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| EngineError::Decode("no audio tracks found".to_string()))?;

        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let track_id = track.id;
        let time_base = track.codec_params.time_base;
        let duration = track
            .codec_params
            .n_frames
            .map(|n| Duration::from_secs_f64(n as f64 / f64::from(sample_rate)));

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode(format!("failed to create decoder: {e}")))?;

        debug!(path = %path.display(), sample_rate, ?duration, "source opened");
        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            duration,
            time_base,
            position_frames: 0,
            leftover: VecDeque::new(),
            exhausted: false,
        })
    }

    /// Sample rate of the decoded stream.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration reported by the container, if known.
    pub fn duration(&self) -> Duration {
        self.duration.unwrap_or(Duration::ZERO)
    }

    /// Source-side position (decode progress).
    pub fn position(&self) -> Duration {
        Duration::from_secs_f64(self.position_frames as f64 / f64::from(self.sample_rate))
    }

    /// Fill `output` with interleaved stereo samples. Returns the number of
    /// samples written; 0 means end of stream.
    pub fn read(&mut self, output: &mut [f32]) -> Result<usize> {
        let mut written = 0;

        loop {
            while written < output.len() {
                match self.leftover.pop_front() {
                    Some(sample) => {
                        output[written] = sample;
                        written += 1;
                    }
                    None => break,
                }
            }
            if written == output.len() || self.exhausted {
                break;
            }

            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.exhausted = true;
                    continue;
                }
                Err(symphonia::core::errors::Error::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::Symphonia(format!("error reading packet: {e}")));
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    // Bit errors in a single packet are recoverable.
                    warn!(error = %e, "recoverable decode error, skipping packet");
                    continue;
                }
                Err(e) => return Err(EngineError::Decode(e.to_string())),
            };

            self.position_frames += decoded.frames() as u64;
            fold_to_stereo(decoded, &mut self.leftover);
        }

        Ok(written)
    }

    /// Seek to `position` (accurate mode). Returns the position actually
    /// landed on.
    pub fn seek(&mut self, position: Duration) -> Result<Duration> {
        let clamped = match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        };
        let time = Time::new(
            clamped.as_secs(),
            f64::from(clamped.subsec_nanos()) / 1_000_000_000.0,
        );

        let seeked_to = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| EngineError::Seek(e.to_string()))?;
        self.decoder.reset();
        self.leftover.clear();
        self.exhausted = false;

        let actual = match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(seeked_to.actual_ts);
                Duration::from_secs_f64(time.seconds as f64 + time.frac)
            }
            None => Duration::from_secs_f64(
                seeked_to.actual_ts as f64 / f64::from(self.sample_rate),
            ),
        };
        self.position_frames = (actual.as_secs_f64() * f64::from(self.sample_rate)) as u64;
        Ok(actual)
    }

    /// Whether the stream has been fully consumed.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.leftover.is_empty()
    }
}

/// Append `decoded` to `out` as interleaved stereo f32.
fn fold_to_stereo(decoded: AudioBufferRef, out: &mut VecDeque<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => fold_planes(&buf, out, |s| s.clamp(-1.0, 1.0)),
        AudioBufferRef::F64(buf) => fold_planes(&buf, out, |s| (s as f32).clamp(-1.0, 1.0)),
        AudioBufferRef::S32(buf) => fold_planes(&buf, out, |s| s as f32 / 2_147_483_648.0),
        AudioBufferRef::S16(buf) => fold_planes(&buf, out, |s| f32::from(s) / 32_768.0),
        AudioBufferRef::S8(buf) => fold_planes(&buf, out, |s| f32::from(s) / 128.0),
        AudioBufferRef::S24(buf) => fold_planes(&buf, out, |s| s.inner() as f32 / 8_388_608.0),
        AudioBufferRef::U32(buf) => {
            fold_planes(&buf, out, |s| (s as f32 / u32::MAX as f32) * 2.0 - 1.0);
        }
        AudioBufferRef::U16(buf) => {
            fold_planes(&buf, out, |s| (f32::from(s) / f32::from(u16::MAX)) * 2.0 - 1.0);
        }
        AudioBufferRef::U8(buf) => {
            fold_planes(&buf, out, |s| (f32::from(s) / f32::from(u8::MAX)) * 2.0 - 1.0);
        }
        AudioBufferRef::U24(buf) => {
            fold_planes(&buf, out, |s| (s.inner() as f32 / 16_777_215.0) * 2.0 - 1.0);
        }
    }
}

/// Fold planar samples of any channel count into interleaved stereo.
///
/// Mono is duplicated; stereo passes through; for anything wider the first
/// two channels carry and every further channel is mixed into both sides
/// at -3dB.
fn fold_planes<T, F>(
    buf: &symphonia::core::audio::AudioBuffer<T>,
    out: &mut VecDeque<f32>,
    normalize: F,
) where
    T: symphonia::core::sample::Sample + Copy,
    F: Fn(T) -> f32,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();

    match channels {
        0 => {
            for _ in 0..frames * 2 {
                out.push_back(0.0);
            }
        }
        1 => {
            let mono = buf.chan(0);
            for i in 0..frames {
                let sample = normalize(mono[i]);
                out.push_back(sample);
                out.push_back(sample);
            }
        }
        2 => {
            let left = buf.chan(0);
            let right = buf.chan(1);
            for i in 0..frames {
                out.push_back(normalize(left[i]));
                out.push_back(normalize(right[i]));
            }
        }
        _ => {
            let left = buf.chan(0);
            let right = buf.chan(1);
            for i in 0..frames {
                let mut l = normalize(left[i]);
                let mut r = normalize(right[i]);
                for ch in 2..channels {
                    let folded = normalize(buf.chan(ch)[i]) * FOLD;
                    l += folded;
                    r += folded;
                }
                out.push_back(l.clamp(-1.0, 1.0));
                out.push_back(r.clamp(-1.0, 1.0));
            }
        }
    }
}
