//! cpal output thread
//!
//! A dedicated thread owns the cpal `Stream`, so the stream never crosses
//! a thread boundary. Transport commands reach it over a bounded
//! crossbeam channel; the real-time callback pulls frames from the shared
//! pipeline and reports natural end or runtime failure through the
//! engine's stop-notice sender, at most once per pipeline.

use crate::controller::Pipeline;
use crate::error::{EngineError, Result};
use chorus_playback::{EngineStatus, StoppedNotice};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Transport commands for the audio thread
enum OutputCommand {
    Play,
    Pause,
    /// Tear the stream down and post the stop notice
    Stop,
    /// Tear the stream down silently
    Shutdown,
}

/// Engine status shared between the controller and the audio callback
pub(crate) struct SharedStatus(AtomicU8);

impl SharedStatus {
    pub(crate) fn new(status: EngineStatus) -> Arc<Self> {
        Arc::new(Self(AtomicU8::new(encode(status))))
    }

    pub(crate) fn set(&self, status: EngineStatus) {
        self.0.store(encode(status), Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> EngineStatus {
        match self.0.load(Ordering::Relaxed) {
            1 => EngineStatus::Playing,
            2 => EngineStatus::Paused,
            _ => EngineStatus::Stopped,
        }
    }
}

fn encode(status: EngineStatus) -> u8 {
    match status {
        EngineStatus::Stopped => 0,
        EngineStatus::Playing => 1,
        EngineStatus::Paused => 2,
    }
}

/// Handle to the audio thread for one pipeline
pub(crate) struct OutputSink {
    commands: Sender<OutputCommand>,
    device_rate: u32,
    _thread: Option<JoinHandle<()>>,
}

impl OutputSink {
    /// Resolve the default output device and spawn the audio thread.
    /// Device resolution failures surface here, synchronously.
    pub(crate) fn open(
        pipeline: Arc<Mutex<Pipeline>>,
        status: Arc<SharedStatus>,
        notices: mpsc::UnboundedSender<StoppedNotice>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::PipelineInit("no output device available".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| EngineError::PipelineInit(format!("output config: {e}")))?;
        let device_rate = supported.sample_rate();
        let channels = usize::from(supported.channels());
        let config = supported.config();

        let (command_tx, command_rx) = bounded::<OutputCommand>(32);
        let thread = thread::Builder::new()
            .name("chorus-output".to_string())
            .spawn(move || {
                audio_thread(device, config, channels, pipeline, status, notices, command_rx);
            })
            .map_err(EngineError::Io)?;

        debug!(device_rate, channels, "output sink opened");
        Ok(Self {
            commands: command_tx,
            device_rate,
            _thread: Some(thread),
        })
    }

    pub(crate) fn device_rate(&self) -> u32 {
        self.device_rate
    }

    pub(crate) fn play(&self) {
        let _ = self.commands.send(OutputCommand::Play);
    }

    pub(crate) fn pause(&self) {
        let _ = self.commands.send(OutputCommand::Pause);
    }

    pub(crate) fn stop(&self) {
        let _ = self.commands.send(OutputCommand::Stop);
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        let _ = self.commands.send(OutputCommand::Shutdown);
    }
}

/// Runs on the dedicated thread; sole owner of the cpal stream.
fn audio_thread(
    device: Device,
    config: StreamConfig,
    channels: usize,
    pipeline: Arc<Mutex<Pipeline>>,
    status: Arc<SharedStatus>,
    notices: mpsc::UnboundedSender<StoppedNotice>,
    commands: Receiver<OutputCommand>,
) {
    let notice_sent = Arc::new(AtomicBool::new(false));
    let mut stream: Option<Stream> = None;

    while let Ok(command) = commands.recv() {
        match command {
            OutputCommand::Play => {
                if let Some(s) = &stream {
                    if let Err(e) = s.play() {
                        error!(error = %e, "failed to resume stream");
                    }
                    continue;
                }
                match build_stream(
                    &device,
                    &config,
                    channels,
                    Arc::clone(&pipeline),
                    Arc::clone(&status),
                    notices.clone(),
                    Arc::clone(&notice_sent),
                ) {
                    Ok(s) => {
                        if let Err(e) = s.play() {
                            error!(error = %e, "failed to start stream");
                            post_notice(&notices, &notice_sent, Some(e.to_string()));
                            status.set(EngineStatus::Stopped);
                        } else {
                            stream = Some(s);
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "failed to build stream");
                        post_notice(&notices, &notice_sent, Some(e.to_string()));
                        status.set(EngineStatus::Stopped);
                    }
                }
            }
            OutputCommand::Pause => {
                if let Some(s) = &stream {
                    if let Err(e) = s.pause() {
                        warn!(error = %e, "failed to pause stream");
                    }
                }
            }
            OutputCommand::Stop => {
                stream = None;
                status.set(EngineStatus::Stopped);
                post_notice(&notices, &notice_sent, None);
            }
            OutputCommand::Shutdown => {
                stream = None;
                break;
            }
        }
    }
    debug!("audio thread exited");
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    channels: usize,
    pipeline: Arc<Mutex<Pipeline>>,
    status: Arc<SharedStatus>,
    notices: mpsc::UnboundedSender<StoppedNotice>,
    notice_sent: Arc<AtomicBool>,
) -> Result<Stream> {
    let error_notices = notices.clone();
    let error_status = Arc::clone(&status);
    let error_sent = Arc::clone(&notice_sent);
    let mut stereo: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render(
                    data,
                    channels,
                    &mut stereo,
                    &pipeline,
                    &status,
                    &notices,
                    &notice_sent,
                );
            },
            move |e| {
                error!(error = %e, "stream error");
                error_status.set(EngineStatus::Stopped);
                post_notice(&error_notices, &error_sent, Some(e.to_string()));
            },
            None,
        )
        .map_err(|e| EngineError::Output(format!("build stream: {e}")))
}

/// Real-time callback body: pull stereo frames from the pipeline and map
/// them onto the device's channel layout.
fn render(
    data: &mut [f32],
    channels: usize,
    stereo: &mut Vec<f32>,
    pipeline: &Arc<Mutex<Pipeline>>,
    status: &Arc<SharedStatus>,
    notices: &mpsc::UnboundedSender<StoppedNotice>,
    notice_sent: &Arc<AtomicBool>,
) {
    data.fill(0.0);
    if status.get() != EngineStatus::Playing {
        return;
    }

    let frames = data.len() / channels.max(1);
    stereo.resize(frames * 2, 0.0);
    stereo.fill(0.0);

    let (pulled, finished) = {
        let mut guard = pipeline.lock().unwrap_or_else(|e| e.into_inner());
        match guard.pull(stereo) {
            Ok(n) => (n, guard.is_finished()),
            Err(e) => {
                status.set(EngineStatus::Stopped);
                post_notice(notices, notice_sent, Some(e.to_string()));
                return;
            }
        }
    };

    for (frame_idx, frame) in data.chunks_exact_mut(channels).enumerate() {
        let l = stereo[frame_idx * 2];
        let r = stereo[frame_idx * 2 + 1];
        match channels {
            1 => frame[0] = (l + r) * 0.5,
            _ => {
                frame[0] = l;
                frame[1] = r;
            }
        }
    }

    if pulled < stereo.len() && finished {
        status.set(EngineStatus::Stopped);
        post_notice(notices, notice_sent, None);
    }
}

fn post_notice(
    notices: &mpsc::UnboundedSender<StoppedNotice>,
    notice_sent: &Arc<AtomicBool>,
    error: Option<String>,
) {
    if notice_sent.swap(true, Ordering::SeqCst) {
        return;
    }
    let _ = notices.send(StoppedNotice { error });
}
