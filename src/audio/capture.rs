//! Microphone capture via `cpal`.
//!
//! [`CpalMicrophone`] is the production [`MicrophoneBackend`].  `cpal::Stream`
//! is not `Send` on every platform, so each capture runs on its own thread
//! that owns the stream; the [`CaptureStream`] handed back to the session
//! only holds the shared sample buffer and a stop channel.  Dropping or
//! finishing it signals the thread, which drops the stream and releases the
//! device.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::oneshot;

use super::level::rms;
use crate::config::AudioConfig;
use crate::recording::{
    AudioEncoding, CaptureFormat, CaptureStream, MicrophoneBackend, RecordingError,
};

// ---------------------------------------------------------------------------
// CpalMicrophone
// ---------------------------------------------------------------------------

/// Default-host microphone, optionally pinned to a named input device.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.input_device.clone())
    }
}

#[async_trait]
impl MicrophoneBackend for CpalMicrophone {
    /// cpal has no explicit permission API.  Querying the input config is
    /// what triggers the OS prompt on platforms that have one, and a refusal
    /// surfaces as a config error.
    async fn request_permission(&self) -> Result<(), RecordingError> {
        let name = self.device_name.clone();
        tokio::task::spawn_blocking(move || {
            let device = find_device(name.as_deref())?;
            device
                .default_input_config()
                .map(|_| ())
                .map_err(|e| RecordingError::PermissionDenied(e.to_string()))
        })
        .await
        .map_err(|e| RecordingError::DeviceUnavailable(e.to_string()))?
    }

    fn supported_encodings(&self) -> Vec<AudioEncoding> {
        vec![AudioEncoding::Wav, AudioEncoding::PcmF32Le]
    }

    async fn open(&self) -> Result<Box<dyn CaptureStream>, RecordingError> {
        let name = self.device_name.clone();
        let shared = Arc::new(CaptureBuffer::default());
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_buffer = Arc::clone(&shared);
        thread::Builder::new()
            .name("voice-coach-capture".into())
            .spawn(move || run_capture(name, thread_buffer, ready_tx, stop_rx))
            .map_err(|e| RecordingError::DeviceUnavailable(e.to_string()))?;

        let format = ready_rx.await.map_err(|_| {
            RecordingError::DeviceUnavailable("capture thread exited during setup".into())
        })??;

        log::info!(
            "audio: capturing {} Hz × {} ch",
            format.sample_rate,
            format.channels
        );
        Ok(Box::new(CpalStream {
            format,
            buffer: shared,
            stop_tx: Some(stop_tx),
        }))
    }
}

fn find_device(name: Option<&str>) -> Result<cpal::Device, RecordingError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| RecordingError::DeviceUnavailable("no default input device".into())),
        Some(wanted) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| RecordingError::DeviceUnavailable(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| {
                    RecordingError::DeviceUnavailable(format!("input device {wanted:?} not found"))
                })
        }
    }
}

// ---------------------------------------------------------------------------
// Capture thread
// ---------------------------------------------------------------------------

/// State written by the cpal callbacks and read by [`CpalStream`].
#[derive(Default)]
struct CaptureBuffer {
    samples: Mutex<Vec<f32>>,
    /// Last callback's RMS, stored as `f32` bits.
    level: AtomicU32,
    failure: Mutex<Option<String>>,
}

fn run_capture(
    name: Option<String>,
    buffer: Arc<CaptureBuffer>,
    ready: oneshot::Sender<Result<CaptureFormat, RecordingError>>,
    stop: mpsc::Receiver<()>,
) {
    let stream = match build_stream(name.as_deref(), &buffer) {
        Ok((stream, format)) => {
            let _ = ready.send(Ok(format));
            stream
        }
        Err(err) => {
            log::error!("audio: {err}");
            let _ = ready.send(Err(err));
            return;
        }
    };

    // Either an explicit stop or the handle being dropped ends the capture.
    let _ = stop.recv();
    drop(stream);
    log::debug!("audio: capture thread released the device");
}

fn build_stream(
    name: Option<&str>,
    buffer: &Arc<CaptureBuffer>,
) -> Result<(cpal::Stream, CaptureFormat), RecordingError> {
    let device = find_device(name)?;
    let supported = device
        .default_input_config()
        .map_err(|e| RecordingError::PermissionDenied(e.to_string()))?;

    let format = CaptureFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => input_stream::<f32>(&device, &config, buffer),
        cpal::SampleFormat::I16 => input_stream::<i16>(&device, &config, buffer),
        cpal::SampleFormat::U16 => input_stream::<u16>(&device, &config, buffer),
        other => {
            return Err(RecordingError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| RecordingError::DeviceUnavailable(e.to_string()))?;
    Ok((stream, format))
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: &Arc<CaptureBuffer>,
) -> Result<cpal::Stream, RecordingError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let data_buffer = Arc::clone(buffer);
    let error_buffer = Arc::clone(buffer);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data
                    .iter()
                    .map(|s| cpal::Sample::to_sample::<f32>(*s))
                    .collect();
                data_buffer
                    .level
                    .store(rms(&converted).to_bits(), Ordering::Relaxed);
                data_buffer
                    .samples
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&converted);
            },
            move |err: cpal::StreamError| {
                log::error!("audio: cpal stream error: {err}");
                *error_buffer
                    .failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                RecordingError::DeviceUnavailable(e.to_string())
            }
            other => RecordingError::PermissionDenied(other.to_string()),
        })
}

// ---------------------------------------------------------------------------
// CpalStream
// ---------------------------------------------------------------------------

struct CpalStream {
    format: CaptureFormat,
    buffer: Arc<CaptureBuffer>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl CpalStream {
    fn release(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl CaptureStream for CpalStream {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn level(&mut self) -> Result<f32, RecordingError> {
        let failure = self
            .buffer
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match failure {
            Some(msg) => Err(RecordingError::DeviceUnavailable(msg)),
            None => Ok(f32::from_bits(self.buffer.level.load(Ordering::Relaxed))),
        }
    }

    fn finish(mut self: Box<Self>) -> Vec<f32> {
        self.release();
        std::mem::take(
            &mut *self
                .buffer
                .samples
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.release();
    }
}
