//! Audio output using cpal, plus the context factories
//!
//! The cpal stream is created and owned by a dedicated thread because
//! streams are not `Send` on every host. The thread reports the context it
//! built (or the error it hit) back through a channel before the caller
//! continues, then parks until the output is dropped.
//!
//! A null sink renders and discards blocks in real time for hosts without
//! an audio device.

use crate::error::{Error, Result};
use crate::graph::AudioContext;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use loopstation_common::timing::is_supported_rate;
use loopstation_common::ClockState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Sample rates tried in order when opening a device
const PREFERRED_RATES: [u32; 2] = [48000, 44100];

/// Null sink block length
const NULL_BLOCK: Duration = Duration::from_millis(10);

/// A running output that pulls audio from an [`AudioContext`].
///
/// Dropping it stops the stream and joins its thread.
pub struct AudioOutput {
    device_name: String,
    sample_rate: u32,
    channels: u16,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// What the output thread reports once set up
struct Ready {
    context: Arc<AudioContext>,
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

impl AudioOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open a cpal device and create a running context driven by it.
    ///
    /// Falls back to the default device if `device_name` is not found.
    pub fn open_device(device_name: Option<String>) -> Result<(Arc<AudioContext>, Self)> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let thread = std::thread::Builder::new()
            .name("loopstation-audio".to_string())
            .spawn(move || cpal_thread(device_name, ready_tx, thread_shutdown))
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn audio thread: {}", e)))?;

        Self::await_ready(ready_rx, shutdown, thread)
    }

    /// Create a running context rendered into the void in real time.
    pub fn open_null(sample_rate: u32) -> Result<(Arc<AudioContext>, Self)> {
        let context = Arc::new(AudioContext::new(sample_rate, ClockState::Running)?);
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_ctx = Arc::clone(&context);
        let thread_shutdown = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("loopstation-null-sink".to_string())
            .spawn(move || null_thread(thread_ctx, thread_shutdown))
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn null sink: {}", e)))?;

        info!("Null audio sink running at {} Hz", sample_rate);

        Ok((
            context,
            Self {
                device_name: "null".to_string(),
                sample_rate,
                channels: 2,
                shutdown,
                thread: Some(thread),
            },
        ))
    }

    fn await_ready(
        ready_rx: std_mpsc::Receiver<Result<Ready>>,
        shutdown: Arc<AtomicBool>,
        thread: JoinHandle<()>,
    ) -> Result<(Arc<AudioContext>, Self)> {
        let ready = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::AudioOutput(
                    "Audio thread exited before reporting".to_string(),
                ));
            }
        };

        Ok((
            ready.context,
            Self {
                device_name: ready.device_name,
                sample_rate: ready.sample_rate,
                channels: ready.channels,
                shutdown,
                thread: Some(thread),
            },
        ))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("Audio thread panicked during shutdown");
            }
        }
    }
}

fn cpal_thread(
    device_name: Option<String>,
    ready_tx: std_mpsc::Sender<Result<Ready>>,
    shutdown: Arc<AtomicBool>,
) {
    let (ready, stream) = match open_stream(device_name) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let context = Arc::clone(&ready.context);
    if ready_tx.send(Ok(ready)).is_err() {
        return;
    }

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::park_timeout(Duration::from_millis(100));
    }

    if let Err(e) = stream.pause() {
        debug!("Failed to pause stream on shutdown: {}", e);
    }
    drop(stream);
    context.close();
    info!("Audio stream stopped");
}

fn open_stream(device_name: Option<String>) -> Result<(Ready, Stream)> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name.as_deref())?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (config, sample_format) = get_best_config(&device)?;
    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}",
        config.sample_rate.0, config.channels, sample_format
    );

    let context = Arc::new(AudioContext::new(config.sample_rate.0, ClockState::Running)?);

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&context))?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&context))?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&context))?,
        other => {
            return Err(Error::AudioOutput(format!("Unsupported sample format: {:?}", other)));
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

    info!("Audio stream started on '{}'", name);

    Ok((
        Ready {
            context,
            device_name: name,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        },
        stream,
    ))
}

fn select_device(host: &cpal::Host, device_name: Option<&str>) -> Result<Device> {
    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Found requested audio device: {}", name);
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    host.default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))
}

/// Pick a stereo configuration at a tick-compatible rate.
///
/// Prefers 48 kHz then 44.1 kHz, f32 before integer formats.
fn get_best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .collect();

    for format in [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16] {
        for rate in PREFERRED_RATES {
            let found = supported.iter().find(|config| {
                config.channels() == 2
                    && config.sample_format() == format
                    && config.min_sample_rate().0 <= rate
                    && config.max_sample_rate().0 >= rate
            });
            if let Some(config) = found {
                let config = config.clone().with_sample_rate(cpal::SampleRate(rate));
                return Ok((config.config(), format));
            }
        }
    }

    // Fallback: use default config
    let default = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;

    if !is_supported_rate(default.sample_rate().0) {
        warn!(
            "Default device rate {} Hz is not tick-compatible",
            default.sample_rate().0
        );
    }

    Ok((default.config(), default.sample_format()))
}

fn build_stream<T>(device: &Device, config: &StreamConfig, context: Arc<AudioContext>) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                context.render(&mut scratch, channels);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

fn null_thread(context: Arc<AudioContext>, shutdown: Arc<AtomicBool>) {
    let block_frames = (context.sample_rate() as u128 * NULL_BLOCK.as_millis() / 1000) as usize;
    let mut block = vec![0.0f32; block_frames * 2];
    let started = Instant::now();
    let mut blocks: u32 = 0;

    while !shutdown.load(Ordering::SeqCst) && context.state() != ClockState::Closed {
        context.render(&mut block, 2);
        blocks = blocks.saturating_add(1);

        let due = started + NULL_BLOCK * blocks;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            std::thread::park_timeout(wait);
        }
    }

    context.close();
    debug!("Null sink stopped");
}

/// A created context together with whatever keeps it audible
pub struct ContextHandle {
    pub context: Arc<AudioContext>,
    /// Output driving the clock; `None` when the caller renders by hand
    pub output: Option<AudioOutput>,
}

/// Creates the process-wide audio context on first use
pub trait ContextFactory: Send + Sync {
    /// Build the context and start its output
    fn create(&self) -> Result<ContextHandle>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Context backed by a cpal output device
pub struct CpalContextFactory {
    device: Option<String>,
}

impl CpalContextFactory {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl ContextFactory for CpalContextFactory {
    fn create(&self) -> Result<ContextHandle> {
        let (context, output) = AudioOutput::open_device(self.device.clone())
            .map_err(|e| Error::ClockUnavailable(e.to_string()))?;
        Ok(ContextHandle {
            context,
            output: Some(output),
        })
    }

    fn describe(&self) -> String {
        match &self.device {
            Some(name) => format!("cpal device '{}'", name),
            None => "default cpal device".to_string(),
        }
    }
}

/// Context without an audio device
pub struct NullContextFactory {
    sample_rate: u32,
    realtime: bool,
    initial_state: ClockState,
}

impl NullContextFactory {
    /// Rendered by a background thread at wall-clock pace
    pub fn realtime(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            realtime: true,
            initial_state: ClockState::Running,
        }
    }

    /// Rendered only when the owner calls `AudioContext::render`
    pub fn manual(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            realtime: false,
            initial_state: ClockState::Running,
        }
    }

    /// Start the manual context suspended instead of running
    pub fn starting_suspended(mut self) -> Self {
        self.initial_state = ClockState::Suspended;
        self
    }
}

impl ContextFactory for NullContextFactory {
    fn create(&self) -> Result<ContextHandle> {
        if self.realtime {
            let (context, output) = AudioOutput::open_null(self.sample_rate)?;
            if self.initial_state == ClockState::Suspended {
                context.suspend()?;
            }
            return Ok(ContextHandle {
                context,
                output: Some(output),
            });
        }

        let context = Arc::new(AudioContext::new(self.sample_rate, self.initial_state)?);
        Ok(ContextHandle {
            context,
            output: None,
        })
    }

    fn describe(&self) -> String {
        let mode = if self.realtime { "realtime" } else { "manual" };
        format!("null sink ({}, {} Hz)", mode, self.sample_rate)
    }
}
