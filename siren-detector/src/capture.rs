/// Audio capture
///
/// The audio backend delivers samples on its own callback thread. They are
/// pushed into a lock-free SPSC ring and the pipeline thread pulls fixed-size
/// slices out of it with a blocking read. Samples that do not fit in the ring
/// are dropped and counted, like an overrun in the device buffer.

use cache_padded::CachePadded;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::window::AudioSample;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("No default input device available")]
    NoDefaultDevice,

    #[error("Cannot open audio device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: cpal::BuildStreamError,
    },

    #[error("Cannot start audio device {device}: {source}")]
    Start {
        device: String,
        #[source]
        source: cpal::PlayStreamError,
    },
}

/// Blocking source of fixed-size sample slices
pub trait AudioSource {
    /// Fill `out` with the next samples
    ///
    /// Blocks until `out` is full. Returns fewer samples only when the stream
    /// has failed or shutdown was requested.
    fn read_slice(&mut self, out: &mut [AudioSample]) -> Result<usize, CaptureError>;

    /// Samples lost because the reader fell behind
    fn dropped_samples(&self) -> u64 {
        0
    }
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn read_slice(&mut self, out: &mut [AudioSample]) -> Result<usize, CaptureError> {
        (**self).read_slice(out)
    }

    fn dropped_samples(&self) -> u64 {
        (**self).dropped_samples()
    }
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

/// List available input devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let devices = host
        .input_devices()?
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDevice {
            is_default: name == default_name,
            name,
        })
        .collect();

    Ok(devices)
}

/// Find an input device by exact name, ALSA card address, then substring,
/// or the default one
fn find_device(device_id: &str) -> Result<Device, CaptureError> {
    let host = cpal::default_host();

    if device_id == "default" {
        return host.default_input_device().ok_or(CaptureError::NoDefaultDevice);
    }

    let mut devices: Vec<(Device, String)> = host
        .input_devices()?
        .filter_map(|device| device.name().ok().map(|name| (device, name)))
        .collect();

    let names: Vec<&str> = devices.iter().map(|(_, name)| name.as_str()).collect();
    match match_device_name(&names, device_id, Path::new(ASOUND_PROC)) {
        Some(index) => {
            let (device, name) = devices.swap_remove(index);
            debug!("Matched device {:?} to {:?}", device_id, name);
            Ok(device)
        }
        None => Err(CaptureError::DeviceNotFound(device_id.to_string())),
    }
}

const ASOUND_PROC: &str = "/proc/asound";

/// Index of the device `device_id` refers to
fn match_device_name(names: &[&str], device_id: &str, proc_root: &Path) -> Option<usize> {
    if let Some(index) = names.iter().position(|name| *name == device_id) {
        return Some(index);
    }

    // cpal lists ALSA PCMs by hint name, e.g. `plughw:CARD=Webcam,DEV=0`
    if let Some(address) = AlsaAddress::parse(device_id) {
        if let Some(card_id) = alsa_card_id(proc_root, address.card) {
            let aliases = address.hint_names(&card_id);
            let index = names
                .iter()
                .position(|name| aliases.iter().any(|alias| alias.as_str() == *name));
            if index.is_some() {
                return index;
            }
        }
    }

    names.iter().position(|name| name.contains(device_id))
}

/// Numeric ALSA address such as `plughw:1,0`
#[derive(Debug, Clone, PartialEq, Eq)]
struct AlsaAddress {
    plugin: String,
    card: u32,
    device: u32,
}

impl AlsaAddress {
    /// Parse `<plugin>:<card>[,<device>]`; the device defaults to 0
    fn parse(id: &str) -> Option<Self> {
        let (plugin, rest) = id.split_once(':')?;
        if plugin.is_empty() {
            return None;
        }

        let (card, device) = rest.split_once(',').unwrap_or((rest, "0"));

        Some(Self {
            plugin: plugin.to_string(),
            card: card.trim().parse().ok()?,
            device: device.trim().parse().ok()?,
        })
    }

    /// Hint names this address can appear under for card `card_id`
    fn hint_names(&self, card_id: &str) -> Vec<String> {
        let mut names = vec![format!(
            "{}:CARD={},DEV={}",
            self.plugin, card_id, self.device
        )];
        if self.device == 0 {
            names.push(format!("{}:CARD={}", self.plugin, card_id));
        }
        names
    }
}

/// Short card ID, the bracketed name in `/proc/asound/cards`
fn alsa_card_id(proc_root: &Path, card: u32) -> Option<String> {
    let path = proc_root.join(format!("card{}", card)).join("id");
    let id = std::fs::read_to_string(path).ok()?;
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// State shared with the audio callback thread
struct CaptureShared {
    failed: CachePadded<AtomicBool>,
    dropped: CachePadded<AtomicU64>,
}

/// Capture handle for a mono 16-bit input stream
///
/// Dropping the handle stops the stream and closes the device.
pub struct CpalCapture {
    stream: Stream,
    consumer: HeapCons<AudioSample>,
    device_name: String,
    shared: Arc<CaptureShared>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl CpalCapture {
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    /// Open `device_id` for mono capture at `sample_rate` and start streaming
    ///
    /// `buffer_capacity` is the size of the ring between the callback and
    /// the reader, in samples.
    pub fn open(
        device_id: &str,
        sample_rate: u32,
        buffer_capacity: usize,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, CaptureError> {
        let device = find_device(device_id)?;
        let device_name = device.name().unwrap_or_else(|_| device_id.to_string());

        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "Opening audio device {}: {} Hz, mono, i16, ring of {} samples",
            device_name, sample_rate, buffer_capacity
        );

        let (mut producer, consumer) = HeapRb::<AudioSample>::new(buffer_capacity).split();
        let shared = Arc::new(CaptureShared {
            failed: CachePadded::new(AtomicBool::new(false)),
            dropped: CachePadded::new(AtomicU64::new(0)),
        });

        let data_shared = Arc::clone(&shared);
        let error_shared = Arc::clone(&shared);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[AudioSample], _: &cpal::InputCallbackInfo| {
                    let pushed = producer.push_slice(data);
                    if pushed < data.len() {
                        data_shared
                            .dropped
                            .fetch_add((data.len() - pushed) as u64, Ordering::Relaxed);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_shared.failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|source| CaptureError::Open {
                device: device_name.clone(),
                source,
            })?;

        stream.play().map_err(|source| CaptureError::Start {
            device: device_name.clone(),
            source,
        })?;

        info!("Audio interface {} started", device_name);

        Ok(Self {
            stream,
            consumer,
            device_name,
            shared,
            shutdown,
            poll_interval: Self::POLL_INTERVAL,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl AudioSource for CpalCapture {
    fn read_slice(&mut self, out: &mut [AudioSample]) -> Result<usize, CaptureError> {
        let mut filled = 0;

        loop {
            filled += self.consumer.pop_slice(&mut out[filled..]);
            if filled == out.len() {
                return Ok(filled);
            }

            if self.shared.failed.load(Ordering::Acquire) {
                warn!("Audio stream failed with {} of {} samples read", filled, out.len());
                return Ok(filled);
            }

            if self.shutdown.load(Ordering::Acquire) {
                debug!("Shutdown requested during read");
                return Ok(filled);
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            warn!("Failed to stop audio device {}: {}", self.device_name, e);
        }
        info!("Audio interface {} closed", self.device_name);
    }
}
