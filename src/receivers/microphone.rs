/*!
A receiver for the system microphone, backed by cpal.

Samples are downmixed to mono on the audio thread and queued until the tick loop drains them.
*/

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, info};

use super::{audio::AudioInput, Receiver, ReceiverError};

/// At most one second of audio is kept if nobody drains the queue.
const MAX_QUEUED_SECONDS: usize = 1;

pub struct Microphone {
    /// `None` selects the host default.
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    sample_rate: u32,
}

impl std::fmt::Debug for Microphone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microphone")
            .field("device_name", &self.device_name)
            .field("running", &self.stream.is_some())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Names of every input device the default host can see.
pub fn list_devices() -> Result<Vec<String>, ReceiverError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| ReceiverError::Enumeration(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

impl Microphone {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            sample_rate: 0,
        }
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Switch to another device. The current stream is dropped before the new one is built.
    pub fn select_device(&mut self, device_name: Option<String>) -> Result<(), ReceiverError> {
        if self.is_running() {
            self.stop()?;
        }
        self.device_name = device_name;

        self.start()
    }

    fn find_device(&self) -> Result<cpal::Device, ReceiverError> {
        let host = cpal::default_host();

        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| ReceiverError::Enumeration(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| ReceiverError::DeviceNotFound(name.clone())),
            None => host
                .default_input_device()
                .ok_or_else(|| ReceiverError::DeviceNotFound("default".into())),
        }
    }
}

impl Receiver for Microphone {
    fn start(&mut self) -> Result<(), ReceiverError> {
        if self.stream.is_some() {
            debug!("Microphone already running");
            return Ok(());
        }

        let device = self.find_device()?;
        let supported = device
            .default_input_config()
            .map_err(|e| ReceiverError::Stream(e.to_string()))?;

        let channels = supported.channels().max(1) as usize;
        let sample_rate = supported.sample_rate().0;
        let max_queued = sample_rate as usize * MAX_QUEUED_SECONDS;

        let queue = self.queue.clone();
        let stream = device
            .build_input_stream(
                &supported.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let Ok(mut queue) = queue.lock() else {
                        return;
                    };
                    for frame in data.chunks(channels) {
                        queue.push_back(frame.iter().sum::<f32>() / frame.len() as f32);
                    }
                    let overflow = queue.len().saturating_sub(max_queued);
                    queue.drain(..overflow);
                },
                |e| error!("Error in microphone stream: {e}"),
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    ReceiverError::PermissionDenied(e.to_string())
                }
                e => ReceiverError::Stream(e.to_string()),
            })?;
        stream
            .play()
            .map_err(|e| ReceiverError::Stream(e.to_string()))?;

        info!(
            "Microphone started: {} at {sample_rate} Hz",
            self.device_name.as_deref().unwrap_or("default")
        );

        self.sample_rate = sample_rate;
        self.stream = Some(stream);

        Ok(())
    }

    fn stop(&mut self) -> Result<(), ReceiverError> {
        let Some(stream) = self.stream.take() else {
            return Err(ReceiverError::NotStarted);
        };
        // Dropping the stream releases the device
        drop(stream);

        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }

        info!("Microphone stopped");

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl AudioInput for Microphone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain_into(&mut self, out: &mut Vec<f32>) {
        if let Ok(mut queue) = self.queue.lock() {
            out.extend(queue.drain(..));
        }
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        let _ = self.stream.take();
    }
}
