/*!
Audio feature extraction.

An [Analyser] keeps a rolling window of the most recent samples and exposes the same byte
snapshots a browser analyser node does: frequency magnitudes mapped from decibels into 0-255
and time-domain samples centered on 128. The [AudioFeatureExtractor] reduces those snapshots
into [AudioFeatures] once per frame.
*/

use std::{cell::RefCell, collections::VecDeque, f32::consts::PI, ops::Range, rc::Rc, sync::Arc};

use log::{debug, info};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::{config::AudioConfig, model::AudioFeatures};

use super::{Receiver, ReceiverError};

/// Midline of the time-domain byte representation.
const MIDLINE: u8 = 128;

/// A live source of mono samples in the -1.0-1.0 range.
pub trait AudioInput: Receiver {
    fn sample_rate(&self) -> u32;

    /// Move every sample captured since the last call into `out`.
    fn drain_into(&mut self, out: &mut Vec<f32>);
}

/// In-memory [AudioInput]. Clones share the same queue, so one handle can be given to the
/// extractor while another keeps pushing samples.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    sample_rate: u32,
    queue: Rc<RefCell<VecDeque<f32>>>,
    running: Rc<RefCell<bool>>,
}

impl SampleBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            queue: Rc::new(RefCell::new(VecDeque::new())),
            running: Rc::new(RefCell::new(false)),
        }
    }

    pub fn push(&self, samples: &[f32]) {
        self.queue.borrow_mut().extend(samples.iter().copied());
    }
}

impl Receiver for SampleBuffer {
    fn start(&mut self) -> Result<(), ReceiverError> {
        *self.running.borrow_mut() = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ReceiverError> {
        let mut running = self.running.borrow_mut();
        if !*running {
            return Err(ReceiverError::NotStarted);
        }

        *running = false;
        self.queue.borrow_mut().clear();

        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }
}

impl AudioInput for SampleBuffer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain_into(&mut self, out: &mut Vec<f32>) {
        if !self.is_running() {
            return;
        }
        out.extend(self.queue.borrow_mut().drain(..));
    }
}

/// Rolling-window spectrum analyser.
pub struct Analyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    sample_rate: u32,
    smoothing_time_constant: f32,
    min_decibels: f32,
    max_decibels: f32,

    window: VecDeque<f32>,
    blackman: Vec<f32>,
    /// Magnitudes from the previous frequency snapshot, used for temporal smoothing.
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl Analyser {
    pub fn new(config: &AudioConfig, sample_rate: u32) -> Self {
        let fft_size = config.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        let blackman = (0..fft_size)
            .map(|i| {
                let x = i as f32 / fft_size as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();

        Self {
            fft,
            fft_size,
            sample_rate,
            smoothing_time_constant: config.smoothing_time_constant.clamp(0.0, 1.0),
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,

            window: VecDeque::from(vec![0.0; fft_size]),
            blackman,
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::default(); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Width of one frequency bin in Hz.
    pub fn bin_width(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Append samples, keeping only the newest `fft_size`.
    pub fn feed(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(self.fft_size);
        for s in &samples[skip..] {
            self.window.pop_front();
            self.window.push_back(*s);
        }
    }

    /// Time-domain snapshot, 128 being silence.
    pub fn time_domain_bytes(&self) -> Vec<u8> {
        self.window
            .iter()
            .map(|s| (MIDLINE as f32 * (1.0 + s)).clamp(0.0, 255.0) as u8)
            .collect()
    }

    /// Frequency snapshot, one byte per bin.
    ///
    /// Each call advances the temporal smoothing by one step.
    pub fn frequency_bytes(&mut self) -> Vec<u8> {
        for (i, (s, w)) in self.window.iter().zip(self.blackman.iter()).enumerate() {
            self.scratch[i] = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let n = self.fft_size as f32;
        let tau = self.smoothing_time_constant;
        let range = self.max_decibels - self.min_decibels;

        self.smoothed
            .iter_mut()
            .zip(self.scratch.iter())
            .map(|(prev, c)| {
                let magnitude = c.norm() / n;
                *prev = tau * *prev + (1.0 - tau) * magnitude;

                if *prev <= 0.0 {
                    return 0;
                }

                let db = 20.0 * prev.log10();
                (255.0 * (db - self.min_decibels) / range).clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Bins whose center frequency falls in `[low_hz, high_hz)`.
    pub fn band(&self, low_hz: f32, high_hz: f32) -> Range<usize> {
        let width = self.bin_width();
        let bins = self.frequency_bin_count();

        let start = ((low_hz / width).ceil() as usize).min(bins);
        let end = ((high_hz / width).ceil() as usize).min(bins);

        start..end.max(start)
    }
}

/// Mean of the bytes in `range`, normalized and clamped to 1.0.
fn band_energy(bytes: &[u8], range: Range<usize>) -> f32 {
    if range.is_empty() {
        return 0.0;
    }

    let len = range.len() as f32;
    let sum = bytes[range].iter().map(|v| *v as f32).sum::<f32>();

    (sum / len / 255.0).min(1.0)
}

fn rms_volume(bytes: &[u8], gain: f32) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }

    let sum = bytes
        .iter()
        .map(|b| {
            let v = (*b as f32 - MIDLINE as f32) / MIDLINE as f32;
            v * v
        })
        .sum::<f32>();

    ((sum / bytes.len() as f32).sqrt() * gain).min(1.0)
}

fn zero_crossing_rate(bytes: &[u8]) -> f32 {
    if bytes.len() < 2 {
        return 0.0;
    }

    let crossings = bytes
        .windows(2)
        .filter(|w| (w[0] >= MIDLINE) != (w[1] >= MIDLINE))
        .count();

    (crossings as f32 / (bytes.len() - 1) as f32).min(1.0)
}

/// Turns a live audio stream into [AudioFeatures].
///
/// Without an attached input every analysis is all zeros.
pub struct AudioFeatureExtractor {
    config: AudioConfig,
    input: Option<Box<dyn AudioInput>>,
    analyser: Option<Analyser>,
    pending: Vec<f32>,
}

impl std::fmt::Debug for AudioFeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFeatureExtractor")
            .field("config", &self.config)
            .field("analyser", &self.analyser)
            .finish()
    }
}

impl AudioFeatureExtractor {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            input: None,
            analyser: None,
            pending: Vec::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.analyser.is_some()
    }

    /// Attach a new input, replacing any previous one.
    ///
    /// The previous input is stopped and dropped before the new one is started so two captures
    /// are never live at once. On failure the extractor is left uninitialized.
    pub fn attach(&mut self, mut input: Box<dyn AudioInput>) -> Result<(), ReceiverError> {
        self.detach();

        input.start()?;

        info!("Audio input attached at {} Hz", input.sample_rate());

        self.analyser = Some(Analyser::new(&self.config, input.sample_rate()));
        self.input = Some(input);

        Ok(())
    }

    /// Stop and release the current input, if any.
    pub fn detach(&mut self) {
        self.analyser = None;

        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.stop() {
                debug!("Audio input was not running while detaching: {e}");
            }
        }
    }

    pub fn analyser(&self) -> Option<&Analyser> {
        self.analyser.as_ref()
    }

    /// Pull whatever the input has produced and summarize the current analysis window.
    pub fn get_detailed_analysis(&mut self) -> AudioFeatures {
        let (Some(input), Some(analyser)) = (self.input.as_mut(), self.analyser.as_mut()) else {
            return AudioFeatures::default();
        };

        self.pending.clear();
        input.drain_into(&mut self.pending);
        analyser.feed(&self.pending);

        let time_domain = analyser.time_domain_bytes();
        let frequency = analyser.frequency_bytes();

        let low = analyser.band(0.0, self.config.low_band_hz);
        let mid = analyser.band(self.config.low_band_hz, self.config.mid_band_hz);
        let high = analyser.band(self.config.mid_band_hz, self.config.high_band_hz);

        AudioFeatures {
            volume: rms_volume(&time_domain, self.config.gain),
            low_freq: band_energy(&frequency, low),
            mid_freq: band_energy(&frequency, mid),
            high_freq: band_energy(&frequency, high),
            zero_crossing_rate: zero_crossing_rate(&time_domain),
        }
    }
}

impl Drop for AudioFeatureExtractor {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
pub(crate) fn tone(frequency: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
        .collect()
}
