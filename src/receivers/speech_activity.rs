/*!
A coarse "someone is talking" signal from a continuous speech recognizer.

The recognizer itself is a [RecognitionBackend]. Platforms without one simply never attach a
backend and the signal stays false.
*/

use std::{
    f32::consts::TAU,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    config::SpeechConfig,
    model::{Viseme, VisemeState},
};

use super::{Receiver, ReceiverError};

/// A recognizer session that ends on its own every now and then. The owner is notified
/// through [SpeechActivity::on_end] and [SpeechActivity::on_error] and restarts it.
pub trait RecognitionBackend: Receiver {
    fn name(&self) -> &str;
}

pub struct SpeechActivity {
    config: SpeechConfig,
    backend: Option<Box<dyn RecognitionBackend>>,
    last_result: Option<Instant>,
    restarts: u64,
}

impl std::fmt::Debug for SpeechActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechActivity")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("last_result", &self.last_result)
            .field("restarts", &self.restarts)
            .finish()
    }
}

impl SpeechActivity {
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            config,
            backend: None,
            last_result: None,
            restarts: 0,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_some()
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Attach and start a recognizer. A previous backend is stopped first.
    pub fn attach(&mut self, mut backend: Box<dyn RecognitionBackend>) -> Result<(), ReceiverError> {
        self.detach();

        backend.start()?;
        debug!("Speech recognizer {} started", backend.name());

        self.backend = Some(backend);

        Ok(())
    }

    pub fn detach(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if let Err(e) = backend.stop() {
                debug!("Stopping speech recognizer {}: {e}", backend.name());
            }
        }
        self.last_result = None;
    }

    /// The recognizer heard something, final or interim.
    pub fn on_result(&mut self, now: Instant) {
        if self.backend.is_some() {
            self.last_result = Some(now);
        }
    }

    /// The recognizer session ended on its own.
    pub fn on_end(&mut self) {
        self.restart();
    }

    /// The recognizer reported an error. It is logged and the session restarted.
    pub fn on_error(&mut self, error: &str) {
        warn!("Speech recognizer error: {error}");
        self.restart();
    }

    fn restart(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        if backend.is_running() {
            if let Err(e) = backend.stop() {
                debug!("Stopping speech recognizer {}: {e}", backend.name());
            }
        }
        match backend.start() {
            Ok(_) => self.restarts += 1,
            Err(e) => warn!("Unable to restart speech recognizer {}: {e}", backend.name()),
        }
    }

    /// Whether a recognition event arrived within the decay window before `now`.
    pub fn is_speaking_at(&self, now: Instant) -> bool {
        if self.backend.is_none() {
            return false;
        }

        match self.last_result {
            Some(last) => {
                now.saturating_duration_since(last) < Duration::from_millis(self.config.decay_ms)
            }
            None => false,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking_at(Instant::now())
    }
}

/// Alternating FV/O mouth used while speech is heard but too quiet to classify. The oscillation
/// is free-running, `elapsed` is measured from any fixed point in time.
pub fn filler_viseme(config: &SpeechConfig, elapsed: Duration) -> VisemeState {
    let period = Duration::from_millis(config.filler_period_ms.max(1));
    let phase = elapsed.as_secs_f32() / period.as_secs_f32();

    let current = if (TAU * phase).sin() >= 0.0 {
        Viseme::Fv
    } else {
        Viseme::O
    };

    VisemeState {
        current,
        previous: current,
        transition_progress: 1.0,
        intensity: config.filler_intensity,
    }
}

impl Drop for SpeechActivity {
    fn drop(&mut self) {
        self.detach();
    }
}
