use std::collections::VecDeque;

use log::LevelFilter;
use serde::Serialize;

use crate::model::Viseme;

/// Number of messages kept by a [DiagnosticStore].
const MAX_MESSAGES: usize = 100;

/// Map the CLI switches to a level. Quiet wins over verbose.
pub fn level_for(verbose: bool, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Off
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Initialize the global logger. `RUST_LOG` still takes precedence over `level`.
///
/// Calling this more than once is harmless, later calls are ignored.
pub fn init(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// Latest readouts for an on-screen debug panel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct Readout {
    pub volume: f32,
    pub viseme: Option<Viseme>,
    pub fps: Option<u32>,
}

/// Debug values and recent messages of one session.
#[derive(Debug, Default)]
pub struct DiagnosticStore {
    readout: Readout,
    messages: VecDeque<String>,
}

impl DiagnosticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readout(&self) -> Readout {
        self.readout
    }

    pub fn record_audio(&mut self, volume: f32, viseme: Option<Viseme>) {
        self.readout.volume = volume;
        self.readout.viseme = viseme;
    }

    pub fn record_fps(&mut self, fps: u32) {
        self.readout.fps = Some(fps);
    }

    /// Keep a message for display, dropping the oldest once full.
    pub fn push(&mut self, message: impl Into<String>) {
        if self.messages.len() == MAX_MESSAGES {
            self.messages.pop_front();
        }
        self.messages.push_back(message.into());
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }
}
