use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Discrete mouth shapes used for lip sync.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Viseme {
    /// Mouth at rest.
    #[default]
    Rest,
    /// Open, as in "father".
    Aa,
    /// Spread, as in "see".
    E,
    /// Round and open, as in "boat".
    O,
    /// Round and nearly closed, as in "boot".
    U,
    /// Lower lip against the teeth.
    Fv,
    /// Lips pressed together.
    Mbp,
}

impl Viseme {
    pub const ALL: [Viseme; 7] = [
        Viseme::Rest,
        Viseme::Aa,
        Viseme::E,
        Viseme::O,
        Viseme::U,
        Viseme::Fv,
        Viseme::Mbp,
    ];
}

impl AsRef<str> for Viseme {
    fn as_ref(&self) -> &str {
        match self {
            Viseme::Rest => "REST",
            Viseme::Aa => "AA",
            Viseme::E => "E",
            Viseme::O => "O",
            Viseme::U => "U",
            Viseme::Fv => "FV",
            Viseme::Mbp => "MBP",
        }
    }
}

impl Display for Viseme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Snapshot of the viseme engine.
///
/// `previous` only ever changes together with `current`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeState {
    pub current: Viseme,
    pub previous: Viseme,
    /// Eased 0.0-1.0.
    pub transition_progress: f32,
    /// 0.0-1.0
    pub intensity: f32,
}

impl Default for VisemeState {
    fn default() -> Self {
        Self {
            current: Viseme::Rest,
            previous: Viseme::Rest,
            transition_progress: 1.0,
            intensity: 0.0,
        }
    }
}

/// Per-frame audio summary, every field normalized to 0.0-1.0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub volume: f32,
    pub low_freq: f32,
    pub mid_freq: f32,
    pub high_freq: f32,
    pub zero_crossing_rate: f32,
}
