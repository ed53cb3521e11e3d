/*!
Amplitude based lip sync.

Audio features are classified into one of seven visemes by an ordered decision list. A
candidate is only adopted after the current viseme has been held for a minimum number of
calls, and every adoption starts an eased transition that renderers can use to crossfade.
*/

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use log::trace;

use crate::{
    config::VisemeConfig,
    model::{AudioFeatures, Viseme, VisemeState},
};

/// Cubic ease-in-out over 0.0-1.0.
pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// First matching rule wins. The order encodes priority and must not change.
pub fn classify(features: &AudioFeatures, volume_change: f32, silence_threshold: f32) -> Viseme {
    let AudioFeatures {
        volume,
        low_freq,
        mid_freq,
        high_freq,
        zero_crossing_rate: zcr,
    } = *features;

    if volume < silence_threshold {
        // Silence
        Viseme::Rest
    } else if volume_change > 0.15 && low_freq > 0.3 && zcr < 0.1 {
        // Plosive, a sudden bassy burst
        Viseme::Mbp
    } else if zcr > 0.3 && high_freq > 0.2 {
        // Fricative
        Viseme::Fv
    } else if volume > 0.3 && low_freq > 0.4 && zcr < 0.15 {
        Viseme::Aa
    } else if volume > 0.2 && mid_freq > low_freq && low_freq > 0.2 {
        Viseme::O
    } else if volume < 0.3 && mid_freq > high_freq && mid_freq > 0.15 {
        Viseme::U
    } else if high_freq > 0.15 && volume > 0.1 {
        Viseme::E
    } else if volume > silence_threshold {
        Viseme::Aa
    } else {
        Viseme::Rest
    }
}

/// Owns the current viseme, its hold counter and the transition timer.
#[derive(Debug)]
pub struct VisemeEngine {
    config: VisemeConfig,

    current: Viseme,
    previous: Viseme,
    /// Calls since the last adopted change.
    frames_held: u32,
    transition_started: Option<Instant>,
    intensity: f32,

    volume_history: VecDeque<f32>,
}

impl VisemeEngine {
    pub fn new(config: VisemeConfig) -> Self {
        let history_len = config.history_len.max(1);

        Self {
            config,

            current: Viseme::Rest,
            previous: Viseme::Rest,
            frames_held: 0,
            transition_started: None,
            intensity: 0.0,

            volume_history: VecDeque::with_capacity(history_len),
        }
    }

    pub fn current(&self) -> Viseme {
        self.current
    }

    /// Classify `features` using the wall clock for the transition timer.
    pub fn determine_viseme(&mut self, features: &AudioFeatures) -> VisemeState {
        self.determine_viseme_at(features, Instant::now())
    }

    /// Classify `features` as of `now`. `now` must not go backwards between calls.
    pub fn determine_viseme_at(&mut self, features: &AudioFeatures, now: Instant) -> VisemeState {
        let volume = features.volume;

        self.volume_history.push_back(volume);
        while self.volume_history.len() > self.config.history_len.max(1) {
            self.volume_history.pop_front();
        }
        let average =
            self.volume_history.iter().sum::<f32>() / self.volume_history.len() as f32;
        let volume_change = volume - average;

        let candidate = classify(features, volume_change, self.config.silence_threshold);

        self.frames_held = self.frames_held.saturating_add(1);
        if candidate != self.current && self.frames_held >= self.config.min_hold_frames {
            trace!("Viseme {} -> {candidate}", self.current);

            self.previous = self.current;
            self.current = candidate;
            self.frames_held = 0;
            self.transition_started = Some(now);
        }

        self.intensity = (volume * self.config.intensity_gain).min(1.0);

        self.state_at(now)
    }

    /// Current state without feeding new audio.
    pub fn state_at(&self, now: Instant) -> VisemeState {
        VisemeState {
            current: self.current,
            previous: self.previous,
            transition_progress: self.progress_at(now),
            intensity: self.intensity,
        }
    }

    fn progress_at(&self, now: Instant) -> f32 {
        let Some(started) = self.transition_started else {
            return 1.0;
        };

        let window = Duration::from_millis(self.config.transition_ms);
        if window.is_zero() {
            return 1.0;
        }

        let elapsed = now.saturating_duration_since(started);
        ease_in_out_cubic(elapsed.as_secs_f32() / window.as_secs_f32())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn features(volume: f32, low: f32, mid: f32, high: f32, zcr: f32) -> AudioFeatures {
        AudioFeatures {
            volume,
            low_freq: low,
            mid_freq: mid,
            high_freq: high,
            zero_crossing_rate: zcr,
        }
    }

    fn engine() -> VisemeEngine {
        VisemeEngine::new(VisemeConfig::default())
    }

    #[test]
    fn easing() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
        assert!((ease_in_out_cubic(0.5) - 0.5).abs() < 1e-6);
        // arrives early, leaves late
        assert!(ease_in_out_cubic(0.25) < 0.25);
        assert!(ease_in_out_cubic(0.75) > 0.75);
    }

    mod classify {
        use super::*;

        #[test]
        fn silence() {
            assert_eq!(classify(&features(0.04, 1.0, 1.0, 1.0, 0.0), 0.5, 0.05), Viseme::Rest);
        }

        #[test]
        fn plosive_beats_open() {
            let f = features(0.6, 0.8, 0.1, 0.0, 0.05);

            assert_eq!(classify(&f, 0.2, 0.05), Viseme::Mbp);
            assert_eq!(classify(&f, 0.0, 0.05), Viseme::Aa);
        }

        #[test]
        fn fricative() {
            assert_eq!(classify(&features(0.3, 0.1, 0.1, 0.4, 0.5), 0.0, 0.05), Viseme::Fv);
        }

        #[test]
        fn round_open() {
            assert_eq!(classify(&features(0.4, 0.3, 0.5, 0.1, 0.2), 0.0, 0.05), Viseme::O);
        }

        #[test]
        fn round_closed() {
            assert_eq!(classify(&features(0.15, 0.1, 0.3, 0.1, 0.2), 0.0, 0.05), Viseme::U);
        }

        #[test]
        fn spread() {
            assert_eq!(classify(&features(0.35, 0.1, 0.1, 0.3, 0.2), 0.0, 0.05), Viseme::E);
        }

        #[test]
        fn residual_audible_is_open() {
            assert_eq!(classify(&features(0.08, 0.0, 0.0, 0.0, 0.2), 0.0, 0.05), Viseme::Aa);
        }
    }

    #[test]
    fn loud_bassy_voice_settles_on_aa() {
        let mut engine = engine();
        let start = Instant::now();
        let f = features(0.7, 0.8, 0.2, 0.1, 0.1);

        let first = engine.determine_viseme_at(&f, start);
        assert_eq!(first.current, Viseme::Rest);

        let second = engine.determine_viseme_at(&f, start + Duration::from_millis(16));
        assert_eq!(second.current, Viseme::Aa);
        assert_eq!(second.previous, Viseme::Rest);
        assert_eq!(second.transition_progress, 0.0);
        assert_eq!(second.intensity, 1.0);
    }

    #[test]
    fn silence_always_rests() {
        let mut engine = engine();
        let start = Instant::now();

        for _ in 0..3 {
            engine.determine_viseme_at(&features(0.7, 0.8, 0.2, 0.1, 0.1), start);
        }
        assert_eq!(engine.current(), Viseme::Aa);

        let mut state = engine.state_at(start);
        for i in 0..3 {
            state = engine.determine_viseme_at(
                &features(0.01, 0.9, 0.9, 0.9, 0.9),
                start + Duration::from_millis(i * 16),
            );
        }
        assert_eq!(state.current, Viseme::Rest);
        assert!(state.intensity < 0.02);
    }

    #[test]
    fn transition_completes_after_window() {
        let mut engine = engine();
        let start = Instant::now();
        let f = features(0.7, 0.8, 0.2, 0.1, 0.1);

        engine.determine_viseme_at(&f, start);
        engine.determine_viseme_at(&f, start);

        let half = engine.state_at(start + Duration::from_millis(50));
        assert!((half.transition_progress - 0.5).abs() < 1e-3);

        let done = engine.state_at(start + Duration::from_millis(150));
        assert_eq!(done.transition_progress, 1.0);
    }

    fn arb_features() -> impl Strategy<Value = AudioFeatures> {
        (0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0)
            .prop_map(|(v, l, m, h, z)| features(v, l, m, h, z))
    }

    proptest! {
        #[test]
        fn hold_invariant(seq in proptest::collection::vec(arb_features(), 1..80)) {
            let mut engine = engine();
            let start = Instant::now();
            let mut last = engine.state_at(start);
            let mut calls_since_change = 0u32;

            for (i, f) in seq.iter().enumerate() {
                let state = engine.determine_viseme_at(f, start + Duration::from_millis(i as u64 * 16));
                calls_since_change += 1;

                if state.current != last.current {
                    prop_assert!(calls_since_change >= 2);
                    prop_assert_eq!(state.previous, last.current);
                    calls_since_change = 0;
                } else {
                    prop_assert_eq!(state.previous, last.previous);
                }
                last = state;
            }
        }

        #[test]
        fn progress_monotonic_between_changes(seq in proptest::collection::vec(arb_features(), 1..80)) {
            let mut engine = engine();
            let start = Instant::now();
            let mut last = engine.state_at(start);

            for (i, f) in seq.iter().enumerate() {
                let state = engine.determine_viseme_at(f, start + Duration::from_millis(i as u64 * 10));

                if state.current != last.current {
                    prop_assert_eq!(state.transition_progress, 0.0);
                } else {
                    prop_assert!(state.transition_progress >= last.transition_progress);
                }
                last = state;
            }
        }

        #[test]
        fn quiet_input_rests_after_hold(volume in 0.0f32..0.05, rest in arb_features()) {
            let mut engine = engine();
            let f = AudioFeatures { volume, ..rest };
            let now = Instant::now();

            let mut state = engine.determine_viseme_at(&f, now);
            for _ in 0..2 {
                state = engine.determine_viseme_at(&f, now);
            }
            prop_assert_eq!(state.current, Viseme::Rest);
        }
    }
}
