/*!
Per-frame smoothing and FPS accounting between the aggregator and the puppets.
*/

use std::time::{Duration, Instant};

use log::debug;

use crate::{
    config::SmoothingConfig,
    model::{tracking_data::lerp, AvatarState, Eyebrows, Eyes, Mouth, MouthShape},
    puppets::Puppet,
};

/// Counts frames over one second windows.
#[derive(Debug, Default, Clone)]
pub struct FpsCounter {
    window_start: Option<Instant>,
    frames: u32,
    fps: Option<u32>,
}

impl FpsCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::default()
    }

    /// Count a frame. Returns the new rate whenever a window closes.
    ///
    /// The frame that opens a window is not counted in it, so the rate is frame intervals per
    /// second.
    pub fn frame(&mut self, now: Instant) -> Option<u32> {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return None;
        };
        self.frames += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed < Self::WINDOW {
            return None;
        }

        let fps = (self.frames as f32 / elapsed.as_secs_f32()).round() as u32;
        self.fps = Some(fps);
        self.frames = 0;
        self.window_start = Some(now);

        Some(fps)
    }

    /// Rate of the last completed window.
    pub fn fps(&self) -> Option<u32> {
        self.fps
    }
}

/// Low-pass filter `target` towards `current`, channel by channel. Discrete values are taken
/// from `target` as-is.
pub fn smooth(current: &AvatarState, target: &AvatarState, factors: &SmoothingConfig) -> AvatarState {
    let openness = lerp(current.mouth.openness, target.mouth.openness, factors.mouth);

    AvatarState {
        rotation: current.rotation.lerp(&target.rotation, factors.rotation),
        mouth: Mouth {
            openness,
            shape: MouthShape::from_openness(openness),
        },
        eyes: Eyes {
            left_open: lerp(current.eyes.left_open, target.eyes.left_open, factors.eyes),
            right_open: lerp(current.eyes.right_open, target.eyes.right_open, factors.eyes),
            blink: target.eyes.blink,
        },
        eyebrows: Eyebrows {
            left: lerp(current.eyebrows.left, target.eyebrows.left, factors.eyebrows),
            right: lerp(current.eyebrows.right, target.eyebrows.right, factors.eyebrows),
        },
        position: target.position,
        viseme: target.viseme,
        emotion: target.emotion,
        volume: target.volume,
    }
}

#[derive(Debug)]
pub struct RenderLoop {
    smoothing: SmoothingConfig,
    display: Option<AvatarState>,
    fps: FpsCounter,
    frames: u64,
}

impl RenderLoop {
    pub fn new(smoothing: SmoothingConfig) -> Self {
        Self {
            smoothing,
            display: None,
            fps: FpsCounter::new(),
            frames: 0,
        }
    }

    /// The last state handed to a puppet.
    pub fn display_state(&self) -> Option<&AvatarState> {
        self.display.as_ref()
    }

    pub fn fps(&self) -> Option<u32> {
        self.fps.fps()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Smooth `raw` and hand it to `puppet`. The first frame is used unsmoothed.
    pub fn tick(&mut self, raw: &AvatarState, puppet: &mut dyn Puppet, now: Instant) -> AvatarState {
        let display = match &self.display {
            Some(current) => smooth(current, raw, &self.smoothing),
            None => *raw,
        };
        self.display = Some(display);
        self.frames += 1;

        if let Some(fps) = self.fps.frame(now) {
            debug!("Rendering at {fps} fps");
        }

        puppet.visit(&display);

        display
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Emotion, Rotation, Viseme, VisemeState};

    #[derive(Default)]
    struct Recorder(Vec<AvatarState>);

    impl Puppet for Recorder {
        fn visit(&mut self, state: &AvatarState) {
            self.0.push(*state);
        }
    }

    #[test]
    fn fps_over_one_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new();

        let mut reported = None;
        for i in 0..=60u32 {
            if let Some(fps) = counter.frame(start + Duration::from_millis(i as u64 * 1000 / 60)) {
                reported = Some(fps);
            }
        }

        assert_eq!(reported, Some(60));
        assert_eq!(counter.fps(), Some(60));
    }

    #[test]
    fn steady_rate_across_windows() {
        let start = Instant::now();
        let mut counter = FpsCounter::new();

        let reported = (0..=90u64)
            .filter_map(|i| counter.frame(start + Duration::from_millis(i * 1000 / 30)))
            .collect::<Vec<_>>();

        assert_eq!(reported, vec![30, 30, 30]);
    }

    #[test]
    fn no_fps_before_window_closes() {
        let start = Instant::now();
        let mut counter = FpsCounter::new();

        assert_eq!(counter.frame(start), None);
        assert_eq!(counter.frame(start + Duration::from_millis(500)), None);
        assert_eq!(counter.fps(), None);
    }

    #[test]
    fn per_channel_factors() {
        let current = AvatarState::default();
        let mut target = AvatarState {
            rotation: Rotation::new(1.0, 1.0, 1.0),
            emotion: Emotion::Happy,
            viseme: Some(VisemeState {
                current: Viseme::O,
                ..Default::default()
            }),
            ..Default::default()
        };
        target.mouth.openness = 1.0;
        target.eyes.left_open = 0.0;
        target.eyes.blink = true;
        target.eyebrows.right = 1.0;

        let out = smooth(&current, &target, &SmoothingConfig::default());

        assert!((out.rotation.x - 0.15).abs() < 1e-6);
        assert!((out.mouth.openness - 0.3).abs() < 1e-6);
        assert_eq!(out.mouth.shape, MouthShape::Open);
        assert!((out.eyes.left_open - 0.8).abs() < 1e-6);
        assert!((out.eyebrows.right - 0.2).abs() < 1e-6);

        // Discrete channels are not smoothed
        assert!(out.eyes.blink);
        assert_eq!(out.emotion, Emotion::Happy);
        assert_eq!(out.viseme.unwrap().current, Viseme::O);
    }

    #[test]
    fn converges() {
        let mut render_loop = RenderLoop::new(SmoothingConfig::default());
        let mut puppet = Recorder::default();
        let start = Instant::now();

        render_loop.tick(&AvatarState::default(), &mut puppet, start);

        let target = AvatarState {
            rotation: Rotation::new(0.5, -0.5, 0.2),
            ..Default::default()
        };
        for i in 1..200u64 {
            render_loop.tick(&target, &mut puppet, start + Duration::from_millis(i * 16));
        }

        let last = puppet.0.last().unwrap();
        assert!((last.rotation.x - 0.5).abs() < 1e-3);
        assert!((last.rotation.y + 0.5).abs() < 1e-3);
        assert_eq!(puppet.0.len(), 200);
        assert_eq!(render_loop.frames(), 200);
        assert!(render_loop.fps().is_some());
    }

    #[test]
    fn first_frame_is_unsmoothed() {
        let mut render_loop = RenderLoop::new(SmoothingConfig::default());
        let mut puppet = Recorder::default();
        let raw = AvatarState {
            rotation: Rotation::new(0.3, 0.0, 0.0),
            ..Default::default()
        };

        let out = render_loop.tick(&raw, &mut puppet, Instant::now());
        assert_eq!(out, raw);
    }
}
