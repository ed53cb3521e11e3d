/*!
One running avatar: every stateful component of the pipeline, owned together.

A [Session] can record its inputs into a [Recording]. Replaying a recording feeds the exact same
inputs with the recorded timestamps, so the output is reproducible.
*/

use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    aggregator::{Aggregator, FeatureSource},
    config::PipelineConfig,
    logger::DiagnosticStore,
    model::{AudioFeatures, AvatarState, Emotion, FaceState, Landmark, Viseme},
    puppets::Puppet,
    receivers::{
        audio::AudioFeatureExtractor, landmarks::LandmarkInterpreter,
        speech_activity::SpeechActivity,
    },
    render_loop::RenderLoop,
};

#[derive(Debug)]
pub enum SessionError {
    Io { path: PathBuf, error: std::io::Error },
    Parse { path: PathBuf, error: serde_json::Error },
    Serialize(serde_json::Error),
    NotRecording,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, error } => write!(f, "Unable to access {}: {error}", path.display()),
            Self::Parse { path, error } => {
                write!(f, "Unable to parse recording {}: {error}", path.display())
            }
            Self::Serialize(e) => write!(f, "Unable to serialize recording: {e}"),
            Self::NotRecording => write!(f, "Session is not recording"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Inputs of one tick and what came out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    /// Milliseconds since the recording started.
    pub t_ms: u64,
    /// `None` when no face was detected since the previous tick.
    #[serde(default)]
    pub landmarks: Option<Vec<Landmark>>,
    /// `None` when no audio input was attached.
    #[serde(default)]
    pub audio: Option<AudioFeatures>,
    #[serde(default)]
    pub speaking: bool,
    #[serde(default)]
    pub emotion: Emotion,
    /// Display state produced live, kept for comparison.
    #[serde(default)]
    pub output: Option<AvatarState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub started_at: DateTime<Utc>,
    pub frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            frames: vec![],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|error| SessionError::Io {
            path: path.to_path_buf(),
            error,
        })?;

        serde_json::from_slice(&data).map_err(|error| SessionError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let data = serde_json::to_vec_pretty(self).map_err(SessionError::Serialize)?;

        std::fs::write(path, data).map_err(|error| SessionError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        info!("Saved {} frames to {}", self.frames.len(), path.display());

        Ok(())
    }

    /// `avatar-session-<timestamp>.json`
    pub fn default_file_name(&self) -> String {
        format!(
            "avatar-session-{}.json",
            self.started_at.format("%Y%m%d-%H%M%S")
        )
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.frames.last().map(|f| f.t_ms).unwrap_or(0))
    }
}

/// Remembers what a [FeatureSource] returned.
struct Tap<'a> {
    inner: &'a mut dyn FeatureSource,
    last: Option<AudioFeatures>,
}

impl FeatureSource for Tap<'_> {
    fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    fn features(&mut self) -> AudioFeatures {
        let features = self.inner.features();
        self.last = Some(features);

        features
    }
}

#[derive(Debug)]
struct Recorder {
    recording: Recording,
    start: Instant,
}

#[derive(Debug)]
pub struct Session {
    interpreter: LandmarkInterpreter,
    extractor: AudioFeatureExtractor,
    speech: SpeechActivity,
    aggregator: Aggregator,
    render_loop: RenderLoop,
    diagnostics: DiagnosticStore,

    /// Landmarks received since the last tick, only kept while recording.
    pending_landmarks: Option<Vec<Landmark>>,
    recorder: Option<Recorder>,
}

impl Session {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_epoch(config, Instant::now())
    }

    pub fn with_epoch(config: &PipelineConfig, epoch: Instant) -> Self {
        Self {
            interpreter: LandmarkInterpreter::new(),
            extractor: AudioFeatureExtractor::new(config.audio.clone()),
            speech: SpeechActivity::new(config.speech.clone()),
            aggregator: Aggregator::with_epoch(config, epoch),
            render_loop: RenderLoop::new(config.smoothing.clone()),
            diagnostics: DiagnosticStore::new(),

            pending_landmarks: None,
            recorder: None,
        }
    }

    pub fn extractor_mut(&mut self) -> &mut AudioFeatureExtractor {
        &mut self.extractor
    }

    pub fn speech_mut(&mut self) -> &mut SpeechActivity {
        &mut self.speech
    }

    pub fn set_emotion(&mut self, emotion: Emotion) {
        self.aggregator.set_emotion(emotion);
    }

    pub fn diagnostics(&self) -> &DiagnosticStore {
        &self.diagnostics
    }

    pub fn render_loop(&self) -> &RenderLoop {
        &self.render_loop
    }

    pub fn face_state(&self) -> FaceState {
        self.interpreter.face_state()
    }

    /// Feed one camera frame worth of landmarks. Frames without a face are simply not passed in.
    pub fn on_landmarks(&mut self, landmarks: &[Landmark]) {
        if self.interpreter.interpret(landmarks).is_none() {
            self.diagnostics
                .push(format!("Ignored face with {} landmarks", landmarks.len()));
            return;
        }
        if self.recorder.is_some() {
            self.pending_landmarks = Some(landmarks.to_vec());
        }
    }

    /// One display frame with live sources.
    pub fn tick(&mut self, puppet: &mut dyn Puppet, now: Instant) -> AvatarState {
        let speaking = self.speech.is_speaking_at(now);
        let face = self.interpreter.face_state();

        let mut tap = Tap {
            inner: &mut self.extractor,
            last: None,
        };
        let raw = self
            .aggregator
            .tick(&face, &mut tap, speaking, &mut self.diagnostics, now);
        let features = tap.last;

        let display = self.render(&raw, puppet, now);

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.recording.frames.push(RecordedFrame {
                t_ms: now.saturating_duration_since(recorder.start).as_millis() as u64,
                landmarks: self.pending_landmarks.take(),
                audio: features,
                speaking,
                emotion: self.aggregator.emotion(),
                output: Some(display),
            });
        }

        display
    }

    fn render(&mut self, raw: &AvatarState, puppet: &mut dyn Puppet, now: Instant) -> AvatarState {
        let display = self.render_loop.tick(raw, puppet, now);
        if let Some(fps) = self.render_loop.fps() {
            self.diagnostics.record_fps(fps);
        }

        display
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn start_recording(&mut self, now: Instant) {
        debug!("Recording started");

        self.pending_landmarks = None;
        self.recorder = Some(Recorder {
            recording: Recording::new(Utc::now()),
            start: now,
        });
    }

    pub fn stop_recording(&mut self) -> Result<Recording, SessionError> {
        let recorder = self.recorder.take().ok_or(SessionError::NotRecording)?;
        self.pending_landmarks = None;
        debug!("Recording stopped after {} frames", recorder.recording.frames.len());

        Ok(recorder.recording)
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub visemes: BTreeMap<Viseme, usize>,
    pub fps: Option<u32>,
    pub states: Vec<AvatarState>,
}

/// Run a recording through a fresh session.
pub fn replay(recording: &Recording, config: &PipelineConfig, puppet: &mut dyn Puppet) -> ReplaySummary {
    let base = Instant::now();
    let mut session = Session::with_epoch(config, base);
    let mut summary = ReplaySummary::default();

    for frame in &recording.frames {
        let now = base + Duration::from_millis(frame.t_ms);

        if let Some(landmarks) = frame.landmarks.as_deref() {
            session.interpreter.interpret(landmarks);
        }
        session.aggregator.set_emotion(frame.emotion);

        let face = session.interpreter.face_state();
        let mut source = frame.audio;
        let raw = session.aggregator.tick(
            &face,
            &mut source,
            frame.speaking,
            &mut session.diagnostics,
            now,
        );
        let display = session.render(&raw, puppet, now);

        if let Some(viseme) = display.viseme {
            *summary.visemes.entry(viseme.current).or_default() += 1;
        }
        summary.states.push(display);
    }

    summary.frames = summary.states.len();
    summary.fps = session.render_loop.fps();

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{puppets::puppet_2d::Puppet2d, receivers::landmarks::tests::neutral_face};

    struct Discard;

    impl Puppet for Discard {
        fn visit(&mut self, _state: &AvatarState) {}
    }

    fn loud() -> AudioFeatures {
        AudioFeatures {
            volume: 0.7,
            low_freq: 0.8,
            mid_freq: 0.2,
            high_freq: 0.1,
            zero_crossing_rate: 0.1,
        }
    }

    fn recording() -> Recording {
        let mut recording = Recording::new(Utc::now());
        for i in 0..90u64 {
            recording.frames.push(RecordedFrame {
                t_ms: i * 16,
                landmarks: (i % 3 == 0).then(neutral_face),
                audio: Some(if i < 60 { loud() } else { AudioFeatures::default() }),
                speaking: false,
                emotion: Emotion::Happy,
                output: None,
            });
        }

        recording
    }

    #[test]
    fn replay_is_deterministic() {
        let recording = recording();
        let config = PipelineConfig::default();

        let a = replay(&recording, &config, &mut Discard);
        let b = replay(&recording, &config, &mut Discard);

        assert_eq!(a.frames, 90);
        assert_eq!(a.states, b.states);
        assert_eq!(a.visemes, b.visemes);
        assert!(a.visemes.get(&Viseme::Aa).copied().unwrap_or(0) > 50);
        assert!(a.visemes.get(&Viseme::Rest).copied().unwrap_or(0) > 20);
        assert!(a.states.iter().all(|s| s.emotion == Emotion::Happy));
        assert!(a.fps.is_some());
    }

    #[test]
    fn replay_drives_puppet() {
        let mut puppet = Puppet2d::new(Default::default(), 320.0, 240.0);
        let summary = replay(&recording(), &PipelineConfig::default(), &mut puppet);

        assert_eq!(puppet.state(), summary.states.last().unwrap());
    }

    #[test]
    fn record_then_replay() {
        let start = Instant::now();
        let config = PipelineConfig::default();
        let mut session = Session::with_epoch(&config, start);

        assert!(matches!(session.stop_recording(), Err(SessionError::NotRecording)));

        session.set_emotion(Emotion::Sad);
        session.start_recording(start);
        for i in 0..10u64 {
            if i % 2 == 0 {
                session.on_landmarks(&neutral_face());
            }
            session.tick(&mut Discard, start + Duration::from_millis(i * 16));
        }
        let recording = session.stop_recording().unwrap();

        assert!(!session.is_recording());
        assert_eq!(recording.frames.len(), 10);
        assert_eq!(recording.frames[3].t_ms, 48);
        assert!(recording.frames[0].landmarks.is_some());
        assert!(recording.frames[1].landmarks.is_none());
        // No microphone attached, so there is no audio and no viseme
        assert!(recording.frames.iter().all(|f| f.audio.is_none()));
        assert!(recording
            .frames
            .iter()
            .all(|f| f.output.is_some_and(|o| o.viseme.is_none())));

        let summary = replay(&recording, &config, &mut Discard);
        let live = recording
            .frames
            .iter()
            .filter_map(|f| f.output)
            .collect::<Vec<_>>();
        assert_eq!(summary.states, live);
    }

    #[test]
    fn short_landmark_lists_are_reported() {
        let mut session = Session::new(&PipelineConfig::default());
        session.on_landmarks(&neutral_face());
        let face = session.face_state();

        session.on_landmarks(&neutral_face()[..10]);

        assert_eq!(session.face_state(), face);
        assert_eq!(
            session.diagnostics().messages().collect::<Vec<_>>(),
            vec!["Ignored face with 10 landmarks"]
        );
    }

    #[test]
    fn save_and_load() {
        let recording = recording();
        let path = std::env::temp_dir().join(recording.default_file_name());

        recording.save(&path).unwrap();
        let loaded = Recording::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.frames.len(), recording.frames.len());
        assert_eq!(loaded.started_at, recording.started_at);
        assert_eq!(loaded.duration(), Duration::from_millis(89 * 16));
    }

    #[test]
    fn missing_recording() {
        assert!(matches!(
            Recording::load("/definitely/not/here.json"),
            Err(SessionError::Io { .. })
        ));
    }
}
