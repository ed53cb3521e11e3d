/*!
Merges the latest face, audio and speech readings into one [AvatarState] per tick.

Sources are never waited on. Whatever each of them produced last is used, so the face and the
audio may be a frame apart.
*/

use std::time::Instant;

use log::trace;

use crate::{
    config::{PipelineConfig, SpeechConfig},
    logger::DiagnosticStore,
    model::{AudioFeatures, AvatarState, Emotion, FaceState, MouthShape, Viseme},
    receivers::{
        audio::AudioFeatureExtractor,
        lip_sync::VisemeEngine,
        speech_activity,
    },
};

/// Audio volume to mouth openness for consumers without viseme support.
const LEGACY_MOUTH_GAIN: f32 = 2.5;

/// Anything that can produce [AudioFeatures] on demand.
pub trait FeatureSource {
    /// Whether there is any audio behind this source. Without it the mouth follows the face.
    fn is_live(&self) -> bool {
        true
    }

    fn features(&mut self) -> AudioFeatures;
}

impl FeatureSource for AudioFeatureExtractor {
    fn is_live(&self) -> bool {
        self.is_initialized()
    }

    fn features(&mut self) -> AudioFeatures {
        self.get_detailed_analysis()
    }
}

/// A fixed reading, used for replays and silence.
impl FeatureSource for AudioFeatures {
    fn features(&mut self) -> AudioFeatures {
        *self
    }
}

/// A recorded reading, `None` when no audio input was attached.
impl FeatureSource for Option<AudioFeatures> {
    fn is_live(&self) -> bool {
        self.is_some()
    }

    fn features(&mut self) -> AudioFeatures {
        self.unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct Aggregator {
    speech: SpeechConfig,
    legacy_mouth_threshold: f32,

    engine: VisemeEngine,
    emotion: Emotion,
    /// The filler oscillation runs from here.
    epoch: Instant,
}

impl Aggregator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_epoch(config, Instant::now())
    }

    pub fn with_epoch(config: &PipelineConfig, epoch: Instant) -> Self {
        Self {
            speech: config.speech.clone(),
            legacy_mouth_threshold: config.legacy_mouth_threshold,

            engine: VisemeEngine::new(config.viseme.clone()),
            emotion: Emotion::default(),
            epoch,
        }
    }

    pub fn emotion(&self) -> Emotion {
        self.emotion
    }

    /// Emotions are picked by the user, never inferred.
    pub fn set_emotion(&mut self, emotion: Emotion) {
        self.emotion = emotion;
    }

    pub fn engine(&self) -> &VisemeEngine {
        &self.engine
    }

    /// Pull audio from `source` and merge it with `face`. `speaking` is the speech activity
    /// signal at `now`. Readouts go to `diagnostics`.
    ///
    /// Without a live source there is no viseme and renderers use the geometric mouth.
    pub fn tick(
        &mut self,
        face: &FaceState,
        source: &mut dyn FeatureSource,
        speaking: bool,
        diagnostics: &mut DiagnosticStore,
        now: Instant,
    ) -> AvatarState {
        let state = if source.is_live() {
            let features = source.features();
            self.merge_at(face, &features, speaking, now)
        } else {
            self.merge_face(face)
        };

        diagnostics.record_audio(state.volume, state.viseme.map(|v| v.current));

        state
    }

    /// Face only, no audio.
    pub fn merge_face(&self, face: &FaceState) -> AvatarState {
        let mut state = AvatarState::from(*face);
        state.emotion = self.emotion;

        state
    }

    /// Merge already sampled inputs.
    pub fn merge_at(
        &mut self,
        face: &FaceState,
        features: &AudioFeatures,
        speaking: bool,
        now: Instant,
    ) -> AvatarState {
        let mut viseme = self.engine.determine_viseme_at(features, now);

        // Quiet speech the amplitude classifier cannot see
        if viseme.current == Viseme::Rest
            && speaking
            && features.volume < self.speech.quiet_threshold
        {
            viseme = speech_activity::filler_viseme(
                &self.speech,
                now.saturating_duration_since(self.epoch),
            );
            trace!("Speech heard at volume {}, using {}", features.volume, viseme.current);
        }

        let mut state = AvatarState::from(*face);
        state.viseme = Some(viseme);
        state.emotion = self.emotion;
        state.volume = features.volume;

        if features.volume > self.legacy_mouth_threshold {
            let audio_openness = (features.volume * LEGACY_MOUTH_GAIN).min(1.0);
            state.mouth.openness = state.mouth.openness.max(audio_openness);
            state.mouth.shape = MouthShape::from_openness(state.mouth.openness);
        }

        state
    }
}
