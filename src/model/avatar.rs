use std::{fmt::Display, str::FromStr};

use paste::paste;
use serde::{Deserialize, Serialize};

use super::{
    tracking_data::{Eyebrows, Eyes, FaceState, Mouth, Position, Rotation},
    viseme::VisemeState,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Surprised,
    Thinking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub input: String,
}

impl Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown {}: {}", self.kind, self.input)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for Emotion {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "neutral" => Ok(Self::Neutral),
            "happy" => Ok(Self::Happy),
            "sad" => Ok(Self::Sad),
            "surprised" => Ok(Self::Surprised),
            "thinking" => Ok(Self::Thinking),
            _ => Err(UnknownVariant {
                kind: "emotion",
                input: s.to_string(),
            }),
        }
    }
}

/// Everything a renderer needs for one frame.
///
/// Built fresh every tick by the aggregator, read-only afterwards.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvatarState {
    pub rotation: Rotation,
    /// Geometric mouth, possibly overridden by audio for viseme-unaware consumers.
    pub mouth: Mouth,
    pub eyes: Eyes,
    pub eyebrows: Eyebrows,
    pub position: Position,
    pub viseme: Option<VisemeState>,
    pub emotion: Emotion,
    /// Raw volume of the frame, kept for diagnostics.
    pub volume: f32,
}

impl From<FaceState> for AvatarState {
    fn from(face: FaceState) -> Self {
        Self {
            rotation: face.rotation,
            mouth: face.mouth,
            eyes: face.eyes,
            eyebrows: face.eyebrows,
            position: face.position,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HairStyle {
    #[default]
    Short,
    Long,
    Spiky,
    Bun,
    Bald,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyeStyle {
    #[default]
    Round,
    Oval,
    Anime,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlassesStyle {
    #[default]
    None,
    Round,
    Square,
}

/// User editable look of the 2D avatar. Colors are CSS-style strings passed straight through
/// to the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    pub skin_color: String,
    pub hair_color: String,
    pub eye_color: String,
    pub shirt_color: String,
    pub background_color: String,
    pub hair_style: HairStyle,
    pub eye_style: EyeStyle,
    pub glasses: GlassesStyle,
    pub headphones: bool,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            skin_color: "#f5d0b5".into(),
            hair_color: "#3b2a20".into(),
            eye_color: "#3f6e9e".into(),
            shirt_color: "#4a6fa5".into(),
            background_color: "#1e1e2e".into(),
            hair_style: HairStyle::default(),
            eye_style: EyeStyle::default(),
            glasses: GlassesStyle::default(),
            headphones: false,
        }
    }
}

/// Generate `set_<field>` methods for UI bindings.
macro_rules! setters {
    ($( $field:ident: $t:ty ),+ $(,)?) => {
        paste! {
            $(
                pub fn [<set_ $field>](&mut self, value: $t) {
                    self.$field = value;
                }
            )+
        }
    };
}

impl AvatarConfig {
    setters!(
        skin_color: String,
        hair_color: String,
        eye_color: String,
        shirt_color: String,
        background_color: String,
        hair_style: HairStyle,
        eye_style: EyeStyle,
        glasses: GlassesStyle,
        headphones: bool,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotion_from_str() {
        assert_eq!("HaPpY".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!("thinking".parse::<Emotion>().unwrap(), Emotion::Thinking);
        assert!("angry".parse::<Emotion>().is_err());
    }

    #[test]
    fn config_setters() {
        let mut config = AvatarConfig::default();
        config.set_hair_style(HairStyle::Spiky);
        config.set_glasses(GlassesStyle::Round);
        config.set_skin_color("#ffffff".into());

        assert_eq!(config.hair_style, HairStyle::Spiky);
        assert_eq!(config.glasses, GlassesStyle::Round);
        assert_eq!(config.skin_color, "#ffffff");
    }

    #[test]
    fn config_rejects_unknown_style() {
        let res = serde_json::from_str::<AvatarConfig>(r#"{"hair_style": "mohawk"}"#);
        assert!(res.is_err());

        let config = serde_json::from_str::<AvatarConfig>(r#"{"hair_style": "bun"}"#).unwrap();
        assert_eq!(config.hair_style, HairStyle::Bun);
        assert_eq!(config.eye_style, EyeStyle::Round);
    }

    #[test]
    fn state_from_face() {
        let mut face = FaceState::default();
        face.mouth.openness = 0.4;

        let state = AvatarState::from(face);
        assert_eq!(state.mouth.openness, 0.4);
        assert!(state.viseme.is_none());
        assert_eq!(state.emotion, Emotion::Neutral);
    }
}
