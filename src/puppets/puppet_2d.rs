/*!
A procedurally drawn cartoon face.

Drawing goes through the [Canvas] trait so any 2D backend can be plugged in. [DisplayList] is a
canvas that only records what was drawn.
*/

use std::collections::HashMap;

use glam::Vec2;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::model::{
    AvatarConfig, AvatarState, Emotion, EyeStyle, GlassesStyle, HairStyle, MouthShape, Viseme,
};

use super::Puppet;

/// Minimal immediate mode 2D drawing surface.
pub trait Canvas {
    /// Opacity applied to everything drawn afterwards.
    fn set_alpha(&mut self, alpha: f32);

    /// `rotation` is in radians.
    fn fill_ellipse(&mut self, center: Vec2, radii: Vec2, rotation: f32, color: &str);

    fn stroke_path(&mut self, points: &[Vec2], closed: bool, width: f32, color: &str);

    fn fill_path(&mut self, points: &[Vec2], color: &str);

    fn fill_rect(&mut self, min: Vec2, size: Vec2, color: &str);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DrawCommand {
    FillEllipse {
        center: Vec2,
        radii: Vec2,
        rotation: f32,
        color: String,
        alpha: f32,
    },
    StrokePath {
        points: Vec<Vec2>,
        closed: bool,
        width: f32,
        color: String,
        alpha: f32,
    },
    FillPath {
        points: Vec<Vec2>,
        color: String,
        alpha: f32,
    },
    FillRect {
        min: Vec2,
        size: Vec2,
        color: String,
        alpha: f32,
    },
}

impl DrawCommand {
    pub fn color(&self) -> &str {
        match self {
            Self::FillEllipse { color, .. }
            | Self::StrokePath { color, .. }
            | Self::FillPath { color, .. }
            | Self::FillRect { color, .. } => color,
        }
    }

    pub fn alpha(&self) -> f32 {
        match self {
            Self::FillEllipse { alpha, .. }
            | Self::StrokePath { alpha, .. }
            | Self::FillPath { alpha, .. }
            | Self::FillRect { alpha, .. } => *alpha,
        }
    }
}

/// A [Canvas] that records every command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayList {
    alpha: f32,
    commands: Vec<DrawCommand>,
}

impl Default for DisplayList {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            commands: vec![],
        }
    }
}

impl DisplayList {
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.alpha = 1.0;
        self.commands.clear();
    }

    pub fn with_color<'a>(&'a self, color: &'a str) -> impl Iterator<Item = &'a DrawCommand> + 'a {
        self.commands.iter().filter(move |c| c.color() == color)
    }
}

impl Canvas for DisplayList {
    fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    fn fill_ellipse(&mut self, center: Vec2, radii: Vec2, rotation: f32, color: &str) {
        self.commands.push(DrawCommand::FillEllipse {
            center,
            radii,
            rotation,
            color: color.to_string(),
            alpha: self.alpha,
        });
    }

    fn stroke_path(&mut self, points: &[Vec2], closed: bool, width: f32, color: &str) {
        self.commands.push(DrawCommand::StrokePath {
            points: points.to_vec(),
            closed,
            width,
            color: color.to_string(),
            alpha: self.alpha,
        });
    }

    fn fill_path(&mut self, points: &[Vec2], color: &str) {
        self.commands.push(DrawCommand::FillPath {
            points: points.to_vec(),
            color: color.to_string(),
            alpha: self.alpha,
        });
    }

    fn fill_rect(&mut self, min: Vec2, size: Vec2, color: &str) {
        self.commands.push(DrawCommand::FillRect {
            min,
            size,
            color: color.to_string(),
            alpha: self.alpha,
        });
    }
}

pub const EYE_WHITE: &str = "#ffffff";
pub const PUPIL: &str = "#111111";
pub const OUTLINE: &str = "#2b1d16";
pub const MOUTH_INTERIOR: &str = "#5a1e24";
pub const LIPS: &str = "#b5535c";
pub const TEETH: &str = "#fafafa";
pub const TONGUE: &str = "#d35d6e";
const GLASSES: &str = "#222222";
const HEADPHONES: &str = "#303030";

/// Furthest a pupil may move from the center of its eye, in head radii.
pub const MAX_PUPIL_OFFSET: f32 = 0.05;
/// Below this openness an eye is drawn as a closed lid.
const CLOSED_EYE: f32 = 0.15;
/// Teeth show once the effective mouth opening exceeds this.
pub const TEETH_THRESHOLD: f32 = 0.15;
/// Tongue shows once the effective mouth opening exceeds this.
pub const TONGUE_THRESHOLD: f32 = 0.35;

/// Mouth part for one viseme, in head radii.
#[derive(Debug, Clone, Copy)]
struct MouthPart {
    width: f32,
    open: f32,
    /// Upper teeth rest on the lower lip regardless of opening.
    lip_bite: bool,
}

static MOUTH_LIBRARY: Lazy<HashMap<Viseme, MouthPart>> = Lazy::new(|| {
    let part = |width, open, lip_bite| MouthPart {
        width,
        open,
        lip_bite,
    };

    HashMap::from([
        (Viseme::Rest, part(0.42, 0.0, false)),
        (Viseme::Aa, part(0.5, 0.55, false)),
        (Viseme::E, part(0.6, 0.2, false)),
        (Viseme::O, part(0.3, 0.42, false)),
        (Viseme::U, part(0.22, 0.2, false)),
        (Viseme::Fv, part(0.45, 0.1, true)),
        (Viseme::Mbp, part(0.38, 0.0, false)),
    ])
});

/// Upwards bend of the mouth corners per emotion, in head radii.
fn mouth_curvature(emotion: Emotion) -> f32 {
    match emotion {
        Emotion::Neutral => 0.03,
        Emotion::Happy => 0.12,
        Emotion::Sad => -0.1,
        Emotion::Surprised => 0.0,
        Emotion::Thinking => -0.03,
    }
}

/// (lift, inner tilt) of the brows per emotion, in head radii. A positive tilt raises the inner
/// ends.
fn brow_modifiers(emotion: Emotion) -> (f32, f32) {
    match emotion {
        Emotion::Neutral => (0.0, 0.0),
        Emotion::Happy => (0.03, 0.0),
        Emotion::Sad => (0.0, 0.06),
        Emotion::Surprised => (0.1, 0.0),
        Emotion::Thinking => (0.0, -0.04),
    }
}

/// Head local coordinates. The origin is the head center, one unit is the head radius and +Y
/// points down.
struct Frame {
    center: Vec2,
    radius: f32,
    roll: Vec2,
}

impl Frame {
    fn at(&self, x: f32, y: f32) -> Vec2 {
        self.center + self.roll.rotate(Vec2::new(x, y) * self.radius)
    }

    fn len(&self, v: f32) -> f32 {
        v * self.radius
    }

    fn angle(&self) -> f32 {
        self.roll.y.atan2(self.roll.x)
    }
}

/// A 2D puppet drawn from primitives.
#[derive(Debug, Clone)]
pub struct Puppet2d {
    config: AvatarConfig,
    state: AvatarState,
    size: Vec2,
}

impl Puppet2d {
    pub fn new(config: AvatarConfig, width: f32, height: f32) -> Self {
        Self {
            config,
            state: AvatarState::default(),
            size: Vec2::new(width, height),
        }
    }

    pub fn config(&self) -> &AvatarConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AvatarConfig {
        &mut self.config
    }

    pub fn state(&self) -> &AvatarState {
        &self.state
    }

    fn frame(&self) -> Frame {
        let state = &self.state;
        let offset = Vec2::new(state.position.x - 0.5, state.position.y - 0.5) * self.size * 0.2
            + Vec2::new(state.rotation.y, state.rotation.x) * self.size * 0.03;

        Frame {
            center: self.size * 0.5 + offset,
            radius: self.size.min_element() * 0.3,
            roll: Vec2::from_angle(state.rotation.z),
        }
    }

    /// Draw the last visited state.
    pub fn draw(&self, canvas: &mut dyn Canvas) {
        let frame = self.frame();

        canvas.set_alpha(1.0);
        canvas.fill_rect(Vec2::ZERO, self.size, &self.config.background_color);

        self.draw_body(canvas, &frame);
        self.draw_hair_back(canvas, &frame);
        canvas.fill_ellipse(
            frame.center,
            Vec2::new(frame.len(0.85), frame.len(1.0)),
            frame.angle(),
            &self.config.skin_color,
        );
        self.draw_hair_front(canvas, &frame);

        self.draw_eyes(canvas, &frame);
        self.draw_brows(canvas, &frame);
        canvas.stroke_path(
            &[frame.at(0.0, 0.05), frame.at(-0.06, 0.22), frame.at(0.04, 0.24)],
            false,
            frame.len(0.02),
            OUTLINE,
        );
        self.draw_mouth(canvas, &frame);

        self.draw_glasses(canvas, &frame);
        if self.config.headphones {
            self.draw_headphones(canvas, &frame);
        }
    }

    fn draw_body(&self, canvas: &mut dyn Canvas, frame: &Frame) {
        let shoulders = Vec2::new(self.size.x * 0.5, frame.center.y + frame.len(1.5));
        canvas.fill_ellipse(
            shoulders,
            Vec2::new(frame.len(1.4), frame.len(0.6)),
            0.0,
            &self.config.shirt_color,
        );
    }

    fn draw_hair_back(&self, canvas: &mut dyn Canvas, frame: &Frame) {
        if self.config.hair_style == HairStyle::Long {
            canvas.fill_path(
                &[
                    frame.at(-0.95, -0.4),
                    frame.at(-1.05, 1.2),
                    frame.at(1.05, 1.2),
                    frame.at(0.95, -0.4),
                ],
                &self.config.hair_color,
            );
        }
    }

    fn draw_hair_front(&self, canvas: &mut dyn Canvas, frame: &Frame) {
        let color = &self.config.hair_color;
        let cap = |canvas: &mut dyn Canvas, depth: f32| {
            let points = (0..=12)
                .map(|i| {
                    let t = std::f32::consts::PI * i as f32 / 12.0;
                    frame.at(-0.9 * t.cos(), -0.55 - 0.5 * t.sin())
                })
                .chain([frame.at(0.9, -0.55 + depth), frame.at(-0.9, -0.55 + depth)])
                .collect::<Vec<_>>();
            canvas.fill_path(&points, color);
        };

        match self.config.hair_style {
            HairStyle::Short | HairStyle::Long => cap(canvas, 0.1),
            HairStyle::Spiky => {
                let points = (0..=8)
                    .map(|i| {
                        let x = -0.9 + 1.8 * i as f32 / 8.0;
                        let y = if i % 2 == 0 { -0.6 } else { -1.25 };
                        frame.at(x, y)
                    })
                    .collect::<Vec<_>>();
                canvas.fill_path(&points, color);
                cap(canvas, 0.0);
            }
            HairStyle::Bun => {
                cap(canvas, 0.05);
                canvas.fill_ellipse(
                    frame.at(0.0, -1.1),
                    Vec2::splat(frame.len(0.3)),
                    0.0,
                    color,
                );
            }
            HairStyle::Bald => {}
        }
    }

    fn draw_eyes(&self, canvas: &mut dyn Canvas, frame: &Frame) {
        let eyes = &self.state.eyes;
        let (radii, pupil_radius) = match self.config.eye_style {
            EyeStyle::Round => (Vec2::new(0.14, 0.14), 0.06),
            EyeStyle::Oval => (Vec2::new(0.12, 0.17), 0.055),
            EyeStyle::Anime => (Vec2::new(0.17, 0.22), 0.1),
        };

        // Pupils follow the head, clamped to stay inside the eye
        let look = Vec2::new(self.state.rotation.y, self.state.rotation.x) * MAX_PUPIL_OFFSET;
        let look = look.clamp_length_max(MAX_PUPIL_OFFSET);

        for (x, open) in [(-0.35, eyes.left_open), (0.35, eyes.right_open)] {
            let center = frame.at(x, -0.1);
            let open = if eyes.blink { 0.0 } else { open.clamp(0.0, 1.0) };

            if open < CLOSED_EYE {
                canvas.stroke_path(
                    &[frame.at(x - radii.x, -0.1), frame.at(x + radii.x, -0.1)],
                    false,
                    frame.len(0.025),
                    OUTLINE,
                );
                continue;
            }

            canvas.fill_ellipse(
                center,
                Vec2::new(frame.len(radii.x), frame.len(radii.y * open)),
                frame.angle(),
                EYE_WHITE,
            );
            canvas.fill_ellipse(
                frame.at(x + look.x, -0.1 + look.y),
                Vec2::splat(frame.len(pupil_radius)),
                0.0,
                &self.config.eye_color,
            );
            canvas.fill_ellipse(
                frame.at(x + look.x, -0.1 + look.y),
                Vec2::splat(frame.len(pupil_radius * 0.5)),
                0.0,
                PUPIL,
            );
        }
    }

    fn draw_brows(&self, canvas: &mut dyn Canvas, frame: &Frame) {
        let (lift, tilt) = brow_modifiers(self.state.emotion);

        for (side, raise) in [(-1.0, self.state.eyebrows.left), (1.0, self.state.eyebrows.right)] {
            let y = -0.35 - lift - raise.max(0.0) * 0.1;
            // Thinking raises only one brow
            let tilt = if tilt < 0.0 && side > 0.0 { -tilt } else { tilt };

            canvas.stroke_path(
                &[frame.at(side * 0.5, y), frame.at(side * 0.2, y - tilt)],
                false,
                frame.len(0.05),
                &self.config.hair_color,
            );
        }
    }

    fn draw_mouth(&self, canvas: &mut dyn Canvas, frame: &Frame) {
        let curvature = mouth_curvature(self.state.emotion);

        match self.state.viseme {
            Some(viseme) if viseme.transition_progress < 1.0 => {
                let progress = viseme.transition_progress.clamp(0.0, 1.0);

                canvas.set_alpha(1.0 - progress);
                self.draw_viseme(canvas, frame, viseme.previous, viseme.intensity, curvature);
                canvas.set_alpha(progress);
                self.draw_viseme(canvas, frame, viseme.current, viseme.intensity, curvature);
                canvas.set_alpha(1.0);
            }
            Some(viseme) => {
                self.draw_viseme(canvas, frame, viseme.current, viseme.intensity, curvature)
            }
            None => {
                let width = match self.state.mouth.shape {
                    MouthShape::Closed => 0.42,
                    MouthShape::Half => 0.46,
                    MouthShape::Open => 0.5,
                };
                let part = MouthPart {
                    width,
                    open: self.state.mouth.openness.clamp(0.0, 1.0) * 0.6,
                    lip_bite: false,
                };
                draw_mouth_part(canvas, frame, part, curvature);
            }
        }
    }

    fn draw_viseme(
        &self,
        canvas: &mut dyn Canvas,
        frame: &Frame,
        viseme: Viseme,
        intensity: f32,
        curvature: f32,
    ) {
        let Some(part) = MOUTH_LIBRARY.get(&viseme) else {
            return;
        };

        let exaggeration = 0.3 + 0.7 * intensity.clamp(0.0, 1.0);
        let part = MouthPart {
            open: part.open * exaggeration,
            ..*part
        };

        draw_mouth_part(canvas, frame, part, curvature);
    }

    fn draw_glasses(&self, canvas: &mut dyn Canvas, frame: &Frame) {
        let lens = |canvas: &mut dyn Canvas, x: f32| match self.config.glasses {
            GlassesStyle::Round => {
                let points = (0..16)
                    .map(|i| {
                        let t = std::f32::consts::TAU * i as f32 / 16.0;
                        frame.at(x + 0.2 * t.cos(), -0.1 + 0.2 * t.sin())
                    })
                    .collect::<Vec<_>>();
                canvas.stroke_path(&points, true, frame.len(0.03), GLASSES);
            }
            GlassesStyle::Square => {
                canvas.stroke_path(
                    &[
                        frame.at(x - 0.22, -0.28),
                        frame.at(x + 0.22, -0.28),
                        frame.at(x + 0.22, 0.06),
                        frame.at(x - 0.22, 0.06),
                    ],
                    true,
                    frame.len(0.03),
                    GLASSES,
                );
            }
            GlassesStyle::None => {}
        };

        if self.config.glasses == GlassesStyle::None {
            return;
        }
        lens(canvas, -0.35);
        lens(canvas, 0.35);
        canvas.stroke_path(
            &[frame.at(-0.15, -0.12), frame.at(0.15, -0.12)],
            false,
            frame.len(0.03),
            GLASSES,
        );
    }

    fn draw_headphones(&self, canvas: &mut dyn Canvas, frame: &Frame) {
        let band = (0..=12)
            .map(|i| {
                let t = std::f32::consts::PI * i as f32 / 12.0;
                frame.at(-0.95 * t.cos(), -0.05 - 1.05 * t.sin())
            })
            .collect::<Vec<_>>();
        canvas.stroke_path(&band, false, frame.len(0.08), HEADPHONES);

        for x in [-0.92, 0.92] {
            canvas.fill_ellipse(
                frame.at(x, 0.0),
                Vec2::new(frame.len(0.14), frame.len(0.25)),
                frame.angle(),
                HEADPHONES,
            );
        }
    }
}

/// Mouth centered at the lower part of the face. Closed mouths are a single curve.
fn draw_mouth_part(canvas: &mut dyn Canvas, frame: &Frame, part: MouthPart, curvature: f32) {
    const Y: f32 = 0.45;
    let half = part.width * 0.5;

    if part.open <= 0.02 && !part.lip_bite {
        canvas.stroke_path(
            &[
                frame.at(-half, Y - curvature),
                frame.at(0.0, Y),
                frame.at(half, Y - curvature),
            ],
            false,
            frame.len(0.035),
            LIPS,
        );
        return;
    }

    let outline = (0..16)
        .map(|i| {
            let t = std::f32::consts::TAU * i as f32 / 16.0;
            let (x, y) = (t.cos(), t.sin());
            // Corners bend with the emotion, the lower half opens with the viseme
            let bend = -curvature * x.abs();
            let y = if y > 0.0 { y * part.open } else { y * part.open * 0.4 };
            frame.at(x * half, Y + y * 0.5 + bend)
        })
        .collect::<Vec<_>>();
    canvas.fill_path(&outline, MOUTH_INTERIOR);

    if part.lip_bite || part.open > TEETH_THRESHOLD {
        let teeth_height = if part.lip_bite { 0.06 } else { 0.05 + part.open * 0.1 };
        canvas.fill_rect(
            frame.at(-half * 0.7, Y - part.open * 0.2),
            Vec2::new(frame.len(half * 1.4), frame.len(teeth_height)),
            TEETH,
        );
    }
    if part.open > TONGUE_THRESHOLD {
        canvas.fill_ellipse(
            frame.at(0.0, Y + part.open * 0.35),
            Vec2::new(frame.len(half * 0.6), frame.len(part.open * 0.15)),
            frame.angle(),
            TONGUE,
        );
    }

    canvas.stroke_path(&outline, true, frame.len(0.03), LIPS);
}

impl Puppet for Puppet2d {
    fn visit(&mut self, state: &AvatarState) {
        self.state = *state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Rotation, VisemeState};

    fn render(state: AvatarState, config: AvatarConfig) -> DisplayList {
        let mut puppet = Puppet2d::new(config, 640.0, 480.0);
        puppet.visit(&state);

        let mut canvas = DisplayList::default();
        puppet.draw(&mut canvas);

        canvas
    }

    fn speaking(current: Viseme, previous: Viseme, progress: f32) -> AvatarState {
        AvatarState {
            viseme: Some(VisemeState {
                current,
                previous,
                transition_progress: progress,
                intensity: 1.0,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn crossfade_during_transition() {
        let canvas = render(speaking(Viseme::Aa, Viseme::Rest, 0.3), AvatarConfig::default());

        let lips = canvas.with_color(LIPS).map(DrawCommand::alpha).collect::<Vec<_>>();
        assert!(lips.iter().any(|a| (a - 0.7).abs() < 1e-6));
        assert!(lips.iter().any(|a| (a - 0.3).abs() < 1e-6));

        // Only the open mouth has an interior
        let interior = canvas.with_color(MOUTH_INTERIOR).collect::<Vec<_>>();
        assert_eq!(interior.len(), 1);
        assert!((interior[0].alpha() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn no_crossfade_when_settled() {
        let canvas = render(speaking(Viseme::Aa, Viseme::Rest, 1.0), AvatarConfig::default());

        assert!(canvas.commands().iter().all(|c| c.alpha() == 1.0));
    }

    #[test]
    fn teeth_and_tongue_thresholds() {
        let open = render(speaking(Viseme::Aa, Viseme::Aa, 1.0), AvatarConfig::default());
        assert_eq!(open.with_color(TEETH).count(), 1);
        assert_eq!(open.with_color(TONGUE).count(), 1);

        let spread = render(speaking(Viseme::E, Viseme::E, 1.0), AvatarConfig::default());
        assert_eq!(spread.with_color(TEETH).count(), 1);
        assert_eq!(spread.with_color(TONGUE).count(), 0);

        let bite = render(speaking(Viseme::Fv, Viseme::Fv, 1.0), AvatarConfig::default());
        assert_eq!(bite.with_color(TEETH).count(), 1);

        let rest = render(speaking(Viseme::Rest, Viseme::Rest, 1.0), AvatarConfig::default());
        assert_eq!(rest.with_color(TEETH).count(), 0);
        assert_eq!(rest.with_color(MOUTH_INTERIOR).count(), 0);
    }

    #[test]
    fn pupils_stay_inside_eyes() {
        let state = AvatarState {
            rotation: Rotation::new(3.0, -5.0, 0.0),
            ..Default::default()
        };
        let canvas = render(state, AvatarConfig::default());
        let radius = 480.0f32 * 0.3;

        let whites = canvas
            .with_color(EYE_WHITE)
            .filter_map(|c| match c {
                DrawCommand::FillEllipse { center, .. } => Some(*center),
                _ => None,
            })
            .collect::<Vec<_>>();
        let pupils = canvas
            .with_color(PUPIL)
            .filter_map(|c| match c {
                DrawCommand::FillEllipse { center, .. } => Some(*center),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(whites.len(), 2);
        assert_eq!(pupils.len(), 2);
        for (white, pupil) in whites.iter().zip(&pupils) {
            let offset = white.distance(*pupil);
            assert!(offset > 0.0);
            assert!(offset <= MAX_PUPIL_OFFSET * radius + 1e-3);
        }
    }

    #[test]
    fn blink_closes_both_eyes() {
        let mut state = AvatarState::default();
        state.eyes.blink = true;

        let canvas = render(state, AvatarConfig::default());
        assert_eq!(canvas.with_color(EYE_WHITE).count(), 0);
    }

    #[test]
    fn emotion_changes_brows_not_viseme() {
        let mut happy = speaking(Viseme::O, Viseme::O, 1.0);
        happy.emotion = Emotion::Happy;
        let mut sad = happy;
        sad.emotion = Emotion::Sad;

        let config = AvatarConfig::default();
        let happy = render(happy, config.clone());
        let sad = render(sad, config.clone());

        let brows = |c: &DisplayList| {
            c.with_color(&config.hair_color)
                .filter(|c| matches!(c, DrawCommand::StrokePath { .. }))
                .cloned()
                .collect::<Vec<_>>()
        };
        assert_ne!(brows(&happy), brows(&sad));

        for part in [MOUTH_INTERIOR, TEETH, TONGUE] {
            assert_eq!(happy.with_color(part).count(), sad.with_color(part).count());
        }
    }

    #[test]
    fn accessories() {
        let mut config = AvatarConfig::default();
        config.set_glasses(GlassesStyle::Square);
        config.set_headphones(true);
        config.set_hair_style(HairStyle::Bald);

        let canvas = render(AvatarState::default(), config.clone());

        assert_eq!(canvas.with_color(GLASSES).count(), 3);
        assert_eq!(canvas.with_color(HEADPHONES).count(), 3);
        assert_eq!(canvas.with_color(&config.hair_color).count(), 2);
    }
}
