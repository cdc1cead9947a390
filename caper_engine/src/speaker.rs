//! Speaker presentation: who delivers a line of dialogue and where the text
//! lands on screen.
//!
//! Speakers are registered once at scene or game setup and live in an arena
//! addressed by stable handles; conversations look them up by name per node
//! and only ever activate/deactivate them, never destroy them.

use serde::Serialize;

use crate::context::{ActorHandle, AnimMode, Point, Rect, ScriptContext, TextAlign, TextSlot, TextSpec};
use crate::error::ScriptError;

/// Frames of reading time granted per word of displayed text.
pub const WORD_DWELL_FRAMES: u32 = 18;

/// Base reading time for any displayed message.
pub const MESSAGE_BASE_FRAMES: u32 = 120;

const MAX_SPEAKERS: usize = 100;

/// Auto-computed display duration for a message, in frames. Words are
/// counted as space separators, so a one-word line gets the base time only.
pub fn dwell_frames(msg: &str) -> u32 {
    let words = msg.bytes().filter(|&b| b == b' ').count() as u32;
    words * WORD_DWELL_FRAMES + MESSAGE_BASE_FRAMES
}

/// Stable index into the speaker registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SpeakerHandle(pub u32);

/// Closed set of presentation styles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SpeakerStyle {
    /// Text at the speaker's fixed position.
    Plain,
    /// Text centered above the anchor actor, or at the top of the scene
    /// when no anchor is set.
    ScreenCentered { anchor: Option<ActorHandle> },
    /// Text plus an animated close-up actor driven per line.
    Animated { actor: ActorHandle },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Speaker {
    pub name: String,
    /// Dedicated close-up scene loaded while this speaker is active.
    pub scene: Option<u16>,
    pub text_pos: Point,
    pub text_width: i16,
    pub font: u16,
    pub colors: [u8; 3],
    pub align: TextAlign,
    pub style: SpeakerStyle,
}

impl Speaker {
    pub fn new(name: impl Into<String>) -> Self {
        Speaker {
            name: name.into(),
            scene: None,
            text_pos: Point::new(10, 20),
            text_width: 140,
            font: 2,
            colors: [7, 0, 0],
            align: TextAlign::Left,
            style: SpeakerStyle::Plain,
        }
    }
}

#[derive(Default)]
pub struct SpeakerRegistry {
    speakers: Vec<Speaker>,
}

impl SpeakerRegistry {
    pub fn new() -> Self {
        SpeakerRegistry::default()
    }

    pub fn add_speaker(&mut self, speaker: Speaker) -> Result<SpeakerHandle, ScriptError> {
        if self.speakers.len() >= MAX_SPEAKERS {
            return Err(ScriptError::SpeakerLimit {
                limit: MAX_SPEAKERS,
            });
        }
        self.speakers.push(speaker);
        Ok(SpeakerHandle(self.speakers.len() as u32 - 1))
    }

    /// Name lookup: exact match first, then an ASCII case-insensitive pass
    /// for titles whose speaker names are not uniformly uppercase.
    pub fn find_speaker(&self, name: &str) -> Option<SpeakerHandle> {
        if let Some(idx) = self.speakers.iter().position(|s| s.name == name) {
            return Some(SpeakerHandle(idx as u32));
        }
        self.speakers
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
            .map(|idx| SpeakerHandle(idx as u32))
    }

    pub fn contains(&self, handle: SpeakerHandle) -> bool {
        (handle.0 as usize) < self.speakers.len()
    }

    pub fn get(&self, handle: SpeakerHandle) -> Option<&Speaker> {
        self.speakers.get(handle.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = SpeakerHandle> {
        (0..self.speakers.len() as u32).map(SpeakerHandle)
    }
}

/// Brings a speaker on stage. When the speaker has no dedicated scene but a
/// previous close-up left us away from the conversation's home scene, the
/// home scene is restored first.
pub fn activate(
    ctx: &mut ScriptContext,
    handle: SpeakerHandle,
    home_scene: u16,
    home_bounds: Rect,
) {
    let ScriptContext {
        speakers,
        scene,
        actors,
        ..
    } = ctx;
    let Some(speaker) = speakers.get(handle) else {
        return;
    };

    match speaker.scene {
        None => {
            if scene.scene_id() != home_scene {
                scene.set_bounds(home_bounds);
                scene.load_scene(home_scene);
            }
        }
        Some(close_up) => {
            if scene.scene_id() != close_up {
                scene.load_scene(close_up);
            }
        }
    }

    if let SpeakerStyle::Animated { actor } = speaker.style {
        actors.show(actor);
    }
}

/// Takes a speaker off stage: removes its text and hides its actor.
pub fn deactivate(ctx: &mut ScriptContext, handle: SpeakerHandle) {
    let ScriptContext {
        speakers,
        text,
        actors,
        ..
    } = ctx;
    text.remove(TextSlot::SpeakerLine);
    if let Some(Speaker {
        style: SpeakerStyle::Animated { actor },
        ..
    }) = speakers.get(handle)
    {
        actors.hide(*actor);
    }
}

/// Silences a speaker that is not the active one (between-speaker cleanup at
/// conversation end).
pub fn quiesce(ctx: &mut ScriptContext, handle: SpeakerHandle) {
    let ScriptContext {
        speakers, actors, ..
    } = ctx;
    if let Some(Speaker {
        style: SpeakerStyle::Animated { actor },
        ..
    }) = speakers.get(handle)
    {
        actors.animate(*actor, AnimMode::None, &[], false);
        actors.hide(*actor);
    }
}

/// Displays a line through the speaker and returns its dwell time in frames.
pub fn set_text(ctx: &mut ScriptContext, handle: SpeakerHandle, msg: &str) -> u32 {
    let ScriptContext {
        speakers,
        scene,
        actors,
        text,
        ..
    } = ctx;
    let Some(speaker) = speakers.get(handle) else {
        return MESSAGE_BASE_FRAMES;
    };

    let pos = match &speaker.style {
        SpeakerStyle::Plain | SpeakerStyle::Animated { .. } => speaker.text_pos,
        SpeakerStyle::ScreenCentered { anchor } => {
            let mut rect = text.measure(msg, speaker.text_width);
            let scene_bounds = scene.bounds();
            match anchor {
                Some(actor) => {
                    let at = actors.position(*actor);
                    let half = Point::new(rect.width() / 2, rect.height() + 10);
                    rect.move_to(Point::new(at.x - half.x, at.y - half.y));
                }
                None => {
                    let center_x = scene_bounds.left + scene_bounds.width() / 2;
                    rect.move_to(Point::new(center_x - rect.width() / 2, scene_bounds.top));
                }
            }
            let mut fence = scene_bounds;
            fence.collapse(10, 6);
            rect.contain(fence);
            Point::new(rect.left, rect.top)
        }
    };

    text.show(
        TextSlot::SpeakerLine,
        &TextSpec {
            text: msg.to_string(),
            pos,
            width: speaker.text_width,
            font: speaker.font,
            colors: speaker.colors,
            align: speaker.align,
            priority: 256,
        },
    );

    dwell_frames(msg)
}

/// Triggers the close-up delivery animation for the extended-title speaker
/// mode byte; a no-op for speakers without an animated actor.
pub fn animate_delivery(ctx: &mut ScriptContext, handle: SpeakerHandle, mode: i16) {
    let ScriptContext {
        speakers, actors, ..
    } = ctx;
    if let Some(Speaker {
        style: SpeakerStyle::Animated { actor },
        ..
    }) = speakers.get(handle)
    {
        actors.set_strip(*actor, mode);
        actors.animate(*actor, AnimMode::ForwardOnce, &[], false);
    }
}
