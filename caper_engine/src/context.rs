//! Collaborator contracts and the explicit context handle passed into every
//! driver operation. The context replaces the original engine's global
//! singletons: it owns the scene manager, actor registry, speaker registry,
//! and the shared conditional-selection lookup table for the lifetime of a
//! loaded game session.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use caper_formats::TableLayout;

use crate::error::ScriptError;
use crate::speaker::SpeakerRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

impl Point {
    pub fn new(x: i16, y: i16) -> Self {
        Point { x, y }
    }
}

/// Screen-space rectangle with exclusive right/bottom edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl Rect {
    pub fn new(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        Rect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i16 {
        self.right - self.left
    }

    pub fn height(&self) -> i16 {
        self.bottom - self.top
    }

    pub fn contains(&self, pt: Point) -> bool {
        pt.x >= self.left && pt.x < self.right && pt.y >= self.top && pt.y < self.bottom
    }

    pub fn translate(&mut self, dx: i16, dy: i16) {
        self.left += dx;
        self.right += dx;
        self.top += dy;
        self.bottom += dy;
    }

    pub fn move_to(&mut self, pt: Point) {
        let (w, h) = (self.width(), self.height());
        self.left = pt.x;
        self.top = pt.y;
        self.right = pt.x + w;
        self.bottom = pt.y + h;
    }

    pub fn set_width(&mut self, width: i16) {
        self.right = self.left + width;
    }

    /// Shrinks the rect by the given margins on each side; negative margins
    /// grow it.
    pub fn collapse(&mut self, dx: i16, dy: i16) {
        self.left += dx;
        self.right -= dx;
        self.top += dy;
        self.bottom -= dy;
    }

    /// Grows to the union with `other`.
    pub fn extend(&mut self, other: Rect) {
        self.left = self.left.min(other.left);
        self.top = self.top.min(other.top);
        self.right = self.right.max(other.right);
        self.bottom = self.bottom.max(other.bottom);
    }

    /// Shifts the rect (without resizing) so it lies inside `outer`.
    pub fn contain(&mut self, outer: Rect) {
        if self.right > outer.right {
            self.translate(outer.right - self.right, 0);
        }
        if self.left < outer.left {
            self.translate(outer.left - self.left, 0);
        }
        if self.bottom > outer.bottom {
            self.translate(0, outer.bottom - self.bottom);
        }
        if self.top < outer.top {
            self.translate(0, outer.top - self.top);
        }
    }
}

/// Resource kinds served by the asset store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    /// Compiled cutscene bytecode.
    Sequence,
    /// Conversation data: variant 1 is the node table, variant 2 the script
    /// text blob.
    Strip,
    /// Inline message text addressed by resource and line number.
    Message,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Sequence => write!(f, "sequence"),
            ResourceKind::Strip => write!(f, "strip"),
            ResourceKind::Message => write!(f, "message"),
        }
    }
}

/// Stable index into the actor registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ActorHandle(pub u32);

/// Actor animation modes triggered by sequence opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnimMode {
    None,
    Directed,
    Loop,
    Sway,
    FrameRange,
    ForwardOnce,
    BackwardOnce,
    ForwardCount,
    RepeatCount,
    Mirrored,
}

/// Motion-controller flavors for `add_mover`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MoverKind {
    Npc,
    Player,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    ButtonDown(Point),
    ButtonUp(Point),
    MouseMove(Point),
    Key(char),
    Escape,
    Custom(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// Text slots the drivers draw into; each slot shows at most one string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextSlot {
    SequenceMessage,
    SpeakerLine,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSpec {
    pub text: String,
    pub pos: Point,
    pub width: i16,
    pub font: u16,
    pub colors: [u8; 3],
    pub align: TextAlign,
    pub priority: i16,
}

/// Title-variant behavior, resolved once when a session is created instead
/// of branched on at every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TitleConfig {
    pub layout: TableLayout,
    pub prompt_font: u16,
    pub prompt_text_left: i16,
    pub prompt_number_left: i16,
    pub prompt_max_width: i16,
}

impl TitleConfig {
    pub fn classic() -> Self {
        TitleConfig {
            layout: TableLayout::Classic,
            prompt_font: 1,
            prompt_text_left: 25,
            prompt_number_left: 13,
            prompt_max_width: 265,
        }
    }

    pub fn extended() -> Self {
        TitleConfig {
            layout: TableLayout::Extended,
            prompt_font: 3,
            prompt_text_left: 20,
            prompt_number_left: 8,
            prompt_max_width: 250,
        }
    }
}

/// Synchronous asset access. Resources are precompiled and shipped with the
/// game, so absence is fatal, never retried.
pub trait ResourceStore {
    fn resource(&self, kind: ResourceKind, id: u16, variant: u16)
        -> Result<Vec<u8>, ScriptError>;

    /// Display text addressed by message resource and line number.
    fn message(&self, res: u16, line: u16) -> Result<String, ScriptError>;
}

pub trait SceneManager {
    fn scene_id(&self) -> u16;
    fn bounds(&self) -> Rect;
    fn set_bounds(&mut self, bounds: Rect);
    fn load_scene(&mut self, id: u16);
    fn set_zoom_percents(&mut self, y_start: i16, min_percent: i16, y_end: i16, max_percent: i16);
    fn set_scroll_follower(&mut self, actor: Option<ActorHandle>);
}

pub trait ActorRegistry {
    fn contains(&self, actor: ActorHandle) -> bool;
    fn position(&self, actor: ActorHandle) -> Point;
    fn animate(&mut self, actor: ActorHandle, mode: AnimMode, args: &[i16], notify: bool);
    fn add_mover(&mut self, actor: ActorHandle, kind: MoverKind, dest: Point, notify: bool);
    fn set_visage(&mut self, actor: ActorHandle, visage: u16);
    fn set_strip(&mut self, actor: ActorHandle, strip: i16);
    fn set_frame(&mut self, actor: ActorHandle, frame: i16);
    fn set_priority(&mut self, actor: ActorHandle, priority: i16);
    fn set_zoom(&mut self, actor: ActorHandle, zoom: i16);
    fn set_position(&mut self, actor: ActorHandle, pos: Point, strip: i16);
    fn set_frame_count(&mut self, actor: ActorHandle, count: i16);
    fn set_move_rate(&mut self, actor: ActorHandle, rate: i16);
    fn set_move_delta(&mut self, actor: ActorHandle, delta: Point);
    fn hide(&mut self, actor: ActorHandle);
    fn show(&mut self, actor: ActorHandle);
    fn set_wrapper(&mut self, actor: ActorHandle, attached: bool);
    fn update_angle(&mut self, actor: ActorHandle, toward: Point);
}

/// Narrow rendering contract for script-driven text and the choice panel.
pub trait TextSurface {
    /// Bounding box of `text` wrapped at `max_width`, anchored at the
    /// origin.
    fn measure(&self, text: &str, max_width: i16) -> Rect;
    fn show(&mut self, slot: TextSlot, spec: &TextSpec);
    fn remove(&mut self, slot: TextSlot);
    fn open_panel(&mut self, bounds: Rect);
    fn draw_prompt_line(&mut self, text: &str, bounds: Rect, font: u16, color: u8);
    fn close_panel(&mut self);
    /// Modal, user-dismissed error dialog for non-crashing authoring errors.
    fn alert(&mut self, message: &str);
}

pub trait EventSource {
    fn poll(&mut self) -> Option<InputEvent>;
    /// Invoked once per idle poll iteration so spin loops never starve the
    /// renderer.
    fn update_screen(&mut self);
    fn idle_delay(&mut self);
    fn quit_requested(&self) -> bool;
}

pub trait SoundMixer {
    fn play(&mut self, sound: u16, volume: u8, notify: bool);
}

/// Host hooks fired by scripted content.
pub trait ScriptCallbacks {
    fn strip_callback(&mut self, _id: i16) {}
    fn sequence_callback(&mut self, _a: i16, _b: i16) {}
    fn conversation_ended(&mut self) {}
}

/// Shared conditional-selection table. Owned by global game state; the
/// active conversation walker is its only writer.
pub type LookupTable = Rc<RefCell<Vec<i16>>>;

pub struct ScriptContext {
    pub config: TitleConfig,
    pub resources: Box<dyn ResourceStore>,
    pub scene: Box<dyn SceneManager>,
    pub actors: Box<dyn ActorRegistry>,
    pub text: Box<dyn TextSurface>,
    pub events: Box<dyn EventSource>,
    pub sound: Box<dyn SoundMixer>,
    pub callbacks: Option<Box<dyn ScriptCallbacks>>,
    pub speakers: SpeakerRegistry,
    pub lookup: LookupTable,
}

impl ScriptContext {
    pub fn new(
        config: TitleConfig,
        resources: Box<dyn ResourceStore>,
        scene: Box<dyn SceneManager>,
        actors: Box<dyn ActorRegistry>,
        text: Box<dyn TextSurface>,
        events: Box<dyn EventSource>,
        sound: Box<dyn SoundMixer>,
    ) -> Self {
        ScriptContext {
            config,
            resources,
            scene,
            actors,
            text,
            events,
            sound,
            callbacks: None,
            speakers: SpeakerRegistry::new(),
            lookup: Rc::new(RefCell::new(vec![0; 64])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_contain_shifts_without_resizing() {
        let outer = Rect::new(0, 0, 320, 200);
        let mut rect = Rect::new(300, -10, 340, 20);
        let (w, h) = (rect.width(), rect.height());
        rect.contain(outer);
        assert_eq!(rect.width(), w);
        assert_eq!(rect.height(), h);
        assert!(rect.left >= outer.left && rect.right <= outer.right);
        assert!(rect.top >= outer.top && rect.bottom <= outer.bottom);
    }

    #[test]
    fn rect_extend_is_union() {
        let mut rect = Rect::new(40, 0, 40, 0);
        rect.extend(Rect::new(25, 10, 100, 30));
        rect.extend(Rect::new(25, 35, 140, 50));
        assert_eq!(rect, Rect::new(25, 0, 140, 50));
    }

    #[test]
    fn rect_collapse_shrinks_both_axes() {
        let mut rect = Rect::new(0, 0, 320, 200);
        rect.collapse(4, 2);
        assert_eq!(rect, Rect::new(4, 2, 316, 198));
    }
}
