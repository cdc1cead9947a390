//! Headless collaborator implementations.
//!
//! These back the playback binary and the test suites: every observable
//! effect (text, scene loads, actor operations, sounds, callbacks) lands in
//! a shared journal that outlives the boxed collaborators, so a run can be
//! inspected or dumped as a transcript afterwards.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde::Serialize;

use crate::context::{
    ActorHandle, ActorRegistry, AnimMode, EventSource, InputEvent, MoverKind, Point, Rect,
    ResourceKind, ResourceStore, SceneManager, ScriptCallbacks, ScriptContext, SoundMixer,
    TextSlot, TextSpec, TextSurface, TitleConfig,
};
use crate::error::ScriptError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEntry {
    TextShown { slot: String, text: String },
    TextRemoved { slot: String },
    Alert { text: String },
    PanelOpened { bounds: Rect },
    PanelClosed,
    PromptLine { text: String, color: u8 },
    SceneLoaded { id: u16 },
    ZoomCurve { y_start: i16, min_percent: i16, y_end: i16, max_percent: i16 },
    ScrollFollower { actor: Option<u32> },
    SoundPlayed { id: u16, notify: bool },
    ActorOp { actor: u32, op: String },
    StripCallback { id: i16 },
    SequenceCallback { a: i16, b: i16 },
    ConversationEnded,
}

pub type Journal = Rc<RefCell<Vec<JournalEntry>>>;

pub fn new_journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

fn slot_name(slot: TextSlot) -> String {
    match slot {
        TextSlot::SequenceMessage => "message".to_string(),
        TextSlot::SpeakerLine => "speech".to_string(),
    }
}

/// In-memory resource store keyed by (kind, id, variant).
#[derive(Default)]
pub struct MemoryResources {
    blobs: HashMap<(ResourceKind, u16, u16), Vec<u8>>,
    messages: HashMap<(u16, u16), String>,
}

impl MemoryResources {
    pub fn new() -> Self {
        MemoryResources::default()
    }

    pub fn insert(&mut self, kind: ResourceKind, id: u16, variant: u16, bytes: Vec<u8>) {
        self.blobs.insert((kind, id, variant), bytes);
    }

    pub fn insert_message(&mut self, res: u16, line: u16, text: impl Into<String>) {
        self.messages.insert((res, line), text.into());
    }
}

impl ResourceStore for MemoryResources {
    fn resource(
        &self,
        kind: ResourceKind,
        id: u16,
        variant: u16,
    ) -> Result<Vec<u8>, ScriptError> {
        self.blobs
            .get(&(kind, id, variant))
            .cloned()
            .ok_or(ScriptError::ResourceNotFound { kind, id })
    }

    fn message(&self, res: u16, line: u16) -> Result<String, ScriptError> {
        self.messages
            .get(&(res, line))
            .cloned()
            .ok_or(ScriptError::ResourceNotFound {
                kind: ResourceKind::Message,
                id: res,
            })
    }
}

pub struct HeadlessScene {
    journal: Journal,
    scene_id: u16,
    bounds: Rect,
}

impl HeadlessScene {
    pub fn new(journal: Journal, scene_id: u16) -> Self {
        HeadlessScene {
            journal,
            scene_id,
            bounds: Rect::new(0, 0, 320, 200),
        }
    }
}

impl SceneManager for HeadlessScene {
    fn scene_id(&self) -> u16 {
        self.scene_id
    }

    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn set_bounds(&mut self, bounds: Rect) {
        self.bounds = bounds;
    }

    fn load_scene(&mut self, id: u16) {
        self.scene_id = id;
        self.journal
            .borrow_mut()
            .push(JournalEntry::SceneLoaded { id });
    }

    fn set_zoom_percents(&mut self, y_start: i16, min_percent: i16, y_end: i16, max_percent: i16) {
        self.journal.borrow_mut().push(JournalEntry::ZoomCurve {
            y_start,
            min_percent,
            y_end,
            max_percent,
        });
    }

    fn set_scroll_follower(&mut self, actor: Option<ActorHandle>) {
        self.journal.borrow_mut().push(JournalEntry::ScrollFollower {
            actor: actor.map(|a| a.0),
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActorState {
    pub position: Point,
    pub visage: u16,
    pub strip: i16,
    pub frame: i16,
    pub priority: i16,
    pub zoom: i16,
    pub frame_count: i16,
    pub move_rate: i16,
    pub move_delta: Point,
    pub visible: bool,
    pub wrapper: bool,
    pub anim_mode: AnimMode,
    pub mover: Option<(MoverKind, Point, bool)>,
}

impl Default for ActorState {
    fn default() -> Self {
        ActorState {
            position: Point::default(),
            visage: 0,
            strip: 0,
            frame: 0,
            priority: 0,
            zoom: 100,
            frame_count: 0,
            move_rate: 10,
            move_delta: Point::default(),
            visible: true,
            wrapper: false,
            anim_mode: AnimMode::None,
            mover: None,
        }
    }
}

/// Arena-backed actor registry that records every operation.
pub struct HeadlessActors {
    journal: Journal,
    states: Vec<ActorState>,
}

impl HeadlessActors {
    pub fn new(journal: Journal) -> Self {
        HeadlessActors {
            journal,
            states: Vec::new(),
        }
    }

    pub fn add(&mut self) -> ActorHandle {
        self.states.push(ActorState::default());
        ActorHandle(self.states.len() as u32 - 1)
    }

    pub fn state(&self, actor: ActorHandle) -> &ActorState {
        &self.states[actor.0 as usize]
    }

    fn log(&self, actor: ActorHandle, op: String) {
        self.journal.borrow_mut().push(JournalEntry::ActorOp {
            actor: actor.0,
            op,
        });
    }

    fn state_mut(&mut self, actor: ActorHandle) -> &mut ActorState {
        &mut self.states[actor.0 as usize]
    }
}

impl ActorRegistry for HeadlessActors {
    fn contains(&self, actor: ActorHandle) -> bool {
        (actor.0 as usize) < self.states.len()
    }

    fn position(&self, actor: ActorHandle) -> Point {
        self.state(actor).position
    }

    fn animate(&mut self, actor: ActorHandle, mode: AnimMode, args: &[i16], notify: bool) {
        self.state_mut(actor).anim_mode = mode;
        self.log(actor, format!("animate {mode:?} {args:?} notify={notify}"));
    }

    fn add_mover(&mut self, actor: ActorHandle, kind: MoverKind, dest: Point, notify: bool) {
        self.state_mut(actor).mover = Some((kind, dest, notify));
        self.log(
            actor,
            format!("mover {kind:?} to ({}, {}) notify={notify}", dest.x, dest.y),
        );
    }

    fn set_visage(&mut self, actor: ActorHandle, visage: u16) {
        self.state_mut(actor).visage = visage;
        self.log(actor, format!("visage {visage}"));
    }

    fn set_strip(&mut self, actor: ActorHandle, strip: i16) {
        self.state_mut(actor).strip = strip;
        self.log(actor, format!("strip {strip}"));
    }

    fn set_frame(&mut self, actor: ActorHandle, frame: i16) {
        self.state_mut(actor).frame = frame;
        self.log(actor, format!("frame {frame}"));
    }

    fn set_priority(&mut self, actor: ActorHandle, priority: i16) {
        self.state_mut(actor).priority = priority;
        self.log(actor, format!("priority {priority}"));
    }

    fn set_zoom(&mut self, actor: ActorHandle, zoom: i16) {
        self.state_mut(actor).zoom = zoom;
        self.log(actor, format!("zoom {zoom}"));
    }

    fn set_position(&mut self, actor: ActorHandle, pos: Point, strip: i16) {
        let state = self.state_mut(actor);
        state.position = pos;
        if strip != 0 {
            state.strip = strip;
        }
        self.log(actor, format!("position ({}, {}) strip {strip}", pos.x, pos.y));
    }

    fn set_frame_count(&mut self, actor: ActorHandle, count: i16) {
        self.state_mut(actor).frame_count = count;
        self.log(actor, format!("frame_count {count}"));
    }

    fn set_move_rate(&mut self, actor: ActorHandle, rate: i16) {
        self.state_mut(actor).move_rate = rate;
        self.log(actor, format!("move_rate {rate}"));
    }

    fn set_move_delta(&mut self, actor: ActorHandle, delta: Point) {
        self.state_mut(actor).move_delta = delta;
        self.log(actor, format!("move_delta ({}, {})", delta.x, delta.y));
    }

    fn hide(&mut self, actor: ActorHandle) {
        self.state_mut(actor).visible = false;
        self.log(actor, "hide".to_string());
    }

    fn show(&mut self, actor: ActorHandle) {
        self.state_mut(actor).visible = true;
        self.log(actor, "show".to_string());
    }

    fn set_wrapper(&mut self, actor: ActorHandle, attached: bool) {
        self.state_mut(actor).wrapper = attached;
        self.log(actor, format!("wrapper {attached}"));
    }

    fn update_angle(&mut self, actor: ActorHandle, toward: Point) {
        self.log(actor, format!("angle toward ({}, {})", toward.x, toward.y));
    }
}

/// Event source fed from a queue, with an optional auto-answer key list for
/// unattended playback. When everything is drained and `quit_when_drained`
/// is set, the quit flag raises so modal loops cannot spin forever.
pub struct ScriptedEvents {
    queue: VecDeque<InputEvent>,
    auto_keys: VecDeque<char>,
    quit: bool,
    quit_when_drained: bool,
    idle_polls_before_quit: u32,
    updates: Rc<Cell<u32>>,
}

impl ScriptedEvents {
    pub fn new() -> Self {
        ScriptedEvents {
            queue: VecDeque::new(),
            auto_keys: VecDeque::new(),
            quit: false,
            quit_when_drained: true,
            idle_polls_before_quit: 0,
            updates: Rc::new(Cell::new(0)),
        }
    }

    pub fn push(&mut self, event: InputEvent) {
        self.queue.push_back(event);
    }

    pub fn push_auto_key(&mut self, key: char) {
        self.auto_keys.push_back(key);
    }

    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    /// Lets the source report idle (empty polls) this many times before the
    /// drained-queue quit raises.
    pub fn allow_idle_polls(&mut self, polls: u32) {
        self.idle_polls_before_quit = polls;
    }

    /// Shared counter of screen-update calls, for asserting that spin loops
    /// keep servicing the renderer.
    pub fn update_counter(&self) -> Rc<Cell<u32>> {
        self.updates.clone()
    }
}

impl Default for ScriptedEvents {
    fn default() -> Self {
        ScriptedEvents::new()
    }
}

impl EventSource for ScriptedEvents {
    fn poll(&mut self) -> Option<InputEvent> {
        if let Some(event) = self.queue.pop_front() {
            return Some(event);
        }
        if let Some(key) = self.auto_keys.pop_front() {
            return Some(InputEvent::Key(key));
        }
        if self.idle_polls_before_quit > 0 {
            self.idle_polls_before_quit -= 1;
        }
        None
    }

    fn update_screen(&mut self) {
        self.updates.set(self.updates.get() + 1);
    }

    fn idle_delay(&mut self) {}

    fn quit_requested(&self) -> bool {
        self.quit
            || (self.quit_when_drained
                && self.queue.is_empty()
                && self.auto_keys.is_empty()
                && self.idle_polls_before_quit == 0)
    }
}

/// Text surface that renders into the journal.
pub struct RecordingText {
    journal: Journal,
}

impl RecordingText {
    pub fn new(journal: Journal) -> Self {
        RecordingText { journal }
    }
}

impl TextSurface for RecordingText {
    fn measure(&self, text: &str, max_width: i16) -> Rect {
        // Fixed-advance stand-in for the glyph rasterizer: six pixels per
        // character, ten per line, wrapped at max_width.
        let raw = (text.chars().count() as i16).max(1) * 6;
        let width = raw.min(max_width.max(6));
        let lines = if max_width > 0 {
            (raw + max_width - 1) / max_width
        } else {
            1
        };
        Rect::new(0, 0, width, lines.max(1) * 10)
    }

    fn show(&mut self, slot: TextSlot, spec: &TextSpec) {
        self.journal.borrow_mut().push(JournalEntry::TextShown {
            slot: slot_name(slot),
            text: spec.text.clone(),
        });
    }

    fn remove(&mut self, slot: TextSlot) {
        // Removal is idempotent on a real surface; log it unconditionally so
        // restored runs produce the same transcript as uninterrupted ones.
        self.journal.borrow_mut().push(JournalEntry::TextRemoved {
            slot: slot_name(slot),
        });
    }

    fn open_panel(&mut self, bounds: Rect) {
        self.journal
            .borrow_mut()
            .push(JournalEntry::PanelOpened { bounds });
    }

    fn draw_prompt_line(&mut self, text: &str, _bounds: Rect, _font: u16, color: u8) {
        self.journal.borrow_mut().push(JournalEntry::PromptLine {
            text: text.to_string(),
            color,
        });
    }

    fn close_panel(&mut self) {
        self.journal.borrow_mut().push(JournalEntry::PanelClosed);
    }

    fn alert(&mut self, message: &str) {
        self.journal.borrow_mut().push(JournalEntry::Alert {
            text: message.to_string(),
        });
    }
}

pub struct NullSound {
    journal: Journal,
}

impl NullSound {
    pub fn new(journal: Journal) -> Self {
        NullSound { journal }
    }
}

impl SoundMixer for NullSound {
    fn play(&mut self, sound: u16, _volume: u8, notify: bool) {
        self.journal
            .borrow_mut()
            .push(JournalEntry::SoundPlayed { id: sound, notify });
    }
}

pub struct RecordingCallbacks {
    journal: Journal,
}

impl RecordingCallbacks {
    pub fn new(journal: Journal) -> Self {
        RecordingCallbacks { journal }
    }
}

impl ScriptCallbacks for RecordingCallbacks {
    fn strip_callback(&mut self, id: i16) {
        self.journal
            .borrow_mut()
            .push(JournalEntry::StripCallback { id });
    }

    fn sequence_callback(&mut self, a: i16, b: i16) {
        self.journal
            .borrow_mut()
            .push(JournalEntry::SequenceCallback { a, b });
    }

    fn conversation_ended(&mut self) {
        self.journal.borrow_mut().push(JournalEntry::ConversationEnded);
    }
}

/// Assembles a fully headless context: shared journal, `actor_count` actors
/// pre-registered as handles `0..actor_count`, callbacks wired to the
/// journal.
pub fn build_context(
    config: TitleConfig,
    resources: MemoryResources,
    events: ScriptedEvents,
    scene_id: u16,
    actor_count: usize,
) -> (ScriptContext, Journal) {
    let journal = new_journal();
    let mut actors = HeadlessActors::new(journal.clone());
    for _ in 0..actor_count {
        actors.add();
    }
    let mut ctx = ScriptContext::new(
        config,
        Box::new(resources),
        Box::new(HeadlessScene::new(journal.clone(), scene_id)),
        Box::new(actors),
        Box::new(RecordingText::new(journal.clone())),
        Box::new(events),
        Box::new(NullSound::new(journal.clone())),
    );
    ctx.callbacks = Some(Box::new(RecordingCallbacks::new(journal.clone())));
    (ctx, journal)
}
