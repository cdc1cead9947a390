//! Branching-conversation walker.
//!
//! A conversation is a table of branch nodes plus a companion script blob
//! holding the display strings. The walker interprets one node per `signal`
//! invocation: it resolves the candidate replies, optionally prompts the
//! player, routes the line through the named speaker, and computes the next
//! node. The host drives `signal` from text-dismiss and input events.

use std::collections::HashSet;

use log::{debug, warn};

use caper_formats::{
    parse_node_table, read_script_string, DialogueNode, TableLayout, CHOICE_SLOTS,
};

use crate::choice::{ChoicePrompter, Selection};
use crate::context::{InputEvent, LookupTable, Rect, ResourceKind, ScriptContext, TextSlot};
use crate::error::ScriptError;
use crate::speaker::{self, SpeakerHandle};

/// Node id marking the end of the conversation.
pub const END_NODE: i32 = 10000;

/// Index sentinel reported when an id lookup finds no node; used to surface
/// authoring errors without crashing.
pub const NODE_NOT_FOUND: i32 = 10001;

/// Table-resource variant holding the node records.
const TABLE_VARIANT: u16 = 1;

/// Table-resource variant holding the script text blob.
const SCRIPT_VARIANT: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    Idle,
    Loaded,
    AwaitingChoice,
    Speaking,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationOutcome {
    /// A node was processed; the host re-signals on dismiss/input or when
    /// the delay expires.
    Waiting { delay: u32 },
    Finished,
    /// Terminated into a cutscene: the host starts the sequence with this
    /// resource id.
    StartSequence { id: u16 },
    /// The host asked to quit while the choice prompt was open.
    Quit,
}

enum Indirect {
    Text(String),
    /// The redirect target selected nothing; the slot was removed and the
    /// same position must be examined again.
    SlotRemoved,
}

pub struct ConversationWalker {
    state: WalkerState,
    script_id: u16,
    layout: TableLayout,
    nodes: Vec<DialogueNode>,
    script: Vec<u8>,
    /// Current table index, or one of the sentinels (negative jump,
    /// [`END_NODE`]).
    node_index: i32,
    current_node_id: i16,
    text_shown: bool,
    active_speaker: Option<SpeakerHandle>,
    delay: u32,
    home_scene: u16,
    home_bounds: Rect,
    exit_mode: i16,
    notify_end: bool,
    lookup: Option<LookupTable>,
    prompter: ChoicePrompter,
}

impl Default for ConversationWalker {
    fn default() -> Self {
        ConversationWalker {
            state: WalkerState::Idle,
            script_id: 0,
            layout: TableLayout::Classic,
            nodes: Vec::new(),
            script: Vec::new(),
            node_index: 0,
            current_node_id: 0,
            text_shown: false,
            active_speaker: None,
            delay: 0,
            home_scene: 0,
            home_bounds: Rect::default(),
            exit_mode: 0,
            notify_end: false,
            lookup: None,
            prompter: ChoicePrompter::new(),
        }
    }
}

impl ConversationWalker {
    pub fn new() -> Self {
        ConversationWalker::default()
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    pub fn script_id(&self) -> u16 {
        self.script_id
    }

    pub fn current_node_id(&self) -> i16 {
        self.current_node_id
    }

    /// Exit-mode value accumulated from traversed nodes (extended layout);
    /// scenes read it after the conversation ends to pick a follow-up.
    pub fn exit_mode(&self) -> i16 {
        self.exit_mode
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            WalkerState::Loaded | WalkerState::AwaitingChoice | WalkerState::Speaking
        )
    }

    /// Per-frame clock; reports whether the transition delay has elapsed.
    pub fn tick(&mut self) -> bool {
        if self.delay > 0 {
            self.delay -= 1;
        }
        self.delay == 0
    }

    /// Begins a conversation. The node table and script text load lazily on
    /// the first `signal`. `notify_end` arms the end-of-conversation
    /// callback.
    pub fn start(&mut self, ctx: &mut ScriptContext, script_id: u16, notify_end: bool) {
        self.reset();
        self.script_id = script_id;
        self.layout = ctx.config.layout;
        self.home_scene = ctx.scene.scene_id();
        self.home_bounds = ctx.scene.bounds();
        self.notify_end = notify_end;
        self.state = WalkerState::Loaded;
        debug!("conversation {script_id} started in scene {}", self.home_scene);
    }

    /// [`ConversationWalker::start`] with an explicit conditional-selection
    /// table; without one the walker falls back to the context's table.
    pub fn start_with_lookup(
        &mut self,
        ctx: &mut ScriptContext,
        script_id: u16,
        notify_end: bool,
        lookup: LookupTable,
    ) {
        self.start(ctx, script_id, notify_end);
        self.lookup = Some(lookup);
    }

    fn reset(&mut self) {
        *self = ConversationWalker::default();
    }

    /// One state-machine step. On error the walker stops cleanly (no
    /// speaker or text left active) before the error propagates.
    pub fn signal(&mut self, ctx: &mut ScriptContext) -> Result<ConversationOutcome, ScriptError> {
        match self.run_signal(ctx) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.stop(ctx);
                Err(err)
            }
        }
    }

    fn run_signal(&mut self, ctx: &mut ScriptContext) -> Result<ConversationOutcome, ScriptError> {
        if matches!(self.state, WalkerState::Idle | WalkerState::Terminated) {
            return Ok(ConversationOutcome::Finished);
        }

        if self.text_shown {
            ctx.text.remove(TextSlot::SpeakerLine);
            self.text_shown = false;
        }

        if self.node_index < 0 {
            let id = (-self.node_index) as u16;
            self.stop(ctx);
            return Ok(ConversationOutcome::StartSequence { id });
        }
        if self.node_index == END_NODE {
            self.stop(ctx);
            return Ok(ConversationOutcome::Finished);
        }

        if self.nodes.is_empty() {
            self.load(ctx)?;
        }

        let index = self.node_index as usize;
        let node = self
            .nodes
            .get(index)
            .cloned()
            .ok_or(ScriptError::NodeResolution {
                node_id: self.current_node_id,
            })?;
        self.current_node_id = node.id;

        if node.exit_mode != 0 {
            self.exit_mode = node.exit_mode;
        }
        self.apply_lookup(ctx, &node);

        let candidates = self.resolve_candidates(ctx, index)?;
        let choice = if candidates.len() > 1 {
            self.state = WalkerState::AwaitingChoice;
            let texts: Vec<String> = candidates.iter().map(|(_, text)| text.clone()).collect();
            match self.prompter.execute(ctx, &texts) {
                Selection::Choice(idx) => idx,
                Selection::Quit => {
                    self.stop(ctx);
                    return Ok(ConversationOutcome::Quit);
                }
            }
        } else {
            0
        };
        self.state = WalkerState::Speaking;

        let (slot_index, chosen_text) = candidates
            .get(choice)
            .cloned()
            .ok_or(ScriptError::NodeResolution { node_id: node.id })?;

        let speaker_name = read_script_string(&self.script, node.speaker_offset)
            .map_err(|err| ScriptError::malformed(err.to_string(), node.speaker_offset as usize))?;
        let speaker = ctx.speakers.find_speaker(&speaker_name).ok_or_else(|| {
            ScriptError::SpeakerNotFound {
                name: speaker_name.clone(),
                script: self.script_id,
            }
        })?;

        if self.active_speaker != Some(speaker) {
            if let Some(old) = self.active_speaker {
                speaker::deactivate(ctx, old);
            }
            self.active_speaker = Some(speaker);
            speaker::activate(ctx, speaker, self.home_scene, self.home_bounds);
        }

        if let Some(callbacks) = ctx.callbacks.as_mut() {
            for &id in &node.callback_ids {
                if id == 0 {
                    break;
                }
                callbacks.strip_callback(id);
            }
        }

        if !chosen_text.is_empty() {
            if self.layout == TableLayout::Extended && node.speaker_mode != 0 {
                speaker::animate_delivery(ctx, speaker, node.speaker_mode);
            }
            self.delay = speaker::set_text(ctx, speaker, &chosen_text);
            self.text_shown = true;
        } else if self.layout == TableLayout::Extended && node.speaker_mode != 0 {
            self.delay = 0;
            speaker::animate_delivery(ctx, speaker, node.speaker_mode);
        } else {
            self.delay = 1;
        }

        // Re-read the slot from the live table: candidate resolution may
        // have compacted the slot array.
        let successor = self.nodes[index].slots[slot_index].id;
        let next = self.new_index(successor);
        self.node_index = if next == NODE_NOT_FOUND {
            warn!(
                "conversation {}: successor id {successor} of node {} not found",
                self.script_id, node.id
            );
            ctx.text.alert("Conversation failure: node not found");
            0
        } else {
            next
        };

        Ok(ConversationOutcome::Waiting { delay: self.delay })
    }

    /// Input routing. An escape walks forward past unvoiced single-successor
    /// transition nodes to the nearest real branch; anything else advances
    /// the conversation immediately.
    pub fn on_event(
        &mut self,
        ctx: &mut ScriptContext,
        event: InputEvent,
    ) -> Result<Option<ConversationOutcome>, ScriptError> {
        match event {
            InputEvent::Escape => {
                self.escape_skip()?;
                self.delay = 0;
                self.signal(ctx).map(Some)
            }
            InputEvent::ButtonDown(_) | InputEvent::Key(_) | InputEvent::Custom(_) => {
                self.delay = 0;
                self.signal(ctx).map(Some)
            }
            InputEvent::ButtonUp(_) | InputEvent::MouseMove(_) => Ok(None),
        }
    }

    fn escape_skip(&mut self) -> Result<(), ScriptError> {
        if self.nodes.is_empty() || self.node_index < 0 || self.node_index >= self.nodes.len() as i32
        {
            return Ok(());
        }

        let mut hops = 0;
        while let Some(node) = self.nodes.get(self.node_index as usize) {
            if !node.slots[1].is_unused() {
                // A real second branch: stop here.
                break;
            }
            let next = self.new_index(node.slots[0].id);
            if next == NODE_NOT_FOUND {
                return Err(ScriptError::NodeResolution {
                    node_id: node.slots[0].id,
                });
            }
            self.node_index = next;
            if next < 0 || next == END_NODE {
                break;
            }
            self.current_node_id = self.nodes[next as usize].id;

            hops += 1;
            if hops > self.nodes.len() {
                return Err(ScriptError::NodeResolution {
                    node_id: self.current_node_id,
                });
            }
        }
        Ok(())
    }

    /// Ends the conversation and releases everything it touched: shown
    /// text, the active speaker, any scene swapped in for a close-up.
    pub fn stop(&mut self, ctx: &mut ScriptContext) {
        if self.state == WalkerState::Idle || self.state == WalkerState::Terminated {
            self.state = WalkerState::Terminated;
            return;
        }

        if self.text_shown {
            ctx.text.remove(TextSlot::SpeakerLine);
            self.text_shown = false;
        }

        if self.layout == TableLayout::Extended {
            let others: Vec<SpeakerHandle> = ctx
                .speakers
                .handles()
                .filter(|handle| Some(*handle) != self.active_speaker)
                .collect();
            for handle in others {
                speaker::quiesce(ctx, handle);
            }
        }

        if let Some(active) = self.active_speaker.take() {
            speaker::deactivate(ctx, active);
        }

        if ctx.scene.scene_id() != self.home_scene {
            ctx.scene.set_bounds(self.home_bounds);
            ctx.scene.load_scene(self.home_scene);
        }

        if self.notify_end {
            self.notify_end = false;
            if let Some(callbacks) = ctx.callbacks.as_mut() {
                callbacks.conversation_ended();
            }
        }

        self.nodes.clear();
        self.script.clear();
        self.state = WalkerState::Terminated;
        debug!("conversation {} terminated", self.script_id);
    }

    fn load(&mut self, ctx: &mut ScriptContext) -> Result<(), ScriptError> {
        self.script = ctx
            .resources
            .resource(ResourceKind::Strip, self.script_id, SCRIPT_VARIANT)?;
        let table = ctx
            .resources
            .resource(ResourceKind::Strip, self.script_id, TABLE_VARIANT)?;
        self.nodes = parse_node_table(&table, self.layout)
            .map_err(|err| ScriptError::malformed(err.to_string(), 0))?;
        debug!(
            "conversation {}: loaded {} nodes, {} script bytes",
            self.script_id,
            self.nodes.len(),
            self.script.len()
        );
        Ok(())
    }

    fn lookup_value(&self, ctx: &ScriptContext, index_1based: i16) -> i16 {
        let table = self.lookup.as_ref().unwrap_or(&ctx.lookup).borrow();
        let index = index_1based as usize;
        if index == 0 || index > table.len() {
            return 0;
        }
        table[index - 1]
    }

    /// Applies the node's conditional-selection mutation to the shared
    /// table. The walker is the table's only writer, and only for the node
    /// it is currently on.
    fn apply_lookup(&mut self, ctx: &ScriptContext, node: &DialogueNode) {
        use caper_formats::LookupMode;

        if node.lookup_mode == LookupMode::None {
            return;
        }
        let table = self.lookup.as_ref().unwrap_or(&ctx.lookup);
        let mut table = table.borrow_mut();
        let index = node.lookup_index as usize;
        if index == 0 || index > table.len() {
            warn!(
                "conversation {}: node {} lookup index {} out of range",
                self.script_id, node.id, node.lookup_index
            );
            return;
        }
        let entry = &mut table[index - 1];
        match node.lookup_mode {
            LookupMode::Increment => *entry += 1,
            LookupMode::Decrement => *entry -= 1,
            LookupMode::Assign => *entry = node.lookup_value,
            LookupMode::None => {}
        }
    }

    /// Builds the candidate list for a node: one `(slot index, text)` entry
    /// per used successor slot, applying the lookup-candidate fast path and
    /// the empty-string indirect-redirection rule.
    fn resolve_candidates(
        &mut self,
        ctx: &ScriptContext,
        index: usize,
    ) -> Result<Vec<(usize, String)>, ScriptError> {
        let node = self.nodes[index].clone();

        if self.layout == TableLayout::Extended && node.lookup_candidates[0] != 0 {
            // Table-driven selection: the lookup value picks the candidate
            // word, and the slot carrying that id wins outright.
            let value = self.lookup_value(ctx, node.lookup_candidates[0]);
            let entry_id = node
                .lookup_candidates
                .get(value as usize)
                .copied()
                .unwrap_or(0);
            for (slot_index, slot) in node.slots.iter().enumerate() {
                if slot.is_unused() {
                    break;
                }
                if slot.id == entry_id {
                    let text = self.slot_text(slot.script_offset)?;
                    return Ok(vec![(slot_index, text)]);
                }
            }
            // No slot matched: fall back to the last used slot.
            let mut last = 0;
            while last + 1 < CHOICE_SLOTS && !node.slots[last + 1].is_unused() {
                last += 1;
            }
            let text = self.slot_text(node.slots[last].script_offset)?;
            return Ok(vec![(last, text)]);
        }

        let mut candidates = Vec::new();
        let mut slot_index = 0;
        while slot_index < CHOICE_SLOTS {
            let slot = self.nodes[index].slots[slot_index];
            if slot.is_unused() {
                break;
            }
            let mut text = self.slot_text(slot.script_offset)?;
            if text.is_empty() && !self.nodes[index].slots[1].is_unused() {
                match self.resolve_indirect(ctx, index, slot_index)? {
                    Indirect::Text(resolved) => text = resolved,
                    Indirect::SlotRemoved => continue,
                }
            }
            candidates.push((slot_index, text));
            slot_index += 1;
        }
        Ok(candidates)
    }

    /// Follows an empty candidate slot to the conditional-selection result
    /// of the node it references, chaining until a non-empty string turns
    /// up. A dangling target or a revisited node is a resolution error, not
    /// a hang.
    fn resolve_indirect(
        &mut self,
        ctx: &ScriptContext,
        index: usize,
        slot_index: usize,
    ) -> Result<Indirect, ScriptError> {
        let mut visited: HashSet<i16> = HashSet::new();
        let mut target_id = self.nodes[index].slots[slot_index].id;

        loop {
            if !visited.insert(target_id) {
                return Err(ScriptError::NodeResolution { node_id: target_id });
            }
            let target = self
                .nodes
                .iter()
                .find(|node| node.id == target_id)
                .cloned()
                .ok_or(ScriptError::NodeResolution { node_id: target_id })?;

            if target.lookup_candidates[0] == 0 {
                // The target carries no selection metadata; the candidate
                // stays empty.
                return Ok(Indirect::Text(String::new()));
            }

            let value = self.lookup_value(ctx, target.lookup_candidates[0]);
            if value == 0 {
                // Selection not armed yet: drop the slot and re-examine the
                // position.
                self.remove_slot(index, slot_index);
                return Ok(Indirect::SlotRemoved);
            }

            let list_id = target
                .lookup_candidates
                .get(value as usize)
                .copied()
                .filter(|&id| id != 0)
                .ok_or(ScriptError::NodeResolution { node_id: target_id })?;
            let slot = target
                .slots
                .iter()
                .find(|slot| slot.id == list_id)
                .copied()
                .ok_or(ScriptError::NodeResolution { node_id: target_id })?;

            let text = self.slot_text(slot.script_offset)?;
            if !text.is_empty() {
                return Ok(Indirect::Text(text));
            }
            target_id = list_id;
        }
    }

    fn remove_slot(&mut self, index: usize, slot_index: usize) {
        let slots = &mut self.nodes[index].slots;
        for shift in slot_index..CHOICE_SLOTS - 1 {
            slots[shift] = slots[shift + 1];
        }
        slots[CHOICE_SLOTS - 1] = Default::default();
    }

    fn slot_text(&self, offset: u16) -> Result<String, ScriptError> {
        read_script_string(&self.script, offset)
            .map_err(|err| ScriptError::malformed(err.to_string(), offset as usize))
    }

    /// Maps a successor id to a table index or sentinel. An id of 0 and any
    /// unmatched id yield [`NODE_NOT_FOUND`], distinct from [`END_NODE`].
    pub fn new_index(&self, id: i16) -> i32 {
        if id as i32 == END_NODE {
            return END_NODE;
        }
        if id < 0 {
            return id as i32;
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id == id {
                return if id == 0 { NODE_NOT_FOUND } else { index as i32 };
            }
        }
        NODE_NOT_FOUND
    }

    pub(crate) fn persist_fields(&self) -> PersistedWalker<'_> {
        PersistedWalker {
            state: self.state,
            script_id: self.script_id,
            layout: self.layout,
            nodes: &self.nodes,
            script: &self.script,
            node_index: self.node_index,
            current_node_id: self.current_node_id,
            text_shown: self.text_shown,
            active_speaker: self.active_speaker,
            delay: self.delay,
            home_scene: self.home_scene,
            home_bounds: self.home_bounds,
            exit_mode: self.exit_mode,
            notify_end: self.notify_end,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore_fields(
        &mut self,
        state: WalkerState,
        script_id: u16,
        layout: TableLayout,
        nodes: Vec<DialogueNode>,
        script: Vec<u8>,
        node_index: i32,
        current_node_id: i16,
        text_shown: bool,
        active_speaker: Option<SpeakerHandle>,
        delay: u32,
        home_scene: u16,
        home_bounds: Rect,
        exit_mode: i16,
        notify_end: bool,
    ) {
        self.state = state;
        self.script_id = script_id;
        self.layout = layout;
        self.nodes = nodes;
        self.script = script;
        self.node_index = node_index;
        self.current_node_id = current_node_id;
        self.text_shown = text_shown;
        self.active_speaker = active_speaker;
        self.delay = delay;
        self.home_scene = home_scene;
        self.home_bounds = home_bounds;
        self.exit_mode = exit_mode;
        self.notify_end = notify_end;
        self.lookup = None;
    }
}

pub(crate) struct PersistedWalker<'a> {
    pub state: WalkerState,
    pub script_id: u16,
    pub layout: TableLayout,
    pub nodes: &'a [DialogueNode],
    pub script: &'a [u8],
    pub node_index: i32,
    pub current_node_id: i16,
    pub text_shown: bool,
    pub active_speaker: Option<SpeakerHandle>,
    pub delay: u32,
    pub home_scene: u16,
    pub home_bounds: Rect,
    pub exit_mode: i16,
    pub notify_end: bool,
}
