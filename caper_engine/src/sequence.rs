//! Cutscene bytecode interpreter.
//!
//! A sequence script is a flat stream of 16-bit words: a selector biased by
//! [`OPCODE_BIAS`] followed by zero to six operands, with the operand count
//! fixed per selector. `step` executes instructions until the script yields
//! (delay, completion wait, or hand-off) or finishes; the host resumes it
//! from its own frame clock or completion events.

use log::debug;

use caper_formats::ScriptCursor;

use crate::context::{
    ActorHandle, AnimMode, InputEvent, MoverKind, Point, ResourceKind, ScriptContext, TextAlign,
    TextSlot, TextSpec,
};
use crate::error::ScriptError;
use crate::speaker::dwell_frames;

/// Bias applied to opcode selectors in the wire format, keeping them
/// visually distinct from flow-control offsets in authored data.
pub const OPCODE_BIAS: u16 = 32000;

/// Actor slots addressable by a sequence script.
pub const SEQUENCE_SLOTS: usize = 6;

/// What the interpreter is waiting on after a yielding `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Resume when the delay counter reaches zero on the host frame clock.
    Delay(u32),
    /// Resume when the armed actor animation completes.
    Animation,
    /// Resume when the armed mover reaches its destination.
    Mover,
    /// Resume when the armed sound cue finishes.
    Sound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    Waiting(WaitKind),
    /// Natural completion: stop opcode or buffer exhaustion.
    Finished,
    /// Hand control to a conversation for the given script id.
    StartConversation { id: u16 },
    /// Start a nested sequence on the given actors; with `notify` set the
    /// host steps this interpreter again once the nested sequence finishes.
    StartSequence {
        id: u16,
        actors: [Option<ActorHandle>; SEQUENCE_SLOTS],
        notify: bool,
    },
}

#[derive(Default)]
pub struct SequenceInterpreter {
    resource_id: u16,
    script: Vec<u8>,
    cursor: ScriptCursor,
    actors: [Option<ActorHandle>; SEQUENCE_SLOTS],
    selected: usize,
    keep_active: bool,
    message_shown: bool,
    delay: u32,
}

impl SequenceInterpreter {
    pub fn new() -> Self {
        SequenceInterpreter::default()
    }

    pub fn is_active(&self) -> bool {
        !self.script.is_empty()
    }

    pub fn resource_id(&self) -> u16 {
        self.resource_id
    }

    pub fn keep_active(&self) -> bool {
        self.keep_active
    }

    /// Keeps the script data alive across a natural stop, and suppresses
    /// scripted sub-conversations while set.
    pub fn set_keep_active(&mut self, keep: bool) {
        self.keep_active = keep;
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Per-frame clock: counts the resume delay down and reports whether the
    /// interpreter may be stepped again.
    pub fn tick(&mut self) -> bool {
        if self.delay > 0 {
            self.delay -= 1;
        }
        self.delay == 0
    }

    /// Loads a sequence script and binds the six actor slots. Slot
    /// references in the wire format are resolved against this array.
    pub fn attach(
        &mut self,
        ctx: &mut ScriptContext,
        resource_id: u16,
        actors: [Option<ActorHandle>; SEQUENCE_SLOTS],
    ) -> Result<(), ScriptError> {
        let data = ctx
            .resources
            .resource(ResourceKind::Sequence, resource_id, 0)?;
        debug!(
            "sequence {resource_id}: attached {} bytes, {} actors",
            data.len(),
            actors.iter().flatten().count()
        );

        self.script = data;
        self.resource_id = resource_id;
        self.cursor.reset();
        self.actors = actors;
        self.selected = 0;
        self.keep_active = false;
        self.message_shown = false;
        self.delay = 0;
        Ok(())
    }

    /// Executes instructions until the script yields or finishes. On any
    /// error the interpreter stops cleanly (text removed, slots cleared)
    /// before the error propagates.
    pub fn step(&mut self, ctx: &mut ScriptContext) -> Result<SequenceOutcome, ScriptError> {
        match self.run(ctx) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.abort(ctx);
                Err(err)
            }
        }
    }

    /// Input routing: a button, key, or custom action while an inline
    /// message is shown dismisses the message and resumes shortly after.
    /// Returns whether the event was consumed.
    pub fn on_event(&mut self, ctx: &mut ScriptContext, event: InputEvent) -> bool {
        let dismisses = matches!(
            event,
            InputEvent::ButtonDown(_) | InputEvent::Key(_) | InputEvent::Custom(_)
        );
        if dismisses && self.message_shown {
            ctx.text.remove(TextSlot::SequenceMessage);
            self.message_shown = false;
            self.delay = 2;
            true
        } else {
            false
        }
    }

    fn run(&mut self, ctx: &mut ScriptContext) -> Result<SequenceOutcome, ScriptError> {
        if self.message_shown {
            ctx.text.remove(TextSlot::SequenceMessage);
            self.message_shown = false;
        }

        loop {
            if self.cursor.at_end(&self.script) {
                return Ok(self.finish(ctx));
            }

            let at = self.cursor.pos();
            let opcode = self.next_value()?.wrapping_sub(OPCODE_BIAS);

            match opcode {
                0 => return Ok(self.finish(ctx)),
                1 => self.animate(ctx, AnimMode::Directed, &[], false)?,
                2 => self.animate(ctx, AnimMode::Loop, &[], false)?,
                3 => self.animate(ctx, AnimMode::Sway, &[], false)?,
                4 => {
                    let count = self.next_value()? as i16;
                    let notify = self.next_value()? != 0;
                    self.animate(ctx, AnimMode::RepeatCount, &[count], notify)?;
                    if notify {
                        return Ok(SequenceOutcome::Waiting(WaitKind::Animation));
                    }
                }
                5 => {
                    let count = self.next_value()? as i16;
                    let notify = self.next_value()? != 0;
                    self.animate(ctx, AnimMode::ForwardCount, &[count], notify)?;
                    if notify {
                        return Ok(SequenceOutcome::Waiting(WaitKind::Animation));
                    }
                }
                6 => {
                    let notify = self.next_value()? != 0;
                    self.animate(ctx, AnimMode::ForwardOnce, &[], notify)?;
                    if notify {
                        return Ok(SequenceOutcome::Waiting(WaitKind::Animation));
                    }
                }
                7 => {
                    let notify = self.next_value()? != 0;
                    self.animate(ctx, AnimMode::BackwardOnce, &[], notify)?;
                    if notify {
                        return Ok(SequenceOutcome::Waiting(WaitKind::Animation));
                    }
                }
                8 => {
                    let first = self.next_value()? as i16;
                    let last = self.next_value()? as i16;
                    let notify = self.next_value()? != 0;
                    self.animate(ctx, AnimMode::FrameRange, &[first, last], notify)?;
                    if notify {
                        return Ok(SequenceOutcome::Waiting(WaitKind::Animation));
                    }
                }
                9 => {
                    let scene = self.next_value()?;
                    let x = self.next_value()? as i16;
                    let y = self.next_value()? as i16;
                    let mut bounds = ctx.scene.bounds();
                    bounds.move_to(Point::new(x, y));
                    ctx.scene.set_bounds(bounds);
                    ctx.scene.load_scene(scene);
                }
                10 => {
                    let res = self.next_value()?;
                    let line = self.next_value()?;
                    let color = self.next_value()? as u8;
                    let x = self.next_value()? as i16;
                    let y = self.next_value()? as i16;
                    let width = self.next_value()? as i16;
                    let delay =
                        self.show_message(ctx, res, line, 2, [color, 0, 0], Point::new(x, y), width)?;
                    self.delay = delay;
                    return Ok(SequenceOutcome::Waiting(WaitKind::Delay(delay)));
                }
                11 => {
                    let id = self.next_value()?;
                    let notify = self.next_value()? != 0;
                    let mut actors = [None; SEQUENCE_SLOTS];
                    actors[..4].copy_from_slice(&self.actors[..4]);
                    return Ok(SequenceOutcome::StartSequence { id, actors, notify });
                }
                12 => {
                    let frames = self.next_value()? as u32;
                    self.delay = frames;
                    return Ok(SequenceOutcome::Waiting(WaitKind::Delay(frames)));
                }
                13 => {
                    let x = self.next_value()? as i16;
                    let y = self.next_value()? as i16;
                    let notify = self.next_value()? != 0;
                    let actor = self.selected_actor(at)?;
                    ctx.actors
                        .add_mover(actor, MoverKind::Npc, Point::new(x, y), notify);
                    if notify {
                        return Ok(SequenceOutcome::Waiting(WaitKind::Mover));
                    }
                }
                14 => {
                    let count = self.next_value()? as i16;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_frame_count(actor, count);
                }
                15 => {
                    let rate = self.next_value()? as i16;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_move_rate(actor, rate);
                }
                16 => {
                    let dx = self.next_value()? as i16;
                    let dy = self.next_value()? as i16;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_move_delta(actor, Point::new(dx, dy));
                }
                17 => {
                    let actor = self.selected_actor(at)?;
                    ctx.actors.hide(actor);
                }
                18 => {
                    let actor = self.selected_actor(at)?;
                    ctx.actors.show(actor);
                }
                19 => {
                    let visage = self.next_value()?;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_visage(actor, visage);
                }
                20 => {
                    let strip = self.next_value()? as i16;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_strip(actor, strip);
                }
                21 => {
                    let frame = self.next_value()? as i16;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_frame(actor, frame);
                }
                22 => {
                    let priority = self.next_value()? as i16;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_priority(actor, priority);
                }
                23 => {
                    let zoom = self.next_value()? as i16;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_zoom(actor, zoom);
                }
                24 => {
                    let x = self.next_value()? as i16;
                    let y = self.next_value()? as i16;
                    let strip = self.next_value()? as i16;
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_position(actor, Point::new(x, y), strip);
                }
                25 => {
                    let y_start = self.next_value()? as i16;
                    let min_percent = self.next_value()? as i16;
                    let y_end = self.next_value()? as i16;
                    let max_percent = self.next_value()? as i16;
                    ctx.scene
                        .set_zoom_percents(y_start, min_percent, y_end, max_percent);
                }
                26 => {
                    let sound = self.next_value()?;
                    let notify = self.next_value()? != 0;
                    ctx.sound.play(sound, 127, notify);
                    if notify {
                        return Ok(SequenceOutcome::Waiting(WaitKind::Sound));
                    }
                }
                27 => {
                    let x = self.next_value()? as i16;
                    let y = self.next_value()? as i16;
                    let notify = self.next_value()? != 0;
                    let actor = self.selected_actor(at)?;
                    ctx.actors
                        .add_mover(actor, MoverKind::Player, Point::new(x, y), notify);
                    if notify {
                        return Ok(SequenceOutcome::Waiting(WaitKind::Mover));
                    }
                }
                28 => {
                    let slot = self.next_value()? as usize;
                    if slot >= SEQUENCE_SLOTS {
                        return Err(ScriptError::malformed(
                            format!("actor slot {slot} out of range"),
                            at,
                        ));
                    }
                    if self.actors[slot].is_none() {
                        return Err(ScriptError::malformed(
                            format!("actor slot {slot} is empty"),
                            at,
                        ));
                    }
                    self.selected = slot;
                }
                29 => self.animate(ctx, AnimMode::None, &[], false)?,
                30 => {
                    let slot = self.next_value()? as i16;
                    let follower = if slot == -1 {
                        None
                    } else {
                        *self.actors.get(slot as usize).ok_or_else(|| {
                            ScriptError::malformed(
                                format!("scroll-follower slot {slot} out of range"),
                                at,
                            )
                        })?
                    };
                    ctx.scene.set_scroll_follower(follower);
                }
                31 => {
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_wrapper(actor, true);
                }
                32 => {
                    let actor = self.selected_actor(at)?;
                    ctx.actors.set_wrapper(actor, false);
                }
                33 => {
                    let id = self.next_value()?;
                    if self.keep_active {
                        self.delay = 1;
                        return Ok(SequenceOutcome::Waiting(WaitKind::Delay(1)));
                    }
                    return Ok(SequenceOutcome::StartConversation { id });
                }
                34 => {
                    let id = self.next_value()?;
                    let notify = self.next_value()? != 0;
                    let mut actors = [None; SEQUENCE_SLOTS];
                    for slot in actors.iter_mut() {
                        // Slot references are 1-based on the wire; 0 leaves
                        // the slot unset.
                        let raw = self.next_value()? as i16 - 1;
                        *slot = if (0..SEQUENCE_SLOTS as i16).contains(&raw) {
                            self.actors[raw as usize]
                        } else {
                            None
                        };
                    }
                    return Ok(SequenceOutcome::StartSequence { id, actors, notify });
                }
                35 => {
                    let slot = self.next_value()? as usize;
                    let target = self
                        .actors
                        .get(slot)
                        .copied()
                        .flatten()
                        .ok_or_else(|| {
                            ScriptError::malformed(format!("angle target slot {slot} is empty"), at)
                        })?;
                    let toward = ctx.actors.position(target);
                    let actor = self.selected_actor(at)?;
                    ctx.actors.update_angle(actor, toward);
                }
                36 => self.animate(ctx, AnimMode::Mirrored, &[], false)?,
                37 => {
                    let a = self.next_value()? as i16;
                    let b = self.next_value()? as i16;
                    if let Some(callbacks) = ctx.callbacks.as_mut() {
                        callbacks.sequence_callback(a, b);
                    }
                }
                38 => {
                    let res = self.next_value()?;
                    let line = self.next_value()?;
                    let font = self.next_value()?;
                    let color1 = self.next_value()? as u8;
                    let color2 = self.next_value()? as u8;
                    let color3 = self.next_value()? as u8;
                    let x = self.next_value()? as i16;
                    let y = self.next_value()? as i16;
                    let width = self.next_value()? as i16;
                    let delay = self.show_message(
                        ctx,
                        res,
                        line,
                        font,
                        [color1, color2, color3],
                        Point::new(x, y),
                        width,
                    )?;
                    self.delay = delay;
                    return Ok(SequenceOutcome::Waiting(WaitKind::Delay(delay)));
                }
                unknown => {
                    return Err(ScriptError::malformed(
                        format!("unknown opcode {unknown}"),
                        at,
                    ));
                }
            }
        }
    }

    fn next_value(&mut self) -> Result<u16, ScriptError> {
        let at = self.cursor.pos();
        self.cursor
            .next_u16(&self.script)
            .ok_or_else(|| ScriptError::malformed("cursor overran script buffer", at))
    }

    fn selected_actor(&self, at: usize) -> Result<ActorHandle, ScriptError> {
        self.actors[self.selected].ok_or_else(|| {
            ScriptError::malformed(format!("selected actor slot {} is empty", self.selected), at)
        })
    }

    fn animate(
        &mut self,
        ctx: &mut ScriptContext,
        mode: AnimMode,
        args: &[i16],
        notify: bool,
    ) -> Result<(), ScriptError> {
        let actor = self.selected_actor(self.cursor.pos())?;
        ctx.actors.animate(actor, mode, args, notify);
        Ok(())
    }

    fn show_message(
        &mut self,
        ctx: &mut ScriptContext,
        res: u16,
        line: u16,
        font: u16,
        colors: [u8; 3],
        pos: Point,
        width: i16,
    ) -> Result<u32, ScriptError> {
        let msg = ctx.resources.message(res, line)?;

        let mut rect = ctx.text.measure(&msg, width);
        let mut fence = ctx.scene.bounds();
        fence.collapse(4, 2);
        rect.move_to(pos);
        rect.contain(fence);

        ctx.text.show(
            TextSlot::SequenceMessage,
            &TextSpec {
                text: msg.clone(),
                pos: Point::new(rect.left, rect.top),
                width,
                font,
                colors,
                align: TextAlign::Left,
                priority: 255,
            },
        );
        self.message_shown = true;

        Ok(dwell_frames(&msg))
    }

    fn finish(&mut self, ctx: &mut ScriptContext) -> SequenceOutcome {
        debug!("sequence {} finished", self.resource_id);
        if self.message_shown {
            ctx.text.remove(TextSlot::SequenceMessage);
            self.message_shown = false;
        }
        if !self.keep_active {
            self.script.clear();
            self.cursor.reset();
            self.actors = [None; SEQUENCE_SLOTS];
            self.selected = 0;
        }
        SequenceOutcome::Finished
    }

    fn abort(&mut self, ctx: &mut ScriptContext) {
        if self.message_shown {
            ctx.text.remove(TextSlot::SequenceMessage);
            self.message_shown = false;
        }
        self.script.clear();
        self.cursor.reset();
        self.actors = [None; SEQUENCE_SLOTS];
        self.selected = 0;
        self.delay = 0;
    }

    pub(crate) fn persist_fields(&self) -> PersistedSequence<'_> {
        PersistedSequence {
            resource_id: self.resource_id,
            cursor_pos: self.cursor.pos(),
            actors: &self.actors,
            selected: self.selected,
            keep_active: self.keep_active,
            message_shown: self.message_shown,
            delay: self.delay,
            script: &self.script,
        }
    }

    pub(crate) fn restore_fields(
        &mut self,
        resource_id: u16,
        cursor_pos: usize,
        actors: [Option<ActorHandle>; SEQUENCE_SLOTS],
        selected: usize,
        keep_active: bool,
        message_shown: bool,
        delay: u32,
        script: Vec<u8>,
    ) {
        self.resource_id = resource_id;
        self.script = script;
        self.cursor.reset();
        self.cursor.set_pos(cursor_pos);
        self.actors = actors;
        self.selected = selected;
        self.keep_active = keep_active;
        self.message_shown = message_shown;
        self.delay = delay;
    }
}

pub(crate) struct PersistedSequence<'a> {
    pub resource_id: u16,
    pub cursor_pos: usize,
    pub actors: &'a [Option<ActorHandle>; SEQUENCE_SLOTS],
    pub selected: usize,
    pub keep_active: bool,
    pub message_shown: bool,
    pub delay: u32,
    pub script: &'a [u8],
}
