//! Save/restore of interpreter state.
//!
//! Every mutable field of the sequence interpreter and the conversation
//! walker round-trips through the versioned `caper_save` stream, script
//! buffers included, so execution resumes bit-exactly after a save/load
//! cycle. References are written as opaque handles and revalidated against
//! the live registries on load.

use caper_formats::{ChoiceSlot, DialogueNode, LookupMode, TableLayout};
use caper_save::{HandleId, SaveReader, SaveWriter};

use crate::context::{ActorHandle, Rect, ScriptContext};
use crate::dialogue::{ConversationWalker, WalkerState};
use crate::error::ScriptError;
use crate::sequence::{SequenceInterpreter, SEQUENCE_SLOTS};
use crate::speaker::SpeakerHandle;

/// Stream version that introduced the walker's exit-mode field.
const VERSION_WITH_EXIT_MODE: u16 = 2;

pub trait Persist {
    fn save(&self, out: &mut SaveWriter);
    fn load(&mut self, input: &mut SaveReader<'_>, ctx: &ScriptContext)
        -> Result<(), ScriptError>;
}

fn write_actor(out: &mut SaveWriter, actor: Option<ActorHandle>) {
    out.write_handle(actor.map(|a| HandleId(a.0)).unwrap_or(HandleId::NONE));
}

fn read_actor(
    input: &mut SaveReader<'_>,
    ctx: &ScriptContext,
) -> Result<Option<ActorHandle>, ScriptError> {
    let handle = input.read_handle()?;
    match handle.index() {
        None => Ok(None),
        Some(_) => {
            let actor = ActorHandle(handle.0);
            if !ctx.actors.contains(actor) {
                return Err(ScriptError::DanglingHandle { handle: handle.0 });
            }
            Ok(Some(actor))
        }
    }
}

impl Persist for SequenceInterpreter {
    fn save(&self, out: &mut SaveWriter) {
        let fields = self.persist_fields();
        out.write_u16(fields.resource_id);
        out.write_u32(fields.cursor_pos as u32);
        out.write_bool(fields.keep_active);
        out.write_u8(fields.selected as u8);
        for actor in fields.actors.iter() {
            write_actor(out, *actor);
        }
        out.write_bool(fields.message_shown);
        out.write_u32(fields.delay);
        out.write_bytes(fields.script);
    }

    fn load(
        &mut self,
        input: &mut SaveReader<'_>,
        ctx: &ScriptContext,
    ) -> Result<(), ScriptError> {
        let resource_id = input.read_u16()?;
        let cursor_pos = input.read_u32()? as usize;
        let keep_active = input.read_bool()?;
        let selected = input.read_u8()? as usize;
        let mut actors = [None; SEQUENCE_SLOTS];
        for slot in actors.iter_mut() {
            *slot = read_actor(input, ctx)?;
        }
        let message_shown = input.read_bool()?;
        let delay = input.read_u32()?;
        let script = input.read_bytes()?;

        self.restore_fields(
            resource_id,
            cursor_pos,
            actors,
            selected,
            keep_active,
            message_shown,
            delay,
            script,
        );
        Ok(())
    }
}

fn write_node(out: &mut SaveWriter, node: &DialogueNode) {
    out.write_i16(node.id);
    for &id in &node.callback_ids {
        out.write_i16(id);
    }
    for slot in &node.slots {
        out.write_i16(slot.id);
        out.write_u16(slot.script_offset);
    }
    out.write_u16(node.speaker_offset);
    out.write_u8(lookup_mode_to_raw(node.lookup_mode));
    out.write_i16(node.lookup_value);
    out.write_i16(node.lookup_index);
    out.write_i16(node.exit_mode);
    out.write_i16(node.speaker_mode);
    for &word in &node.lookup_candidates {
        out.write_i16(word);
    }
}

fn read_node(input: &mut SaveReader<'_>) -> Result<DialogueNode, ScriptError> {
    let mut node = DialogueNode::default();
    node.id = input.read_i16()?;
    for id in node.callback_ids.iter_mut() {
        *id = input.read_i16()?;
    }
    for slot in node.slots.iter_mut() {
        *slot = ChoiceSlot {
            id: input.read_i16()?,
            script_offset: input.read_u16()?,
        };
    }
    node.speaker_offset = input.read_u16()?;
    node.lookup_mode = lookup_mode_from_raw(input.read_u8()?);
    node.lookup_value = input.read_i16()?;
    node.lookup_index = input.read_i16()?;
    node.exit_mode = input.read_i16()?;
    node.speaker_mode = input.read_i16()?;
    for word in node.lookup_candidates.iter_mut() {
        *word = input.read_i16()?;
    }
    Ok(node)
}

fn lookup_mode_to_raw(mode: LookupMode) -> u8 {
    match mode {
        LookupMode::None => 0,
        LookupMode::Increment => 1,
        LookupMode::Decrement => 2,
        LookupMode::Assign => 3,
    }
}

fn lookup_mode_from_raw(raw: u8) -> LookupMode {
    match raw {
        1 => LookupMode::Increment,
        2 => LookupMode::Decrement,
        3 => LookupMode::Assign,
        _ => LookupMode::None,
    }
}

fn state_to_raw(state: WalkerState) -> u8 {
    match state {
        WalkerState::Idle => 0,
        WalkerState::Loaded => 1,
        WalkerState::AwaitingChoice => 2,
        WalkerState::Speaking => 3,
        WalkerState::Terminated => 4,
    }
}

fn state_from_raw(raw: u8) -> WalkerState {
    match raw {
        1 => WalkerState::Loaded,
        2 => WalkerState::AwaitingChoice,
        3 => WalkerState::Speaking,
        4 => WalkerState::Terminated,
        _ => WalkerState::Idle,
    }
}

fn layout_to_raw(layout: TableLayout) -> u8 {
    match layout {
        TableLayout::Classic => 0,
        TableLayout::Extended => 1,
    }
}

fn layout_from_raw(raw: u8) -> TableLayout {
    if raw == 1 {
        TableLayout::Extended
    } else {
        TableLayout::Classic
    }
}

impl Persist for ConversationWalker {
    fn save(&self, out: &mut SaveWriter) {
        let fields = self.persist_fields();
        out.write_u8(state_to_raw(fields.state));
        out.write_u16(fields.script_id);
        out.write_u8(layout_to_raw(fields.layout));
        out.write_i32(fields.node_index);
        out.write_i16(fields.current_node_id);
        out.write_bool(fields.text_shown);
        out.write_handle(
            fields
                .active_speaker
                .map(|s| HandleId(s.0))
                .unwrap_or(HandleId::NONE),
        );
        out.write_u32(fields.delay);
        out.write_u16(fields.home_scene);
        out.write_i16(fields.home_bounds.left);
        out.write_i16(fields.home_bounds.top);
        out.write_i16(fields.home_bounds.right);
        out.write_i16(fields.home_bounds.bottom);
        out.write_bool(fields.notify_end);
        // Introduced in stream version 2.
        out.write_i16(fields.exit_mode);

        out.write_u16(fields.nodes.len() as u16);
        for node in fields.nodes {
            write_node(out, node);
        }
        out.write_bytes(fields.script);
    }

    fn load(
        &mut self,
        input: &mut SaveReader<'_>,
        ctx: &ScriptContext,
    ) -> Result<(), ScriptError> {
        let state = state_from_raw(input.read_u8()?);
        let script_id = input.read_u16()?;
        let layout = layout_from_raw(input.read_u8()?);
        let node_index = input.read_i32()?;
        let current_node_id = input.read_i16()?;
        let text_shown = input.read_bool()?;
        let speaker_handle = input.read_handle()?;
        let active_speaker = match speaker_handle.index() {
            None => None,
            Some(_) => {
                let handle = SpeakerHandle(speaker_handle.0);
                if !ctx.speakers.contains(handle) {
                    return Err(ScriptError::DanglingHandle {
                        handle: speaker_handle.0,
                    });
                }
                Some(handle)
            }
        };
        let delay = input.read_u32()?;
        let home_scene = input.read_u16()?;
        let home_bounds = Rect::new(
            input.read_i16()?,
            input.read_i16()?,
            input.read_i16()?,
            input.read_i16()?,
        );
        let notify_end = input.read_bool()?;
        let exit_mode = if input.version() >= VERSION_WITH_EXIT_MODE {
            input.read_i16()?
        } else {
            0
        };

        let node_count = input.read_u16()? as usize;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            nodes.push(read_node(input)?);
        }
        let script = input.read_bytes()?;

        self.restore_fields(
            state,
            script_id,
            layout,
            nodes,
            script,
            node_index,
            current_node_id,
            text_shown,
            active_speaker,
            delay,
            home_scene,
            home_bounds,
            exit_mode,
            notify_end,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caper_formats::encode_table;

    use crate::context::{ResourceKind, ScriptContext, TitleConfig};
    use crate::dialogue::ConversationOutcome;
    use crate::headless::{build_context, Journal, MemoryResources, ScriptedEvents};
    use crate::sequence::{SequenceOutcome, WaitKind, OPCODE_BIAS};
    use crate::speaker::Speaker;

    const SEQ_ID: u16 = 42;
    const STRIP_ID: u16 = 350;

    fn seq_script(ops: &[&[u16]]) -> Vec<u8> {
        let mut out = Vec::new();
        for op in ops {
            out.extend_from_slice(&(op[0] + OPCODE_BIAS).to_le_bytes());
            for &word in &op[1..] {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        out
    }

    struct Blob {
        bytes: Vec<u8>,
    }

    impl Blob {
        fn new() -> Self {
            Blob { bytes: vec![0] }
        }

        fn add(&mut self, text: &str) -> u16 {
            let offset = self.bytes.len() as u16;
            self.bytes.extend_from_slice(text.as_bytes());
            self.bytes.push(0);
            offset
        }
    }

    fn dialogue_node(id: i16, speaker_offset: u16, slots: &[(i16, u16)]) -> DialogueNode {
        let mut node = DialogueNode {
            id,
            speaker_offset,
            ..DialogueNode::default()
        };
        for (index, &(slot_id, offset)) in slots.iter().enumerate() {
            node.slots[index] = ChoiceSlot {
                id: slot_id,
                script_offset: offset,
            };
        }
        node
    }

    fn sequence_fixture(bytes: Vec<u8>, actors: usize) -> (ScriptContext, Journal) {
        let mut resources = MemoryResources::new();
        resources.insert(ResourceKind::Sequence, SEQ_ID, 0, bytes);
        build_context(
            TitleConfig::classic(),
            resources,
            ScriptedEvents::new(),
            100,
            actors,
        )
    }

    fn conversation_resources(nodes: &[DialogueNode], blob: &Blob) -> MemoryResources {
        let mut resources = MemoryResources::new();
        resources.insert(
            ResourceKind::Strip,
            STRIP_ID,
            1,
            encode_table(nodes, TableLayout::Classic),
        );
        resources.insert(ResourceKind::Strip, STRIP_ID, 2, blob.bytes.clone());
        resources
    }

    fn conversation_fixture(nodes: &[DialogueNode], blob: &Blob) -> (ScriptContext, Journal) {
        let (mut ctx, journal) = build_context(
            TitleConfig::classic(),
            conversation_resources(nodes, blob),
            ScriptedEvents::new(),
            100,
            2,
        );
        ctx.speakers.add_speaker(Speaker::new("QUINN")).unwrap();
        (ctx, journal)
    }

    #[test]
    fn sequence_state_round_trips_bit_exactly() {
        let bytes = seq_script(&[&[12, 30], &[19, 123], &[0]]);
        let (mut ctx_a, _journal_a) = sequence_fixture(bytes.clone(), 2);
        let mut original = SequenceInterpreter::new();
        original
            .attach(&mut ctx_a, SEQ_ID, [Some(ActorHandle(0)), Some(ActorHandle(1)), None, None, None, None])
            .unwrap();
        assert_eq!(
            original.step(&mut ctx_a).unwrap(),
            SequenceOutcome::Waiting(WaitKind::Delay(30))
        );

        let mut writer = SaveWriter::new();
        original.save(&mut writer);
        let saved = writer.into_bytes();

        let (mut ctx_b, journal_b) = sequence_fixture(bytes, 2);
        let mut restored = SequenceInterpreter::new();
        let mut reader = SaveReader::open(&saved).unwrap();
        restored.load(&mut reader, &ctx_b).unwrap();

        // Re-serializing the loaded interpreter reproduces the stream.
        let mut writer = SaveWriter::new();
        restored.save(&mut writer);
        assert_eq!(writer.into_bytes(), saved);

        // The loaded interpreter resumes exactly where the save happened.
        assert_eq!(restored.delay(), 30);
        for _ in 0..30 {
            restored.tick();
        }
        assert_eq!(restored.step(&mut ctx_b).unwrap(), SequenceOutcome::Finished);
        assert!(journal_b.borrow().iter().any(|entry| matches!(
            entry,
            crate::headless::JournalEntry::ActorOp { actor: 0, op } if op == "visage 123"
        )));
    }

    #[test]
    fn walker_round_trip_preserves_the_transition_sequence() {
        let mut blob = Blob::new();
        let t1 = blob.add("FIRST LINE HERE");
        let t2 = blob.add("SECOND LINE HERE");
        let t3 = blob.add("THIRD AND LAST");
        let quinn = blob.add("QUINN");
        let nodes = vec![
            dialogue_node(1, quinn, &[(2, t1)]),
            dialogue_node(2, quinn, &[(3, t2)]),
            dialogue_node(3, quinn, &[(10000, t3)]),
        ];

        // Uninterrupted run: process node 1, then capture the rest.
        let (mut ctx_a, journal_a) = conversation_fixture(&nodes, &blob);
        let mut original = ConversationWalker::new();
        original.start(&mut ctx_a, STRIP_ID, true);
        original.signal(&mut ctx_a).expect("node 1");

        let mut writer = SaveWriter::new();
        original.save(&mut writer);
        let saved = writer.into_bytes();

        let mark_a = journal_a.borrow().len();
        let mut outcomes_a = Vec::new();
        loop {
            let outcome = original.signal(&mut ctx_a).expect("signal");
            let done = outcome == ConversationOutcome::Finished;
            outcomes_a.push((outcome, original.current_node_id()));
            if done {
                break;
            }
        }

        // Restored run from the mid-conversation stream.
        let (mut ctx_b, journal_b) = conversation_fixture(&nodes, &blob);
        let mut restored = ConversationWalker::new();
        let mut reader = SaveReader::open(&saved).unwrap();
        restored.load(&mut reader, &ctx_b).unwrap();

        let mut writer = SaveWriter::new();
        restored.save(&mut writer);
        assert_eq!(writer.into_bytes(), saved);

        let mark_b = journal_b.borrow().len();
        let mut outcomes_b = Vec::new();
        loop {
            let outcome = restored.signal(&mut ctx_b).expect("signal");
            let done = outcome == ConversationOutcome::Finished;
            outcomes_b.push((outcome, restored.current_node_id()));
            if done {
                break;
            }
        }

        assert_eq!(outcomes_a, outcomes_b);
        assert_eq!(
            journal_a.borrow()[mark_a..],
            journal_b.borrow()[mark_b..],
            "speaker/text transitions diverged after restore"
        );
    }

    #[test]
    fn older_stream_version_skips_the_exit_mode_field() {
        let mut blob = Blob::new();
        let t1 = blob.add("ONLY LINE");
        let quinn = blob.add("QUINN");
        let nodes = vec![dialogue_node(1, quinn, &[(10000, t1)])];
        let (ctx, _journal) = conversation_fixture(&nodes, &blob);

        let mut walker = ConversationWalker::new();
        walker.restore_fields(
            WalkerState::Speaking,
            STRIP_ID,
            TableLayout::Classic,
            nodes,
            blob.bytes.clone(),
            0,
            1,
            false,
            None,
            7,
            100,
            Rect::new(0, 0, 320, 200),
            5,
            true,
        );

        let mut writer = SaveWriter::new();
        walker.save(&mut writer);
        let mut bytes = writer.into_bytes();

        // Rewrite the stream as version 1: drop the exit-mode word that
        // version 2 appended after the fixed walker fields (6-byte header +
        // 30 bytes of fields).
        bytes[4..6].copy_from_slice(&1u16.to_le_bytes());
        bytes.drain(36..38);

        let mut restored = ConversationWalker::new();
        let mut reader = SaveReader::open(&bytes).unwrap();
        assert_eq!(reader.version(), 1);
        restored.load(&mut reader, &ctx).unwrap();

        // The gated field is left at its default; everything else survives.
        assert_eq!(restored.exit_mode(), 0);
        assert_eq!(restored.script_id(), STRIP_ID);
        assert_eq!(restored.current_node_id(), 1);
        assert_eq!(restored.delay(), 7);
        assert_eq!(restored.state(), WalkerState::Speaking);
    }

    #[test]
    fn dangling_speaker_reference_fails_the_load() {
        let mut blob = Blob::new();
        let t1 = blob.add("ONLY LINE");
        let quinn = blob.add("QUINN");
        let nodes = vec![dialogue_node(1, quinn, &[(10000, t1)])];

        let mut walker = ConversationWalker::new();
        walker.restore_fields(
            WalkerState::Speaking,
            STRIP_ID,
            TableLayout::Classic,
            nodes.clone(),
            blob.bytes.clone(),
            0,
            1,
            true,
            Some(SpeakerHandle(7)),
            0,
            100,
            Rect::new(0, 0, 320, 200),
            0,
            false,
        );
        let mut writer = SaveWriter::new();
        walker.save(&mut writer);
        let saved = writer.into_bytes();

        // A context with no registered speakers cannot resolve handle 7.
        let (ctx, _journal) = build_context(
            TitleConfig::classic(),
            conversation_resources(&nodes, &blob),
            ScriptedEvents::new(),
            100,
            0,
        );
        let mut restored = ConversationWalker::new();
        let mut reader = SaveReader::open(&saved).unwrap();
        assert!(matches!(
            restored.load(&mut reader, &ctx),
            Err(ScriptError::DanglingHandle { handle: 7 })
        ));
    }

    #[test]
    fn dangling_actor_reference_fails_the_load() {
        let bytes = seq_script(&[&[0]]);
        let (mut ctx_a, _journal) = sequence_fixture(bytes.clone(), 3);
        let mut original = SequenceInterpreter::new();
        original
            .attach(
                &mut ctx_a,
                SEQ_ID,
                [Some(ActorHandle(2)), None, None, None, None, None],
            )
            .unwrap();
        let mut writer = SaveWriter::new();
        original.save(&mut writer);
        let saved = writer.into_bytes();

        // The restoring session has no actor 2.
        let (ctx_b, _journal) = sequence_fixture(bytes, 1);
        let mut restored = SequenceInterpreter::new();
        let mut reader = SaveReader::open(&saved).unwrap();
        assert!(matches!(
            restored.load(&mut reader, &ctx_b),
            Err(ScriptError::DanglingHandle { handle: 2 })
        ));
    }
}
