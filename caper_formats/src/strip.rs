use std::io::Cursor;

use anyhow::{ensure, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

/// Successor slots per dialogue node; unused slots carry id 0.
pub const CHOICE_SLOTS: usize = 6;

/// Callback ids fired in order on traversal; a zero id terminates the list.
pub const CALLBACK_SLOTS: usize = 5;

/// Lookup-candidate words in the extended layout: slot 0 selects the lookup
/// table entry, slots 1..11 carry the candidate node id per lookup value.
pub const LOOKUP_CANDIDATES: usize = 11;

const CLASSIC_RECORD_SIZE: usize = 78;
const EXTENDED_RECORD_SIZE: usize = 106;

/// Wire layout of a dialogue node table. Resolved once from the running
/// title when the table resource is loaded; the decoded [`DialogueNode`] is
/// layout-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TableLayout {
    Classic,
    Extended,
}

impl TableLayout {
    pub fn record_size(self) -> usize {
        match self {
            TableLayout::Classic => CLASSIC_RECORD_SIZE,
            TableLayout::Extended => EXTENDED_RECORD_SIZE,
        }
    }
}

/// How a node mutates its entry in the external conditional-selection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LookupMode {
    #[default]
    None,
    Increment,
    Decrement,
    Assign,
}

impl LookupMode {
    fn from_raw(raw: i16) -> Self {
        match raw {
            1 => LookupMode::Increment,
            2 => LookupMode::Decrement,
            3 => LookupMode::Assign,
            _ => LookupMode::None,
        }
    }
}

/// One successor slot: the target node id plus the byte offset of the
/// candidate display text in the companion script blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChoiceSlot {
    pub id: i16,
    pub script_offset: u16,
}

impl ChoiceSlot {
    /// A slot is unused only when both fields are zero; a zero id with a
    /// real text offset is a candidate whose successor is unresolved.
    pub fn is_unused(&self) -> bool {
        self.id == 0 && self.script_offset == 0
    }
}

/// A decoded dialogue branch node, independent of wire layout.
///
/// Classic-layout tables leave the conditional-selection fields at their
/// defaults (`LookupMode::None`, zeroed candidates).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueNode {
    pub id: i16,
    pub callback_ids: [i16; CALLBACK_SLOTS],
    pub slots: [ChoiceSlot; CHOICE_SLOTS],
    pub speaker_offset: u16,
    pub lookup_mode: LookupMode,
    pub lookup_value: i16,
    pub lookup_index: i16,
    pub exit_mode: i16,
    pub speaker_mode: i16,
    pub lookup_candidates: [i16; LOOKUP_CANDIDATES],
}

impl Default for DialogueNode {
    fn default() -> Self {
        DialogueNode {
            id: 0,
            callback_ids: [0; CALLBACK_SLOTS],
            slots: [ChoiceSlot::default(); CHOICE_SLOTS],
            speaker_offset: 0,
            lookup_mode: LookupMode::None,
            lookup_value: 0,
            lookup_index: 0,
            exit_mode: 0,
            speaker_mode: 0,
            lookup_candidates: [0; LOOKUP_CANDIDATES],
        }
    }
}

/// Decodes a node table resource. The resource length must be an exact
/// multiple of the layout's record size.
pub fn parse_node_table(data: &[u8], layout: TableLayout) -> Result<Vec<DialogueNode>> {
    let record_size = layout.record_size();
    ensure!(
        data.len() % record_size == 0,
        "node table length {} is not a multiple of the {record_size}-byte record",
        data.len()
    );

    let mut nodes = Vec::with_capacity(data.len() / record_size);
    for (index, record) in data.chunks_exact(record_size).enumerate() {
        let node = match layout {
            TableLayout::Classic => parse_classic_record(record),
            TableLayout::Extended => parse_extended_record(record),
        }
        .with_context(|| format!("decoding node record {index}"))?;
        nodes.push(node);
    }

    Ok(nodes)
}

fn parse_classic_record(record: &[u8]) -> Result<DialogueNode> {
    let mut cursor = Cursor::new(record);
    let mut node = DialogueNode {
        id: cursor.read_i16::<LittleEndian>()?,
        ..DialogueNode::default()
    };
    for slot in node.callback_ids.iter_mut() {
        *slot = cursor.read_i16::<LittleEndian>()?;
    }
    // Four reserved bytes in the classic layout.
    cursor.read_u32::<LittleEndian>()?;
    read_choice_slots(&mut cursor, &mut node.slots)?;
    node.speaker_offset = cursor.read_u16::<LittleEndian>()?;
    Ok(node)
}

fn parse_extended_record(record: &[u8]) -> Result<DialogueNode> {
    let mut cursor = Cursor::new(record);
    let mut node = DialogueNode::default();
    node.lookup_mode = LookupMode::from_raw(cursor.read_i16::<LittleEndian>()?);
    node.lookup_value = cursor.read_i16::<LittleEndian>()?;
    node.lookup_index = cursor.read_i16::<LittleEndian>()?;
    node.exit_mode = cursor.read_i16::<LittleEndian>()?;
    node.speaker_mode = cursor.read_i16::<LittleEndian>()?;
    node.id = cursor.read_i16::<LittleEndian>()?;
    for slot in node.callback_ids.iter_mut() {
        *slot = cursor.read_i16::<LittleEndian>()?;
    }
    for slot in node.lookup_candidates.iter_mut() {
        *slot = cursor.read_i16::<LittleEndian>()?;
    }
    read_choice_slots(&mut cursor, &mut node.slots)?;
    node.speaker_offset = cursor.read_u16::<LittleEndian>()?;
    Ok(node)
}

fn read_choice_slots(
    cursor: &mut Cursor<&[u8]>,
    slots: &mut [ChoiceSlot; CHOICE_SLOTS],
) -> Result<()> {
    for slot in slots.iter_mut() {
        slot.id = cursor.read_i16::<LittleEndian>()?;
        slot.script_offset = cursor.read_u16::<LittleEndian>()?;
        // Six reserved bytes per slot.
        cursor.read_u32::<LittleEndian>()?;
        cursor.read_u16::<LittleEndian>()?;
    }
    Ok(())
}

/// Encodes a node back into its wire record. Counterpart of the decoders,
/// used by authoring tools and round-trip tests.
pub fn encode_node(node: &DialogueNode, layout: TableLayout) -> Vec<u8> {
    let mut out = Vec::with_capacity(layout.record_size());
    if layout == TableLayout::Extended {
        let mode = match node.lookup_mode {
            LookupMode::None => 0i16,
            LookupMode::Increment => 1,
            LookupMode::Decrement => 2,
            LookupMode::Assign => 3,
        };
        out.extend_from_slice(&mode.to_le_bytes());
        out.extend_from_slice(&node.lookup_value.to_le_bytes());
        out.extend_from_slice(&node.lookup_index.to_le_bytes());
        out.extend_from_slice(&node.exit_mode.to_le_bytes());
        out.extend_from_slice(&node.speaker_mode.to_le_bytes());
    }
    out.extend_from_slice(&node.id.to_le_bytes());
    for id in &node.callback_ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    match layout {
        TableLayout::Classic => out.extend_from_slice(&[0u8; 4]),
        TableLayout::Extended => {
            for word in &node.lookup_candidates {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
    }
    for slot in &node.slots {
        out.extend_from_slice(&slot.id.to_le_bytes());
        out.extend_from_slice(&slot.script_offset.to_le_bytes());
        out.extend_from_slice(&[0u8; 6]);
    }
    out.extend_from_slice(&node.speaker_offset.to_le_bytes());
    debug_assert_eq!(out.len(), layout.record_size());
    out
}

pub fn encode_table(nodes: &[DialogueNode], layout: TableLayout) -> Vec<u8> {
    nodes
        .iter()
        .flat_map(|node| encode_node(node, layout))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> DialogueNode {
        let mut node = DialogueNode {
            id: 5,
            speaker_offset: 0x40,
            ..DialogueNode::default()
        };
        node.callback_ids[0] = 12;
        node.callback_ids[1] = 7;
        node.slots[0] = ChoiceSlot {
            id: 5,
            script_offset: 0x10,
        };
        node.slots[1] = ChoiceSlot {
            id: 9,
            script_offset: 0x22,
        };
        node
    }

    #[test]
    fn classic_record_round_trips() {
        let node = sample_node();
        let bytes = encode_node(&node, TableLayout::Classic);
        assert_eq!(bytes.len(), TableLayout::Classic.record_size());

        let parsed = parse_node_table(&bytes, TableLayout::Classic).expect("parse");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], node);
        assert_eq!(parsed[0].lookup_mode, LookupMode::None);
    }

    #[test]
    fn extended_record_carries_selection_metadata() {
        let mut node = sample_node();
        node.lookup_mode = LookupMode::Assign;
        node.lookup_value = 3;
        node.lookup_index = 2;
        node.exit_mode = 1;
        node.speaker_mode = 4;
        node.lookup_candidates[0] = 2;
        node.lookup_candidates[1] = 9;

        let bytes = encode_node(&node, TableLayout::Extended);
        assert_eq!(bytes.len(), TableLayout::Extended.record_size());

        let parsed = parse_node_table(&bytes, TableLayout::Extended).expect("parse");
        assert_eq!(parsed[0], node);
    }

    #[test]
    fn rejects_misaligned_table() {
        let mut bytes = encode_node(&sample_node(), TableLayout::Classic);
        bytes.push(0);
        assert!(parse_node_table(&bytes, TableLayout::Classic).is_err());
    }

    #[test]
    fn parses_multi_node_table_in_order() {
        let mut second = sample_node();
        second.id = 9;
        let table = encode_table(&[sample_node(), second], TableLayout::Classic);

        let parsed = parse_node_table(&table, TableLayout::Classic).expect("parse");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].id, 5);
        assert_eq!(parsed[1].id, 9);
    }

    #[test]
    fn unknown_lookup_mode_decodes_as_none() {
        let mut node = sample_node();
        node.lookup_mode = LookupMode::None;
        let mut bytes = encode_node(&node, TableLayout::Extended);
        // Stamp an out-of-range mode tag over the first word.
        bytes[0] = 0x7F;
        bytes[1] = 0x00;
        let parsed = parse_node_table(&bytes, TableLayout::Extended).expect("parse");
        assert_eq!(parsed[0].lookup_mode, LookupMode::None);
    }
}
