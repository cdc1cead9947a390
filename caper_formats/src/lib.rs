pub mod cursor;
pub mod strip;
pub mod text;

pub use cursor::ScriptCursor;
pub use strip::{
    encode_node, encode_table, parse_node_table, ChoiceSlot, DialogueNode, LookupMode,
    TableLayout, CALLBACK_SLOTS, CHOICE_SLOTS, LOOKUP_CANDIDATES,
};
pub use text::read_script_string;
