pub mod choice;
pub mod context;
pub mod dialogue;
pub mod error;
pub mod headless;
pub mod persist;
pub mod sequence;
pub mod speaker;

pub use choice::{ChoicePrompter, Selection};
pub use context::{ScriptContext, TitleConfig};
pub use dialogue::{ConversationOutcome, ConversationWalker, WalkerState, END_NODE, NODE_NOT_FOUND};
pub use error::ScriptError;
pub use persist::Persist;
pub use sequence::{SequenceInterpreter, SequenceOutcome, WaitKind};
pub use speaker::{Speaker, SpeakerRegistry, SpeakerStyle};
