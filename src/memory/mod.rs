//! Conversation memory primitives shared by the session store and the specialist

pub mod store;

pub use store::{ConversationHistory, ConversationTurn, TurnRole};
