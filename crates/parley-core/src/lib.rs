//! parley-core: client-side conversation state
//!
//! This crate keeps the local view of a user's conversations in step with the
//! remote chat service: the history list, the open conversation, optimistic
//! sends and confirmed renames and deletes.

pub mod controller;
pub mod conversation;
pub mod error;
pub mod events;
pub mod registry;
pub mod session;

pub use controller::{ChatController, SendOutcome};
pub use conversation::{ConversationState, Lifecycle};
pub use error::{Error, Result};
pub use events::ViewEvent;
pub use registry::Registry;
pub use session::SessionStore;
