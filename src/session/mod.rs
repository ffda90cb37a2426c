//! Live preview session for an agent being edited.
//!
//! A [`SessionController`] owns the run lifecycle (idle, connecting, running),
//! the conversation log and at most one in-flight receive. Collaborators are
//! handed over explicitly in a [`SessionContext`].

pub mod context;
pub mod controller;
pub mod events;
pub mod form;
pub mod state;

pub use context::{AgentPersistence, DescriptionGenerator, InboundSink, SessionContext, Transport};
pub use controller::{BlockReason, SendOutcome, SessionController};
pub use events::{Notification, SessionSnapshot};
pub use form::AgentForm;
