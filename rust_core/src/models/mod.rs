// Shared models for the presence tracker
mod presence;
mod session;

pub use presence::{Snapshot, TransitionEvent, TransitionKind};
pub use session::{OverlapGroup, SessionWindow};
