mod job;
mod state;

pub use job::{Item, ItemRecord, Job, LocatedRef, StatusRecord};
pub use state::{JobState, StateMachine, Terminal, TransitionError};
