pub mod common;
pub mod completions;
pub mod due;
pub mod offline_sets;
pub mod preview;
pub mod queue;
pub mod session;
pub mod sync;
