//! Services shared by every Recall client

mod local_store;

pub use local_store::{Collection, LocalStore};
