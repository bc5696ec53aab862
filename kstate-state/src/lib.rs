mod state;

pub use state::State;
pub use kstate_core::{unique_name, Permissions};
