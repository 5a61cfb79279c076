//! Process lifecycle: signal handling and shutdown cleanup

mod shutdown;

pub use shutdown::{push_final_state, ShutdownSignal};
