// ABOUTME: Command module aggregator for the rollstack CLI.
// ABOUTME: Re-exports validate, rehearse, and status command handlers.

mod rehearse;
mod status;
mod validate;

pub use rehearse::{Faults, rehearse};
pub use status::status;
pub use validate::validate;
