//! CLI command handlers, one file per command family.

mod control;
mod docs;
mod fetch;

pub use control::run_control;
pub use docs::{run_completions, run_man};
pub use fetch::{run_fetch, FetchOptions};
