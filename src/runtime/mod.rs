pub mod args;
pub mod status;

pub use args::{parse_runtime_args, RuntimeArgs};
pub use status::{emit_startup_status, explain_config_lines};
