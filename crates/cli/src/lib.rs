//! Public library modules for the CLI crate
pub mod console;
pub mod undo;
pub mod watch;
