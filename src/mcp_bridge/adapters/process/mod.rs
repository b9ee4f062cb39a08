//! Operating system process adapter.

mod launcher;

pub use launcher::SystemServerLauncher;
