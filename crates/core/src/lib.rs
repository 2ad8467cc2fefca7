//! Core of the voice-command robot dispatcher.
//!
//! Turns a transcribed utterance into one of a fixed set of trained robot
//! policies and runs it on the single attached arm:
//!
//! - [`registry`]: the immutable set of policies loaded from YAML files.
//! - [`prompt`] / [`completion`] / [`intent`]: the natural-language path,
//!   from prompt to completion call to policy choice.
//! - [`robot`]: the controller boundary to the external control loop.
//! - [`gate`]: exclusive, FIFO-ordered access to the robot connection.

pub mod completion;
pub mod gate;
pub mod intent;
pub mod prompt;
pub mod registry;
pub mod robot;
