// Rover drive-control core: qik motor link, steering, and the command arbiter

pub mod config;
pub mod input;
pub mod messages;
pub mod motor;
pub mod runtime;
