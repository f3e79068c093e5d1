pub mod client;
pub mod error;
pub mod framing;
pub mod wire;

pub use client::EnvClient;
pub use error::{Result, WireError};
pub use framing::{read_frame, write_frame, Frame, MAX_FRAME_SIZE};
pub use wire::{Decision, Observation};
