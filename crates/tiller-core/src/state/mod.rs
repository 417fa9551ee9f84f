// Tiller State Layer
// Descriptors and multi-buffered storage for device state

pub mod block;
pub mod buffers;

pub use block::{StateBlock, INVALID_OFFSET, STATE_ALIGNMENT};
pub use buffers::{StateBuffers, StateError, StateResult};
