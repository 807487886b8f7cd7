//! Protocol layer: newline framing and the JSON messages carried in frames.

pub mod framing;
pub mod message;

pub use framing::{Frame, LineCodec};
pub use message::{Incoming, Notification, Request, Response};
