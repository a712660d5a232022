//! Length-bounded streams over the connection transport.
//!
//! Every connection owns one [`HttpStream`] holding a reader window and a writer window.
//! The windows are reset per request to the declared content lengths and constrain every
//! transfer: a body read returns 0 at the end of its window, a body write past its window
//! fails without sending a byte.
//!
//! Handlers see the windows through [`BodyReader`] and [`BodyWriter`]; resetting them is
//! reserved to the connection supervisor.

mod body;
mod http_stream;
mod transport;
mod window;

pub use body::{BodyReader, BodyWriter};
pub(crate) use http_stream::HttpStream;
pub use transport::Transport;
pub(crate) use window::Window;
