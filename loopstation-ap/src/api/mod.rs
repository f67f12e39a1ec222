//! HTTP control surface
//!
//! JSON endpoints mapping UI gestures onto the transport, plus an SSE stream
//! of loop events.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};
