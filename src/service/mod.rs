//! # Service Layer
//!
//! Sessions, the shared session registry and the server that ties them to
//! sockets.
//!
//! ## Components
//! - **Session**: per-connection state and the cloneable [`SessionHandle`]
//! - **Registry**: authenticated sessions by uid, presence and message routing
//! - **Server**: TCP accept loop and per-connection lifecycle

pub mod registry;
pub mod server;
pub mod session;

pub use registry::SessionRegistry;
pub use server::ServerState;
pub use session::{Session, SessionHandle};
