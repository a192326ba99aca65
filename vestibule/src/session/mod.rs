//! Session cookie codec and lifecycle actions.
//!
//! - [`cookie`]: encode/decode one opaque session value as a transport cookie
//! - [`actions`]: login, logout, session read, and the axum handlers over them

pub mod actions;
pub mod cookie;
