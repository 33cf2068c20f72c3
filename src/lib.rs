//! socketpush - Scoped server-to-client push over WebSockets
//!
//! Publishers obtain a [`push::PushContext`] for a declared channel and send
//! to everyone listening in the captured scope, or to specific users.

pub mod cli;
pub mod config;
pub mod http_server;
pub mod observability;
pub mod push;
