//! querymux - A query session multiplexer for SQL workbench frontends.
//!
//! Manages the lifecycle of SQL query executions on behalf of editor-style
//! frontends: one session per editor tab, one execution in flight per
//! session, events relayed in order to whichever consumer is attached, and
//! in-place table editing staged through the same sessions.

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod logging;
pub mod runner;
pub mod session;
