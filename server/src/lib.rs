//! Parley Server
//!
//! Streaming fulfillment backend for a conversational agent. Webhook calls are
//! acknowledged at once; each action then runs in the background and reports
//! its progress to the citizen's browser over a per-session event stream.

pub mod actions;
pub mod api;
pub mod auth;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod events;
pub mod observability;
pub mod stream;
pub mod util;
