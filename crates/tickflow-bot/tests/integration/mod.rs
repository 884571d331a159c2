//! Integration tests for tickflow-bot.
//!
//! These tests run the connection manager against an in-process venue:
//! - WebSocket connection lifecycle
//! - Subscription replay after the venue drops the connection
//! - Caller misuse while disconnected

pub mod common;
