//! HTTP API handlers.
//!
//! A thin layer over the lifecycle controller: handlers parse and validate
//! requests, delegate every domain decision, and serialize the reply
//! envelope. No state-machine logic lives here.

pub mod file;
pub mod health;
