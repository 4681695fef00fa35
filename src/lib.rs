//! Estimation Hub - real-time collaborative estimation sessions
//!
//! Keeps many concurrent estimation sessions ("battles" and "storyboards")
//! consistent across every connected participant. Each session is owned by
//! a single worker that applies commands in order and fans the resulting
//! events out to all of its connections.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
