//! Shared fixtures for integration tests.
#![allow(dead_code)]

pub mod range_server;
pub mod scripted_transport;
