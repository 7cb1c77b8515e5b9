//! Shared helpers for drb-bot integration tests.

#![allow(dead_code)]

pub mod mock_ws;
