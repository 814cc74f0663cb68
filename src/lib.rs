#![forbid(unsafe_code)]

//! Polls tracked channels' feeds on a schedule, remembers every video it has
//! seen, and hands each new one to a download backend exactly once.

pub mod api;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod model;
pub mod naming;
pub mod scheduler;
pub mod shorts;
pub mod store;
pub mod walker;
