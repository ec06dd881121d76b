#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

pub mod appender;
pub mod store;

pub use appender::{LogAppender, SyncPolicy};
pub use store::{DedupStore, Observation, StoreSnapshot};
