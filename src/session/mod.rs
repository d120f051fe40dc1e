//! 流式会话：事件解码、输出累积与会话控制

pub mod accumulator;
pub mod controller;
pub mod error;
pub mod events;

pub use controller::{SessionObserver, SessionState, StreamingSession, Termination};
