//! maimconsole CLI Library
//!
//! Console adapter that lets an operator chat with a MaimCore instance over
//! its WebSocket interface.

pub mod connection;
pub mod console;
pub mod relay;
pub mod shutdown;
