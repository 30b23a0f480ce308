//! Model Context Protocol server layer.

pub mod codec;
pub mod handler;
pub mod http;
pub mod resources;
pub mod tools;
pub mod transport;
