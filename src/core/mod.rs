//! Core shared state: the clamp table coupling session lifecycle to the
//! packet interceptor.

pub mod clamp_table;
