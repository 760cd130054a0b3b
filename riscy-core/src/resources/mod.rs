//! Provides the memory resources and I/O devices a board is assembled from.

pub mod clint;
pub mod framebuffer;
pub mod plic;
pub mod ram;
pub mod uart;
