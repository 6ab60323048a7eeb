//! # Composition
//!
//! Merges a frame's motion mask with the session's noise pool. The decoded
//! frame itself never reaches this stage, so output pixels can only ever be
//! noise: the mask reveals where motion happened, not what moved.

pub mod compositor;

pub use compositor::Compositor;
