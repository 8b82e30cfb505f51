//! Utilities for memory-efficient data structures.
//!
//! This module exposes a generational [`Slab`] used to give loop tasks a
//! stable identity that can travel across threads inside wakers.

mod slab;

pub(crate) use slab::{Key, Slab};
