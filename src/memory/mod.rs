//! Simulated Memory Module
//!
//! Owns every object instance registered by the bootstrap layer and hands
//! out content-addressed identities for them.
//!
//! # Structure
//!
//! - [`instance`]: The capability trait the heap needs from an object
//! - [`heap`]: Address allocation and the address → node translation table

pub mod heap;
pub mod instance;

pub use heap::{Address, Heap, HeapEntry};
pub use instance::{Instance, ObjectInstance};
