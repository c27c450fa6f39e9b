//! Synchronization primitives for the coordination core's shared resources.

#![no_std]
#![deny(missing_docs)]

pub mod guard;

pub use guard::{GuardError, ResourceGuard, Wait};

#[cfg(test)]
#[macro_use]
extern crate std;
