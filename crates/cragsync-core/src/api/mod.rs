//! API implementation submodules.
//!
//! Each submodule contains `impl SyncEngine` blocks that extend the public
//! API with one concern. The struct definition remains in `lib.rs`.

mod builder;
mod downloads;
mod maintenance;
mod tree;

pub use builder::SyncEngineBuilder;
