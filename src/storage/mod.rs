//! Concrete storage backends

pub mod fs_object_store;
pub mod sqlite;

pub use fs_object_store::*;
pub use sqlite::*;
