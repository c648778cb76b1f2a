//! Elvea - object-memory core of the Elvea scripting runtime
//!
//! This crate provides the memory layer the rest of the runtime is built on:
//! values, objects, classes and their reclamation.
//!
//! # Features
//! - Tagged-union values ([`Variant`]) with shared alias cells
//! - Deterministic reference counting
//! - Backup cycle collector (Bacon-Rajan trial deletion)
//! - Slab arena with page compaction for alias and variant cells
//! - Class descriptors with up to 8 bases and polymorphic methods
//! - Injectable allocator and error handler
//!
//! # Example
//! ```
//! use elvea::{Context, RuntimeConfig, Variant};
//!
//! let mut ctx = Context::new(RuntimeConfig::default());
//! let list = ctx.list_new(0).unwrap();
//! let mut v = ctx.init_object(list).unwrap();
//! ctx.list_push(&mut v, Variant::Number(1.0)).unwrap();
//! assert_eq!(ctx.list_len(v).unwrap(), 1);
//! ctx.clear(&mut v).unwrap();
//! ```

// Core modules
pub mod config;
pub mod context;
pub mod error;
pub mod variant;

// Alias and variant cells
mod alias;

// Memory management
pub mod gc;

// Object model and built-in classes
pub mod runtime;

// Utilities
pub mod util;

// Re-export main types
pub use config::RuntimeConfig;
pub use context::{Builtins, Context, MemoryStats};
pub use error::{Error, ErrorKind, Result};
pub use gc::{AliasRef, CollectStats, GcColor, Node, ObjectRef, Tracer, VariantRef};
pub use runtime::{ClassMethods, ClassRef};
pub use variant::Variant;
