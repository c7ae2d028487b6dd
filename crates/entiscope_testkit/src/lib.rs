//! # Entiscope Testkit
//!
//! Test utilities for entiscope.
//!
//! This crate provides:
//! - A sample order schema and a seeded test engine
//! - Property-based test generators using proptest
//! - Model-checked harnesses for relation collections and nested scopes
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use entiscope_testkit::prelude::*;
//!
//! with_engine(|engine| {
//!     let ada = engine.seed_customer("ada");
//!     let root = engine.create_root();
//!     assert_eq!(
//!         engine.property(root, ada, "name").unwrap(),
//!         PropertyValue::from("ada")
//!     );
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use entiscope_core::{
        CoreError, EntityId, EntityState, EventKind, PropertyValue, ScopeId, ScopeManager,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
