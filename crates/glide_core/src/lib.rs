//! Glide Core Seam Types
//!
//! This crate provides the host-facing primitives the Glide animation engine
//! interpolates against:
//!
//! - **`TweenTarget`**: named numeric property access with a liveness check
//! - **`PropertyBag`**: a ready-made map-backed target implementation
//! - **`TargetRef` / `TargetKey`**: shared target handles with stable identity
//!
//! Hosts implement `TweenTarget` for their own display objects; the engine
//! never owns a target's lifetime, it only reads and writes declared
//! properties through the trait and checks liveness before each update.
//!
//! # Example
//!
//! ```rust
//! use glide_core::{PropertyBag, TargetRef, TweenTarget};
//!
//! let bag = PropertyBag::new().with("x", 0.0).with("alpha", 1.0);
//! let target = TargetRef::new(bag);
//!
//! target.set("x", 120.0);
//! assert_eq!(target.get("x"), Some(120.0));
//! assert!(target.is_alive());
//! ```

pub mod target;

pub use target::{PropertyBag, TargetKey, TargetRef, TweenTarget};
