//! Glide Animation Engine
//!
//! Tweens, timelines, and frame scheduling.
//!
//! # Features
//!
//! - **Tweens**: timed interpolation of named numeric properties with
//!   easing, iteration, reflection, and constant-rate durations
//! - **Timelines**: hierarchical containers with their own clocks, named
//!   markers, and bottom-up aggregate durations
//! - **Scheduling**: one `advance(now_ms)` call per host tick drives the
//!   whole tree; mutation from callbacks mid-pass is safe
//! - **Control routing**: pause/resume/cancel/speed/seek by reference, tag,
//!   target identity, or everything at once
//! - **Time accounting**: pausing, speed scaling, and seeking never lose
//!   temporal accuracy
//!
//! # Example
//!
//! ```rust
//! use glide_animation::{Scheduler, TweenConfig, Easing};
//! use glide_core::{PropertyBag, TargetRef};
//!
//! let scheduler = Scheduler::new();
//! let target = TargetRef::new(PropertyBag::new().with("x", 0.0));
//!
//! scheduler
//!     .to(
//!         &target,
//!         &[("x", 100.0)],
//!         TweenConfig::new().time(1000.0).easing(Easing::OutQuad),
//!     )
//!     .unwrap();
//!
//! // Host tick loop
//! scheduler.advance(500.0);
//! assert!(target.get("x").unwrap() > 0.0);
//! ```

mod clock;
pub mod easing;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod selector;
pub mod timeline;
pub mod tween;

pub use easing::Easing;
pub use error::{AnimationError, Result};
pub use events::{EventCallback, EventKind, MarkerEvent, MarkerPayload, PlaybackEvent};
pub use scheduler::{
    AnimationRef, NodeId, Scheduler, SchedulerHandle, TimelineHandle, TweenHandle,
};
pub use selector::{Selector, TimePosition};
pub use timeline::{Marker, TimelineConfig};
pub use tween::{ConstantRate, RateProperty, TweenConfig};
