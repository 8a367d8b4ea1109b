//! Error types for glide_animation

use thiserror::Error;

/// Errors that can occur when constructing or controlling animations.
///
/// These are the fatal "usage error" tier: the call is aborted and nothing is
/// mutated. Recoverable configuration issues (out-of-range optional settings)
/// are instead dropped with a `tracing` warning and construction proceeds.
#[derive(Error, Debug)]
pub enum AnimationError {
    /// A tween was created with no usable properties
    #[error("tween has no animatable properties")]
    NoProperties,

    /// A duration, delay, or rate was not a finite positive number
    #[error("invalid {what}: {value}")]
    InvalidTime { what: &'static str, value: f64 },

    /// A constant-rate tween referenced a property the target does not expose
    #[error("constant-rate property {0:?} is not resolvable on the target")]
    UnresolvableRate(String),

    /// A marker with this name already exists on the timeline
    #[error("duplicate marker name: {0:?}")]
    DuplicateMarker(String),

    /// No marker with this name exists on the timeline
    #[error("unknown marker name: {0:?}")]
    UnknownMarker(String),

    /// The referenced tween or timeline no longer exists
    #[error("animation handle is no longer valid")]
    Expired,

    /// The scheduler behind a handle has been dropped
    #[error("scheduler is no longer alive")]
    SchedulerGone,
}

/// Result type for glide_animation operations
pub type Result<T> = std::result::Result<T, AnimationError>;
