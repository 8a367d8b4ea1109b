//! Control-operation selectors
//!
//! Public control calls (pause/resume/cancel/speed/position) take an explicit
//! selector resolved once at the API boundary, instead of re-inspecting a
//! dynamic argument at every tree level.

use glide_core::{TargetKey, TargetRef};

use crate::scheduler::NodeId;

/// What a top-level control operation applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Every live tween and timeline
    Everything,
    /// The children of the implicit default timeline
    DefaultTimeline,
    /// Every node carrying this tag, across all timelines
    Tag(String),
    /// One specific tween or timeline
    Node(NodeId),
    /// Every tween animating this target. Pause/resume/speed/position only
    /// search the default timeline; cancel searches all timelines so no
    /// reference to a destroyed target can survive anywhere.
    Target(TargetKey),
}

impl Selector {
    pub fn tag(tag: impl Into<String>) -> Self {
        Selector::Tag(tag.into())
    }

    pub fn target(target: &TargetRef) -> Self {
        Selector::Target(target.key())
    }
}

/// A seek destination: absolute milliseconds or a marker name resolved
/// against the timeline being seeked.
#[derive(Clone, Debug, PartialEq)]
pub enum TimePosition {
    Millis(f64),
    Marker(String),
}

impl From<f64> for TimePosition {
    fn from(ms: f64) -> Self {
        TimePosition::Millis(ms)
    }
}

impl From<&str> for TimePosition {
    fn from(name: &str) -> Self {
        TimePosition::Marker(name.to_string())
    }
}
