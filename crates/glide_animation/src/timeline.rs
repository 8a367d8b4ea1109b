//! Timeline nodes
//!
//! A timeline is an ordered container of tweens and nested timelines with
//! its own clock, a set of named markers, and an aggregate duration computed
//! bottom-up from its children. The scheduler owns the tree walk; this
//! module owns the per-timeline data: marker bookkeeping, the
//! per-(target, property) start-time schedule behind predicted start values,
//! and the construction-time configuration.

use std::fmt;

use rustc_hash::FxHashMap;

use glide_core::{TargetKey, TargetRef};

use crate::clock::Playhead;
use crate::error::{AnimationError, Result};
use crate::events::{Callbacks, MarkerPayload, PlaybackEvent};
use crate::scheduler::NodeId;
use crate::tween::TweenConfig;

/// A named, time-ordered point within a timeline.
#[derive(Clone)]
pub struct Marker {
    pub name: String,
    pub time: f64,
    pub payload: Option<MarkerPayload>,
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marker")
            .field("name", &self.name)
            .field("time", &self.time)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Marker storage: a name→index map plus a time-sorted sequence.
///
/// Ties at equal marker time keep insertion order, which makes the relative
/// firing order of coincident markers stable.
#[derive(Default)]
pub(crate) struct MarkerSet {
    by_name: FxHashMap<String, usize>,
    ordered: Vec<Marker>,
}

impl MarkerSet {
    /// Add a marker. Duplicate names are a recoverable failure: the existing
    /// marker is left unchanged.
    pub fn add(&mut self, name: &str, time: f64, payload: Option<MarkerPayload>) -> Result<()> {
        if self.by_name.contains_key(name) {
            return Err(AnimationError::DuplicateMarker(name.to_string()));
        }
        let at = self.ordered.partition_point(|m| m.time <= time);
        self.ordered.insert(
            at,
            Marker {
                name: name.to_string(),
                time,
                payload,
            },
        );
        self.reindex();
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Marker> {
        let index = self
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| AnimationError::UnknownMarker(name.to_string()))?;
        let marker = self.ordered.remove(index);
        self.reindex();
        Ok(marker)
    }

    pub fn time_of(&self, name: &str) -> Option<f64> {
        self.by_name.get(name).map(|&i| self.ordered[i].time)
    }

    pub fn last_time(&self) -> Option<f64> {
        self.ordered.last().map(|m| m.time)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.ordered.iter()
    }

    /// Markers crossed when the position moves from `old` to `new`.
    ///
    /// The comparison against `old` is strict except on the first pass after
    /// a discontinuous seek, where it is inclusive so a marker sitting
    /// exactly at the seek position still fires. Backward movement crosses
    /// nothing.
    pub fn crossed(&self, old: f64, new: f64, inclusive_start: bool) -> Vec<&Marker> {
        if new < old {
            return Vec::new();
        }
        self.ordered
            .iter()
            .filter(|m| {
                let after_old = if inclusive_start {
                    m.time >= old
                } else {
                    m.time > old
                };
                after_old && m.time <= new
            })
            .collect()
    }

    fn reindex(&mut self) {
        self.by_name.clear();
        for (index, marker) in self.ordered.iter().enumerate() {
            self.by_name.insert(marker.name.clone(), index);
        }
    }
}

/// Per-(target, property) ordered list of (start time, owning tween),
/// built at timeline construction.
///
/// This is the pending-write queue behind predicted start values: when a
/// seek activates a tween before its preceding siblings have played, the
/// scheduler resolves the property's assumed starting value by chaining the
/// preceding entries' end values.
#[derive(Default)]
pub(crate) struct PropertySchedule {
    entries: FxHashMap<(TargetKey, String), Vec<(f64, NodeId)>>,
}

impl PropertySchedule {
    pub fn insert(&mut self, key: TargetKey, property: &str, start: f64, node: NodeId) {
        let list = self.entries.entry((key, property.to_string())).or_default();
        let at = list.partition_point(|(time, _)| *time <= start);
        list.insert(at, (start, node));
    }

    pub fn remove_node(&mut self, node: NodeId) {
        for list in self.entries.values_mut() {
            list.retain(|(_, n)| *n != node);
        }
        self.entries.retain(|_, list| !list.is_empty());
    }

    /// Entries for (key, property) that start strictly before `before`,
    /// in start-time order.
    pub fn preceding(&self, key: TargetKey, property: &str, before: f64) -> &[(f64, NodeId)] {
        match self.entries.get(&(key, property.to_string())) {
            Some(list) => &list[..list.partition_point(|(time, _)| *time < before)],
            None => &[],
        }
    }
}

/// An inline tween entry in a timeline configuration.
pub(crate) struct TweenSpec {
    pub(crate) start_time: f64,
    pub(crate) target: TargetRef,
    pub(crate) properties: Vec<(String, f64)>,
    pub(crate) config: TweenConfig,
}

/// A child declared at timeline construction.
pub(crate) enum ChildSpec {
    Tween(TweenSpec),
    Timeline(f64, TimelineConfig),
}

/// Construction-time settings for a timeline.
///
/// Out-of-range optional settings are dropped with a warning; construction
/// itself only fails for fatal argument problems in the inline tween specs.
pub struct TimelineConfig {
    pub(crate) auto_play: bool,
    pub(crate) auto_cancel: bool,
    pub(crate) speed_scale: f64,
    pub(crate) tag: Option<String>,
    pub(crate) markers: Vec<(String, f64, Option<MarkerPayload>)>,
    pub(crate) children: Vec<ChildSpec>,
    pub(crate) callbacks: Callbacks,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineConfig {
    pub fn new() -> Self {
        Self {
            auto_play: false,
            auto_cancel: false,
            speed_scale: 1.0,
            tag: None,
            markers: Vec::new(),
            children: Vec::new(),
            callbacks: Callbacks::default(),
        }
    }

    /// Start playing immediately instead of paused. The timeline and all its
    /// initial children come up unpaused without firing resume callbacks.
    pub fn auto_play(mut self, auto_play: bool) -> Self {
        self.auto_play = auto_play;
        self
    }

    /// Cancel the timeline automatically once it completes.
    pub fn auto_cancel(mut self, auto_cancel: bool) -> Self {
        self.auto_cancel = auto_cancel;
        self
    }

    pub fn speed_scale(mut self, scale: f64) -> Self {
        if scale.is_finite() && scale > 0.0 {
            self.speed_scale = scale;
        } else {
            tracing::warn!("ignoring invalid timeline speed scale {scale}");
        }
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Declare a marker. Negative times are dropped with a warning;
    /// duplicate names are resolved at construction (first wins).
    pub fn marker(mut self, name: impl Into<String>, time: f64) -> Self {
        self.push_marker(name.into(), time, None);
        self
    }

    /// Declare a marker carrying an opaque payload.
    pub fn marker_with_payload(
        mut self,
        name: impl Into<String>,
        time: f64,
        payload: MarkerPayload,
    ) -> Self {
        self.push_marker(name.into(), time, Some(payload));
        self
    }

    fn push_marker(&mut self, name: String, time: f64, payload: Option<MarkerPayload>) {
        if time.is_finite() && time >= 0.0 {
            self.markers.push((name, time, payload));
        } else {
            tracing::warn!("ignoring marker {name:?} with invalid time {time}");
        }
    }

    /// Declare a child tween starting at `start_time` (timeline-local ms).
    pub fn tween(
        mut self,
        start_time: f64,
        target: &TargetRef,
        properties: &[(&str, f64)],
        config: TweenConfig,
    ) -> Self {
        let start_time = if start_time.is_finite() && start_time >= 0.0 {
            start_time
        } else {
            tracing::warn!("clamping invalid tween start time {start_time} to 0");
            0.0
        };
        self.children.push(ChildSpec::Tween(TweenSpec {
            start_time,
            target: target.clone(),
            properties: properties
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
            config,
        }));
        self
    }

    /// Declare a nested timeline starting at `start_time` (timeline-local ms).
    pub fn timeline(mut self, start_time: f64, config: TimelineConfig) -> Self {
        let start_time = if start_time.is_finite() && start_time >= 0.0 {
            start_time
        } else {
            tracing::warn!("clamping invalid timeline start time {start_time} to 0");
            0.0
        };
        self.children.push(ChildSpec::Timeline(start_time, config));
        self
    }

    pub fn on_start(mut self, f: impl FnMut(&PlaybackEvent) + 'static) -> Self {
        self.callbacks.on_start = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnMut(&PlaybackEvent) + 'static) -> Self {
        self.callbacks.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_marker_pass(mut self, f: impl FnMut(&PlaybackEvent) + 'static) -> Self {
        self.callbacks.on_marker_pass = Some(Box::new(f));
        self
    }

    pub fn on_pause(mut self, f: impl FnMut(&PlaybackEvent) + 'static) -> Self {
        self.callbacks.on_pause = Some(Box::new(f));
        self
    }

    pub fn on_resume(mut self, f: impl FnMut(&PlaybackEvent) + 'static) -> Self {
        self.callbacks.on_resume = Some(Box::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl FnMut(&PlaybackEvent) + 'static) -> Self {
        self.callbacks.on_cancel = Some(Box::new(f));
        self
    }

    pub fn on_position_change(mut self, f: impl FnMut(&PlaybackEvent) + 'static) -> Self {
        self.callbacks.on_position_change = Some(Box::new(f));
        self
    }
}

/// The timeline node stored in the scheduler arena.
pub(crate) struct Timeline {
    pub parent: Option<NodeId>,
    /// Insertion order = evaluation order
    pub children: Vec<NodeId>,
    /// Children added while an update pass is iterating this timeline;
    /// merged in after the pass.
    pub pending_children: Vec<NodeId>,
    /// An update pass is currently iterating this timeline's children
    pub updating: bool,
    pub markers: MarkerSet,
    /// Aggregate local duration; `None` when any child is unbounded.
    /// The default timeline has no duration concept and keeps `None`.
    pub duration: Option<f64>,
    pub clock: Playhead,
    pub is_default: bool,
    pub auto_cancel: bool,
    pub tag: Option<String>,
    pub callbacks: Callbacks,
    pub start_in_parent: f64,
    pub has_started: bool,
    pub has_completed: bool,
    /// Last computed local position; the old edge for marker-pass detection
    pub position: f64,
    /// The next marker pass compares inclusively against the old position
    pub marker_inclusive: bool,
    pub schedule: PropertySchedule,
}

impl Timeline {
    pub fn new(config: &TimelineConfig, start_in_parent: f64) -> Self {
        let mut clock = Playhead::starting_at(start_in_parent);
        clock.set_speed_scale(config.speed_scale);
        if !config.auto_play {
            clock.pause();
        }
        Self {
            parent: None,
            children: Vec::new(),
            pending_children: Vec::new(),
            updating: false,
            markers: MarkerSet::default(),
            duration: Some(0.0),
            clock,
            is_default: false,
            auto_cancel: config.auto_cancel,
            tag: config.tag.clone(),
            callbacks: Callbacks::default(),
            start_in_parent,
            has_started: false,
            has_completed: false,
            position: 0.0,
            marker_inclusive: false,
            schedule: PropertySchedule::default(),
        }
    }

    /// The implicit scheduler-level timeline: always first, exempt from
    /// marker/start/complete semantics, hosting absolute-offset children.
    pub fn default_root() -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            pending_children: Vec::new(),
            updating: false,
            markers: MarkerSet::default(),
            duration: None,
            clock: Playhead::starting_at(0.0),
            is_default: true,
            auto_cancel: false,
            tag: None,
            callbacks: Callbacks::default(),
            start_in_parent: 0.0,
            has_started: true,
            has_completed: false,
            position: 0.0,
            marker_inclusive: false,
            schedule: PropertySchedule::default(),
        }
    }

    /// Record a child either directly or, mid-pass, into the pending list
    /// merged after the pass.
    pub fn adopt(&mut self, child: NodeId) {
        if self.updating {
            self.pending_children.push(child);
        } else {
            self.children.push(child);
        }
    }

    /// Align start/complete flags with a discontinuous jump to `position`.
    pub fn resync_flags(&mut self, position: f64) {
        self.has_started = position >= 0.0;
        if let Some(duration) = self.duration {
            if position < duration {
                self.has_completed = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn keys(count: usize) -> Vec<NodeId> {
        let mut map: SlotMap<NodeId, ()> = SlotMap::with_key();
        (0..count).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_duplicate_marker_is_recoverable() {
        let mut markers = MarkerSet::default();
        assert!(markers.add("m", 100.0, None).is_ok());
        let err = markers.add("m", 250.0, None);
        assert!(matches!(err, Err(AnimationError::DuplicateMarker(_))));
        // First marker unchanged
        assert_eq!(markers.time_of("m"), Some(100.0));
        assert_eq!(markers.iter().count(), 1);
    }

    #[test]
    fn test_markers_sorted_with_stable_ties() {
        let mut markers = MarkerSet::default();
        markers.add("late", 200.0, None).unwrap();
        markers.add("a", 100.0, None).unwrap();
        markers.add("b", 100.0, None).unwrap();

        let order: Vec<&str> = markers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "late"]);
    }

    #[test]
    fn test_crossed_strict_then_inclusive() {
        let mut markers = MarkerSet::default();
        markers.add("m", 100.0, None).unwrap();

        // Strict: a marker exactly at the old position does not re-fire
        assert!(markers.crossed(100.0, 200.0, false).is_empty());
        // Inclusive after a seek: it does
        assert_eq!(markers.crossed(100.0, 200.0, true).len(), 1);
        // Backward movement crosses nothing
        assert!(markers.crossed(300.0, 100.0, false).is_empty());
    }

    #[test]
    fn test_crossed_spans_multiple_markers_in_order() {
        let mut markers = MarkerSet::default();
        markers.add("a", 100.0, None).unwrap();
        markers.add("b", 100.0, None).unwrap();
        markers.add("c", 200.0, None).unwrap();

        let crossed = markers.crossed(0.0, 250.0, false);
        let names: Vec<&str> = crossed.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_delete_marker_unknown_name() {
        let mut markers = MarkerSet::default();
        markers.add("m", 10.0, None).unwrap();
        assert!(matches!(
            markers.remove("nope"),
            Err(AnimationError::UnknownMarker(_))
        ));
        assert!(markers.remove("m").is_ok());
        assert_eq!(markers.iter().count(), 0);
    }

    #[test]
    fn test_schedule_preceding_is_strict_and_ordered() {
        use glide_core::PropertyBag;

        let target = TargetRef::new(PropertyBag::new());
        let ids = keys(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        let mut schedule = PropertySchedule::default();
        schedule.insert(target.key(), "x", 200.0, b);
        schedule.insert(target.key(), "x", 0.0, a);
        schedule.insert(target.key(), "x", 400.0, c);

        let before = schedule.preceding(target.key(), "x", 400.0);
        let nodes: Vec<NodeId> = before.iter().map(|(_, n)| *n).collect();
        assert_eq!(nodes, vec![a, b]);

        // Strictly before: an entry at exactly the probe time is excluded
        assert_eq!(schedule.preceding(target.key(), "x", 200.0).len(), 1);

        schedule.remove_node(b);
        assert_eq!(schedule.preceding(target.key(), "x", 400.0).len(), 1);
    }
}
