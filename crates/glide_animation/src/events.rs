//! Playback lifecycle events
//!
//! Callbacks are registered per node and per event kind, and receive a
//! [`PlaybackEvent`] describing the transition. The kind enum doubles as the
//! callback-slot key inside the engine, so a node's callbacks can be taken
//! out, invoked without the engine borrowed, and restored afterwards.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use glide_core::TargetRef;

/// Opaque payload attached to a marker; handed back untouched on marker pass.
pub type MarkerPayload = Rc<dyn Any>;

/// Which lifecycle transition fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First crossing of position ≥ 0
    Start,
    /// Final iteration's end reached (fires exactly once)
    Complete,
    /// An iteration boundary was crossed (fires once per crossed boundary)
    Repeat,
    Pause,
    Resume,
    Cancel,
    /// An explicit seek moved the playback position
    PositionChange,
    /// The playback position crossed a named marker (timelines only)
    MarkerPass,
}

/// Marker details carried by a `MarkerPass` event.
#[derive(Clone)]
pub struct MarkerEvent {
    pub name: String,
    pub time: f64,
    pub payload: Option<MarkerPayload>,
}

impl fmt::Debug for MarkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerEvent")
            .field("name", &self.name)
            .field("time", &self.time)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// A lifecycle transition delivered to a node callback.
#[derive(Clone, Debug)]
pub struct PlaybackEvent {
    pub kind: EventKind,
    /// The tween's target, for tween events
    pub target: Option<TargetRef>,
    /// Node-local playback position at the time of the event
    pub position: f64,
    /// Current iteration (1-based), meaningful for `Repeat`
    pub iteration: u32,
    /// Marker details, for `MarkerPass`
    pub marker: Option<MarkerEvent>,
}

impl PlaybackEvent {
    pub(crate) fn new(kind: EventKind, position: f64) -> Self {
        Self {
            kind,
            target: None,
            position,
            iteration: 0,
            marker: None,
        }
    }

    pub(crate) fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub(crate) fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub(crate) fn with_marker(mut self, marker: MarkerEvent) -> Self {
        self.marker = Some(marker);
        self
    }
}

/// Callback type for lifecycle events.
///
/// Callbacks run with the engine unborrowed, so they may freely create,
/// control, or cancel animations through a `SchedulerHandle`; such mutations
/// follow the snapshot-then-merge rules of the current update pass.
pub type EventCallback = Box<dyn FnMut(&PlaybackEvent)>;

/// Per-node callback registrations, one optional slot per event kind.
#[derive(Default)]
pub struct Callbacks {
    pub on_start: Option<EventCallback>,
    pub on_complete: Option<EventCallback>,
    pub on_repeat: Option<EventCallback>,
    pub on_pause: Option<EventCallback>,
    pub on_resume: Option<EventCallback>,
    pub on_cancel: Option<EventCallback>,
    pub on_position_change: Option<EventCallback>,
    pub on_marker_pass: Option<EventCallback>,
}

impl Callbacks {
    fn slot(&mut self, kind: EventKind) -> &mut Option<EventCallback> {
        match kind {
            EventKind::Start => &mut self.on_start,
            EventKind::Complete => &mut self.on_complete,
            EventKind::Repeat => &mut self.on_repeat,
            EventKind::Pause => &mut self.on_pause,
            EventKind::Resume => &mut self.on_resume,
            EventKind::Cancel => &mut self.on_cancel,
            EventKind::PositionChange => &mut self.on_position_change,
            EventKind::MarkerPass => &mut self.on_marker_pass,
        }
    }

    /// Take the callback for `kind`, if registered, so it can be invoked
    /// without borrowing the node.
    pub(crate) fn take(&mut self, kind: EventKind) -> Option<EventCallback> {
        self.slot(kind).take()
    }

    /// Restore a callback taken with [`Callbacks::take`].
    pub(crate) fn restore(&mut self, kind: EventKind, callback: EventCallback) {
        let slot = self.slot(kind);
        if slot.is_none() {
            *slot = Some(callback);
        }
    }

    /// Whether a callback is registered for `kind`.
    #[cfg(test)]
    pub(crate) fn has(&mut self, kind: EventKind) -> bool {
        self.slot(kind).is_some()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_repeat", &self.on_repeat.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_restore() {
        let mut callbacks = Callbacks::default();
        callbacks.on_complete = Some(Box::new(|_| {}));

        assert!(callbacks.has(EventKind::Complete));
        let taken = callbacks.take(EventKind::Complete);
        assert!(taken.is_some());
        assert!(!callbacks.has(EventKind::Complete));

        callbacks.restore(EventKind::Complete, taken.unwrap());
        assert!(callbacks.has(EventKind::Complete));
    }

    #[test]
    fn test_restore_does_not_clobber_replacement() {
        let mut callbacks = Callbacks::default();
        callbacks.on_repeat = Some(Box::new(|_| {}));

        let taken = callbacks.take(EventKind::Repeat).unwrap();
        // A callback replaced its own slot while it was out
        callbacks.on_repeat = Some(Box::new(|_| {}));
        callbacks.restore(EventKind::Repeat, taken);
        assert!(callbacks.has(EventKind::Repeat));
    }
}
