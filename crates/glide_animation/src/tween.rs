//! Tween nodes
//!
//! A tween interpolates one set of named numeric properties on one target
//! over one duration, with iteration, reflection, easing, and constant-rate
//! semantics. Tweens are leaves of the timeline tree; the scheduler drives
//! them with their parent's clock each frame.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use glide_core::TargetRef;

use crate::clock::Playhead;
use crate::easing::Easing;
use crate::events::{Callbacks, EventKind, PlaybackEvent};
use crate::scheduler::NodeId;

/// Which distance measure a constant-rate tween derives its duration from.
#[derive(Clone, Debug, PartialEq)]
pub enum RateProperty {
    /// Euclidean distance over the `x`/`y` pair
    Position,
    /// Euclidean distance over the `xScale`/`yScale` pair
    Scale,
    /// Plain numeric delta of a single named property
    Named(String),
}

/// Derive duration from a rate of change instead of an explicit time.
#[derive(Clone, Debug)]
pub struct ConstantRate {
    pub property: RateProperty,
    /// Property units covered per second
    pub units_per_second: f64,
}

const DEFAULT_DURATION_MS: f64 = 500.0;

/// Construction-time settings for a tween.
///
/// Optional settings outside their valid range are dropped with a warning
/// and the default is kept; fatal argument problems surface as errors from
/// the creating call instead.
pub struct TweenConfig {
    pub(crate) duration_ms: f64,
    pub(crate) delay_ms: f64,
    /// -1 for infinite
    pub(crate) iterations: i32,
    pub(crate) speed_scale: f64,
    pub(crate) easing: Easing,
    pub(crate) reflect: bool,
    pub(crate) delta: bool,
    pub(crate) paused: bool,
    pub(crate) tag: Option<String>,
    pub(crate) constant_rate: Option<ConstantRate>,
    pub(crate) callbacks: Callbacks,
}

impl Default for TweenConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TweenConfig {
    pub fn new() -> Self {
        Self {
            duration_ms: DEFAULT_DURATION_MS,
            delay_ms: 0.0,
            iterations: 1,
            speed_scale: 1.0,
            easing: Easing::Linear,
            reflect: false,
            delta: false,
            paused: false,
            tag: None,
            constant_rate: None,
            callbacks: Callbacks::default(),
        }
    }

    /// Duration of one iteration, in milliseconds.
    pub fn time(mut self, duration_ms: f64) -> Self {
        if duration_ms.is_finite() && duration_ms > 0.0 {
            self.duration_ms = duration_ms;
        } else {
            tracing::warn!("ignoring invalid tween duration {duration_ms}");
        }
        self
    }

    /// Delay before the tween starts, in milliseconds.
    pub fn delay(mut self, delay_ms: f64) -> Self {
        if delay_ms.is_finite() && delay_ms >= 0.0 {
            self.delay_ms = delay_ms;
        } else {
            tracing::warn!("ignoring invalid tween delay {delay_ms}");
        }
        self
    }

    /// Number of iterations; -1 repeats forever.
    pub fn iterations(mut self, count: i32) -> Self {
        if count == 0 {
            tracing::warn!("ignoring iterations = 0, keeping {}", self.iterations);
        } else {
            self.iterations = if count < 0 { -1 } else { count };
        }
        self
    }

    /// Positive playback-rate multiplier.
    pub fn speed_scale(mut self, scale: f64) -> Self {
        if scale.is_finite() && scale > 0.0 {
            self.speed_scale = scale;
        } else {
            tracing::warn!("ignoring invalid tween speed scale {scale}");
        }
        self
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Odd-numbered repeats play forward, even-numbered repeats play back.
    pub fn reflect(mut self, reflect: bool) -> Self {
        self.reflect = reflect;
        self
    }

    /// Treat the supplied property values as offsets from the captured start
    /// values instead of absolute end values.
    pub fn delta(mut self, delta: bool) -> Self {
        self.delta = delta;
        self
    }

    /// Create the tween paused; it will not activate until resumed.
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Derive the duration from a rate of change over a distance. Forces
    /// start/end values to be captured at creation time.
    pub fn constant_rate(mut self, property: RateProperty, units_per_second: f64) -> Self {
        if units_per_second.is_finite() && units_per_second > 0.0 {
            self.constant_rate = Some(ConstantRate {
                property,
                units_per_second,
            });
        } else {
            tracing::warn!("ignoring invalid constant rate {units_per_second}");
        }
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

    pub fn on_repeat(mut self, f: impl FnMut(&PlaybackEvent) + 'static) -> Self {
        self.callbacks.on_repeat = Some(Box::new(f));
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

/// One captured property interpolation span. Immutable once captured.
#[derive(Clone, Debug)]
pub(crate) struct PropertySpan {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

/// Result of advancing a tween one step.
#[derive(Default)]
pub(crate) struct TweenTick {
    pub events: SmallVec<[PlaybackEvent; 4]>,
    pub completed: bool,
    /// Target is dead; the caller must destroy this tween even when it lives
    /// in a nested timeline.
    pub force_remove: bool,
}

/// The tween node stored in the scheduler arena.
pub(crate) struct Tween {
    pub parent: Option<NodeId>,
    pub target: TargetRef,
    /// Property name → declared end value (or offset when `delta`)
    pub requested: Vec<(String, f64)>,
    pub duration_ms: f64,
    /// -1 for infinite
    pub iterations: i32,
    pub easing: Easing,
    pub reflect: bool,
    pub delta: bool,
    pub tag: Option<String>,
    pub clock: Playhead,
    pub callbacks: Callbacks,
    /// Scheduled start in the parent's clock (delay offset); static, used for
    /// duration accounting and seek ordering.
    pub start_in_parent: f64,
    pub has_started: bool,
    pub has_completed: bool,
    /// Current iteration, 1-based once started
    pub iteration: u32,
    /// Captured start/end spans; `Some` exactly once activated (or eagerly
    /// for constant-rate tweens) and immutable thereafter.
    pub captured: Option<Vec<PropertySpan>>,
    pub constant_rate: Option<ConstantRate>,
}

impl Tween {
    pub fn new(
        target: TargetRef,
        requested: Vec<(String, f64)>,
        config: TweenConfig,
        start_in_parent: f64,
    ) -> Self {
        let mut clock = Playhead::starting_at(start_in_parent);
        clock.set_speed_scale(config.speed_scale);
        if config.paused {
            clock.pause();
        }
        Self {
            parent: None,
            target,
            requested,
            duration_ms: config.duration_ms,
            iterations: config.iterations,
            easing: config.easing,
            reflect: config.reflect,
            delta: config.delta,
            tag: config.tag,
            clock,
            callbacks: config.callbacks,
            start_in_parent,
            has_started: false,
            has_completed: false,
            iteration: 0,
            captured: None,
            constant_rate: config.constant_rate,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.iterations < 0
    }

    /// Total local duration across all iterations; `None` when infinite.
    pub fn total_duration(&self) -> Option<f64> {
        if self.is_infinite() {
            None
        } else {
            Some(self.duration_ms * self.iterations as f64)
        }
    }

    /// Whether the next `advance` at `parent_clock` would activate the tween
    /// and capture values. Used by the scheduler to resolve predicted start
    /// values first.
    pub fn would_capture(&self, parent_clock: f64, force: bool) -> bool {
        !self.has_started
            && self.captured.is_none()
            && (!self.clock.is_paused() || force)
            && self.clock.position(parent_clock) >= 0.0
    }

    /// Capture start/end values. Predicted overrides win over current target
    /// reads so seeks land correctly before preceding siblings have played.
    pub fn capture(&mut self, predicted: Option<&FxHashMap<String, f64>>) {
        if self.captured.is_some() {
            return;
        }
        let spans = self
            .requested
            .iter()
            .map(|(name, value)| {
                let start = predicted
                    .and_then(|overrides| overrides.get(name).copied())
                    .or_else(|| self.target.get(name))
                    .unwrap_or_else(|| {
                        tracing::debug!("target missing property {name:?}, starting from 0");
                        0.0
                    });
                let end = if self.delta { start + value } else { *value };
                PropertySpan {
                    name: name.clone(),
                    start,
                    end,
                }
            })
            .collect();
        self.captured = Some(spans);
    }

    /// Eagerly capture and derive the duration for a constant-rate tween.
    /// Returns `false` if the designated properties are not resolvable.
    pub fn resolve_constant_rate(&mut self) -> bool {
        let Some(rate) = self.constant_rate.clone() else {
            return true;
        };
        self.capture(None);
        let Some(spans) = self.captured.as_ref() else {
            return false;
        };
        let span_delta = |name: &str| {
            spans
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.end - s.start)
        };
        let distance = match &rate.property {
            RateProperty::Position => match (span_delta("x"), span_delta("y")) {
                (Some(dx), Some(dy)) => Some((dx * dx + dy * dy).sqrt()),
                _ => None,
            },
            RateProperty::Scale => match (span_delta("xScale"), span_delta("yScale")) {
                (Some(dx), Some(dy)) => Some((dx * dx + dy * dy).sqrt()),
                _ => None,
            },
            RateProperty::Named(name) => span_delta(name).map(f64::abs),
        };
        match distance {
            Some(distance) => {
                let duration = distance / rate.units_per_second * 1000.0;
                // A zero-distance tween still needs a nonzero frame to complete
                self.duration_ms = duration.max(f64::EPSILON);
                true
            }
            None => false,
        }
    }

    /// Value every span lands on when iteration `k` (1-based) ends.
    fn boundary_value(&self, span: &PropertySpan, finished_iteration: u32) -> f64 {
        if self.easing.is_continuous_loop() {
            return span.start;
        }
        if self.reflect && finished_iteration % 2 == 0 {
            span.start
        } else {
            span.end
        }
    }

    /// Advance to the parent clock, writing target properties and collecting
    /// lifecycle events. The caller dispatches events and handles removal.
    pub fn advance(
        &mut self,
        parent_clock: f64,
        force: bool,
        predicted: Option<&FxHashMap<String, f64>>,
    ) -> TweenTick {
        let mut tick = TweenTick::default();
        self.clock.observe(parent_clock);

        if self.has_completed {
            return tick;
        }
        if !self.target.is_alive() {
            tick.force_remove = true;
            return tick;
        }
        if self.clock.is_paused() && !force {
            return tick;
        }

        let position = self.clock.position(parent_clock);
        if position < 0.0 {
            return tick;
        }

        let freshly_started = !self.has_started;
        if freshly_started {
            self.has_started = true;
            self.iteration = 1;
            tick.events.push(
                PlaybackEvent::new(EventKind::Start, position).with_target(self.target.clone()),
            );
            self.capture(predicted);
        }

        // A previously-tweened property reading as absent means the target
        // was destroyed out-of-band. On the capture frame nothing has been
        // written yet, so the check starts one update later.
        if !freshly_started {
            if let Some(spans) = &self.captured {
                if spans.iter().any(|s| self.target.get(&s.name).is_none()) {
                    tick.force_remove = true;
                    return tick;
                }
            }
        }

        let duration = self.duration_ms;
        let total = self.total_duration();
        let clipped = total.map_or(position, |t| position.min(t));
        let iteration_now = {
            let raw = (clipped / duration).floor() as i64 + 1;
            let raw = raw.max(1) as u32;
            match total {
                Some(_) => raw.min(self.iterations as u32),
                None => raw,
            }
        };

        // One repeat per crossed boundary, even across large time jumps
        while self.iteration < iteration_now {
            self.iteration += 1;
            tick.events.push(
                PlaybackEvent::new(EventKind::Repeat, position)
                    .with_target(self.target.clone())
                    .with_iteration(self.iteration),
            );
        }

        let completing = total.is_some_and(|t| position >= t);
        let Some(spans) = self.captured.take() else {
            return tick;
        };

        if completing {
            let final_iteration = self.iterations as u32;
            for span in &spans {
                self.target
                    .set(&span.name, self.boundary_value(span, final_iteration));
            }
            self.has_completed = true;
            tick.completed = true;
            tick.events.push(
                PlaybackEvent::new(EventKind::Complete, clipped)
                    .with_target(self.target.clone())
                    .with_iteration(final_iteration),
            );
        } else {
            let in_iteration = clipped - (iteration_now - 1) as f64 * duration;
            if in_iteration == 0.0 && iteration_now > 1 {
                // Exactly on a boundary: snap to the finished iteration's end
                // value rather than interpolating, avoiding float drift.
                for span in &spans {
                    self.target
                        .set(&span.name, self.boundary_value(span, iteration_now - 1));
                }
            } else {
                let elapsed = if self.reflect && iteration_now % 2 == 0 {
                    duration - in_iteration
                } else {
                    in_iteration
                };
                for span in &spans {
                    let value =
                        self.easing
                            .apply(elapsed, duration, span.start, span.end - span.start);
                    self.target.set(&span.name, value);
                }
            }
        }

        self.captured = Some(spans);
        tick
    }

    /// Re-baseline to `position` (an explicit seek). Flags and the iteration
    /// counter follow the new position; captured values are kept.
    pub fn seek(&mut self, position: f64) {
        self.clock.seek(position);
        self.resync_flags(position);
    }

    /// Align flags and iteration with a discontinuous jump to `position`,
    /// local to this tween. Used both by direct seeks and by a parent
    /// timeline cascading its own seek.
    pub fn resync_flags(&mut self, position: f64) {
        if position <= 0.0 {
            self.has_started = false;
            self.has_completed = false;
            self.iteration = 0;
            return;
        }
        if let Some(total) = self.total_duration() {
            if position < total {
                self.has_completed = false;
            }
        }
        if self.has_started {
            let raw = (position / self.duration_ms).floor() as i64 + 1;
            let raw = raw.max(1) as u32;
            self.iteration = if self.is_infinite() {
                raw
            } else {
                raw.min(self.iterations as u32)
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glide_core::PropertyBag;

    fn make_target(x: f64) -> TargetRef {
        TargetRef::new(PropertyBag::new().with("x", x))
    }

    fn advance(tween: &mut Tween, at: f64) -> TweenTick {
        tween.advance(at, false, None)
    }

    #[test]
    fn test_simple_interpolation() {
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target.clone(),
            vec![("x".into(), 100.0)],
            TweenConfig::new().time(1000.0),
            0.0,
        );

        advance(&mut tween, 0.0);
        assert_eq!(target.get("x"), Some(0.0));

        advance(&mut tween, 500.0);
        assert!((target.get("x").unwrap() - 50.0).abs() < 1e-9);

        let tick = advance(&mut tween, 1000.0);
        assert_eq!(target.get("x"), Some(100.0));
        assert!(tick.completed);
    }

    #[test]
    fn test_complete_fires_exactly_once() {
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target,
            vec![("x".into(), 10.0)],
            TweenConfig::new().time(100.0),
            0.0,
        );

        let tick = advance(&mut tween, 250.0);
        assert!(tick.completed);
        assert!(tick
            .events
            .iter()
            .any(|e| e.kind == EventKind::Complete));

        let tick = advance(&mut tween, 400.0);
        assert!(!tick.completed);
        assert!(tick.events.is_empty());
    }

    #[test]
    fn test_reflect_two_iterations_scenario() {
        // 0→100 over 1000ms, 2 iterations, reflect: plays out and back,
        // ending on the start value.
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target.clone(),
            vec![("x".into(), 100.0)],
            TweenConfig::new().time(1000.0).iterations(2).reflect(true),
            0.0,
        );

        advance(&mut tween, 500.0);
        assert!((target.get("x").unwrap() - 50.0).abs() < 1e-9);

        advance(&mut tween, 1000.0);
        assert_eq!(target.get("x"), Some(100.0));

        advance(&mut tween, 1500.0);
        assert!((target.get("x").unwrap() - 50.0).abs() < 1e-9);

        let tick = advance(&mut tween, 2000.0);
        assert_eq!(target.get("x"), Some(0.0));
        assert!(tick.completed);
    }

    #[test]
    fn test_repeat_fires_per_crossed_boundary() {
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target,
            vec![("x".into(), 10.0)],
            TweenConfig::new().time(100.0).iterations(5),
            0.0,
        );

        advance(&mut tween, 10.0);
        // Jump across three boundaries in one update
        let tick = advance(&mut tween, 350.0);
        let repeats: Vec<u32> = tick
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Repeat)
            .map(|e| e.iteration)
            .collect();
        assert_eq!(repeats, vec![2, 3, 4]);
    }

    #[test]
    fn test_delta_accumulates_from_capture() {
        let target = make_target(40.0);
        let mut tween = Tween::new(
            target.clone(),
            vec![("x".into(), 10.0)],
            TweenConfig::new().time(100.0).delta(true),
            0.0,
        );
        advance(&mut tween, 100.0);
        assert_eq!(target.get("x"), Some(50.0));
    }

    #[test]
    fn test_lazy_capture_respects_pre_start_mutation() {
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target.clone(),
            vec![("x".into(), 100.0)],
            TweenConfig::new().time(100.0).delay(500.0),
            500.0,
        );

        advance(&mut tween, 100.0); // still pending
        target.set("x", 60.0); // mutated before activation

        advance(&mut tween, 550.0);
        let spans = tween.captured.as_ref().unwrap();
        assert_eq!(spans[0].start, 60.0);
    }

    #[test]
    fn test_predicted_start_overrides_target_read() {
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target.clone(),
            vec![("x".into(), 100.0)],
            TweenConfig::new().time(100.0),
            0.0,
        );
        let mut predicted = FxHashMap::default();
        predicted.insert("x".to_string(), 70.0);

        tween.advance(0.0, false, Some(&predicted));
        let spans = tween.captured.as_ref().unwrap();
        assert_eq!(spans[0].start, 70.0);
    }

    #[test]
    fn test_dead_target_forces_removal() {
        let dead = TargetRef::new({
            let mut bag = PropertyBag::new().with("x", 0.0);
            bag.destroy();
            bag
        });
        let mut doomed = Tween::new(
            dead,
            vec![("x".into(), 10.0)],
            TweenConfig::new().time(1000.0),
            0.0,
        );
        let tick = advance(&mut doomed, 100.0);
        assert!(tick.force_remove);
    }

    #[test]
    fn test_constant_rate_duration_from_distance() {
        let target = TargetRef::new(PropertyBag::new().with("x", 0.0).with("y", 0.0));
        let mut tween = Tween::new(
            target,
            vec![("x".into(), 300.0), ("y".into(), 400.0)],
            TweenConfig::new().constant_rate(RateProperty::Position, 100.0),
            0.0,
        );
        assert!(tween.resolve_constant_rate());
        // 3-4-5 triangle: 500 units at 100 units/s = 5000ms
        assert!((tween.duration_ms - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_rate_unresolvable_property() {
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target,
            vec![("x".into(), 10.0)],
            TweenConfig::new().constant_rate(RateProperty::Named("spin".into()), 10.0),
            0.0,
        );
        assert!(!tween.resolve_constant_rate());
    }

    #[test]
    fn test_seek_before_start_clears_flags_keeps_capture() {
        let target = make_target(5.0);
        let mut tween = Tween::new(
            target,
            vec![("x".into(), 10.0)],
            TweenConfig::new().time(100.0),
            0.0,
        );
        advance(&mut tween, 50.0);
        assert!(tween.has_started);
        let captured_start = tween.captured.as_ref().unwrap()[0].start;

        tween.seek(-10.0);
        assert!(!tween.has_started);
        assert!(!tween.has_completed);
        assert_eq!(tween.iteration, 0);
        assert_eq!(tween.captured.as_ref().unwrap()[0].start, captured_start);
    }

    #[test]
    fn test_infinite_tween_never_completes() {
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target,
            vec![("x".into(), 10.0)],
            TweenConfig::new().time(100.0).iterations(-1),
            0.0,
        );
        let tick = advance(&mut tween, 1_000_000.0);
        assert!(!tick.completed);
        assert!(tween.total_duration().is_none());
        assert_eq!(tween.iteration, 10_001);
    }

    #[test]
    fn test_paused_update_is_noop_unless_forced() {
        let target = make_target(0.0);
        let mut tween = Tween::new(
            target.clone(),
            vec![("x".into(), 100.0)],
            TweenConfig::new().time(1000.0).paused(true),
            0.0,
        );
        advance(&mut tween, 500.0);
        assert_eq!(target.get("x"), Some(0.0));

        tween.advance(500.0, true, None);
        assert_eq!(target.get("x"), Some(0.0)); // frozen at position 0
    }
}
