//! End-to-end playback tests driving the public scheduler surface
//!
//! These scenarios exercise the scheduling and time-accounting core as a
//! whole: seeks landing where forward playback would, paused time never
//! counting, cancellation breadth across timelines, and marker semantics
//! across discontinuous jumps.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use glide_animation::{
    RateProperty, Scheduler, Selector, TimelineConfig, TimelineHandle, TweenConfig,
};
use glide_core::{PropertyBag, TargetRef};

fn target(properties: &[(&str, f64)]) -> TargetRef {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut bag = PropertyBag::new();
    for (name, value) in properties {
        bag.insert(*name, *value);
    }
    TargetRef::new(bag)
}

/// Two sequential tweens on the same property: x 0→100 over the first
/// second, then 100→200 over the next.
fn sequential_timeline(scheduler: &Scheduler, target: &TargetRef) -> TimelineHandle {
    scheduler
        .new_timeline(
            TimelineConfig::new()
                .auto_play(true)
                .tween(0.0, target, &[("x", 100.0)], TweenConfig::new().time(1000.0))
                .tween(
                    1000.0,
                    target,
                    &[("x", 200.0)],
                    TweenConfig::new().time(1000.0),
                ),
        )
        .unwrap()
}

#[test]
fn forward_playback_through_sequential_tweens() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0)]);
    sequential_timeline(&scheduler, &obj);

    scheduler.advance(500.0);
    assert!((obj.get("x").unwrap() - 50.0).abs() < 1e-6);

    scheduler.advance(1500.0);
    assert!((obj.get("x").unwrap() - 150.0).abs() < 1e-6);

    scheduler.advance(2000.0);
    assert!((obj.get("x").unwrap() - 200.0).abs() < 1e-6);
}

#[test]
fn cold_seek_uses_predicted_start_value() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0)]);
    let timeline = sequential_timeline(&scheduler, &obj);

    // Jump straight into the second tween without ever playing the first:
    // its start value must be predicted from the first tween's end.
    timeline.set_position(1500.0).unwrap();
    assert!((obj.get("x").unwrap() - 150.0).abs() < 1e-6);
}

#[test]
fn seek_to_zero_and_replay_matches_forward_playback() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0)]);
    let timeline = sequential_timeline(&scheduler, &obj);

    timeline.set_position(1500.0).unwrap();
    timeline.set_position(0.0).unwrap();
    assert!((obj.get("x").unwrap() - 0.0).abs() < 1e-6);

    scheduler.advance(500.0);
    assert!((obj.get("x").unwrap() - 50.0).abs() < 1e-6);
    scheduler.advance(1500.0);
    assert!((obj.get("x").unwrap() - 150.0).abs() < 1e-6);
}

#[test]
fn marker_at_seek_position_fires_on_next_update() {
    let scheduler = Scheduler::new();
    let passed: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = passed.clone();

    let timeline = scheduler
        .new_timeline(
            TimelineConfig::new()
                .auto_play(true)
                .marker("mid", 500.0)
                .on_marker_pass(move |event| {
                    sink.borrow_mut()
                        .push(event.marker.as_ref().unwrap().name.clone());
                }),
        )
        .unwrap();
    // Keep the timeline open past the marker
    timeline.add_marker("end", 1000.0).unwrap();

    // Landing exactly on the marker: inclusive semantics after the seek
    timeline.set_position(500.0).unwrap();
    assert!(passed.borrow().is_empty());

    scheduler.advance(0.0);
    assert_eq!(*passed.borrow(), vec!["mid"]);

    // The following pass is strict again; the marker does not re-fire
    scheduler.advance(10.0);
    assert_eq!(*passed.borrow(), vec!["mid"]);
}

#[test]
fn marker_payload_is_delivered_untouched() {
    let scheduler = Scheduler::new();
    let seen: Rc<RefCell<Option<u32>>> = Rc::new(RefCell::new(None));
    let sink = seen.clone();

    scheduler
        .new_timeline(
            TimelineConfig::new()
                .auto_play(true)
                .marker_with_payload("cue", 100.0, Rc::new(42u32))
                .marker("end", 500.0)
                .on_marker_pass(move |event| {
                    let marker = event.marker.as_ref().unwrap();
                    if marker.name == "cue" {
                        let payload = marker.payload.clone().unwrap();
                        *sink.borrow_mut() = payload.downcast_ref::<u32>().copied();
                    }
                }),
        )
        .unwrap();

    scheduler.advance(150.0);
    assert_eq!(*seen.borrow(), Some(42));
}

#[test]
fn cancellation_is_synchronous_from_callbacks() {
    let scheduler = Scheduler::new();
    let first = target(&[("x", 0.0)]);
    let second = target(&[("y", 0.0)]);

    let doomed = scheduler
        .to(&second, &[("y", 100.0)], TweenConfig::new().time(1000.0))
        .unwrap();

    let victim = doomed.clone();
    scheduler
        .to(
            &first,
            &[("x", 10.0)],
            TweenConfig::new().time(100.0).on_complete(move |_| {
                victim.cancel();
            }),
        )
        .unwrap();

    scheduler.advance(100.0);
    assert!(!doomed.is_valid());
    let frozen = second.get("y").unwrap();

    scheduler.advance(1000.0);
    assert_eq!(second.get("y"), Some(frozen));
}

#[test]
fn cancel_callbacks_have_fired_when_cancel_returns() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0)]);
    let cancelled = Rc::new(Cell::new(false));
    let flag = cancelled.clone();

    let handle = scheduler
        .to(
            &obj,
            &[("x", 10.0)],
            TweenConfig::new().time(1000.0).on_cancel(move |_| {
                flag.set(true);
            }),
        )
        .unwrap();

    handle.cancel();
    assert!(cancelled.get());
    assert!(!handle.is_valid());
}

#[test]
fn dead_target_is_removed_even_from_nested_timelines() {
    let scheduler = Scheduler::new();
    let bag = Rc::new(RefCell::new(PropertyBag::new().with("x", 0.0)));
    let obj = TargetRef::from_shared(bag.clone());

    scheduler
        .new_timeline(
            TimelineConfig::new()
                .auto_play(true)
                .tween(0.0, &obj, &[("x", 100.0)], TweenConfig::new().time(1000.0)),
        )
        .unwrap();

    scheduler.advance(100.0);
    assert_eq!(scheduler.tween_count(), 1);

    // Host destroys the target out-of-band
    bag.borrow_mut().destroy();
    scheduler.advance(200.0);
    assert_eq!(scheduler.tween_count(), 0);
    assert_eq!(scheduler.timeline_count(), 1);
}

#[test]
fn infinite_child_makes_timeline_duration_unbounded() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0)]);
    let completions = Rc::new(Cell::new(0u32));
    let counter = completions.clone();

    let timeline = scheduler
        .new_timeline(
            TimelineConfig::new()
                .auto_play(true)
                .tween(
                    0.0,
                    &obj,
                    &[("x", 10.0)],
                    TweenConfig::new().time(100.0).iterations(-1),
                )
                .on_complete(move |_| counter.set(counter.get() + 1)),
        )
        .unwrap();

    assert_eq!(timeline.get_duration(), None);
    assert_eq!(timeline.get_total_duration(), None);

    scheduler.advance(100_000.0);
    assert_eq!(completions.get(), 0);
}

#[test]
fn constant_rate_duration_through_public_surface() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0), ("y", 0.0)]);

    let handle = scheduler
        .to(
            &obj,
            &[("x", 300.0), ("y", 400.0)],
            TweenConfig::new().constant_rate(RateProperty::Position, 100.0),
        )
        .unwrap();

    // 3-4-5 triangle: 500 units at 100 units/s
    assert_eq!(handle.get_duration(), Some(5000.0));

    scheduler.advance(2500.0);
    assert!((obj.get("x").unwrap() - 150.0).abs() < 1e-6);
    assert!((obj.get("y").unwrap() - 200.0).abs() < 1e-6);
}

#[test]
fn timeline_speed_scale_stretches_children() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0)]);
    let timeline = scheduler
        .new_timeline(
            TimelineConfig::new()
                .auto_play(true)
                .speed_scale(2.0)
                .tween(0.0, &obj, &[("x", 100.0)], TweenConfig::new().time(1000.0)),
        )
        .unwrap();

    // 250ms of wall clock at 2x is 500ms of timeline time
    scheduler.advance(250.0);
    assert_eq!(timeline.get_position(), Some(500.0));
    assert!((obj.get("x").unwrap() - 50.0).abs() < 1e-6);
}

#[test]
fn nested_timeline_completes_with_its_parent() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0), ("y", 0.0)]);
    let inner_complete = Rc::new(Cell::new(false));
    let outer_complete = Rc::new(Cell::new(false));
    let inner_flag = inner_complete.clone();
    let outer_flag = outer_complete.clone();

    scheduler
        .new_timeline(
            TimelineConfig::new()
                .auto_play(true)
                .tween(0.0, &obj, &[("x", 10.0)], TweenConfig::new().time(200.0))
                .timeline(
                    100.0,
                    TimelineConfig::new()
                        .auto_play(true)
                        .tween(0.0, &obj, &[("y", 10.0)], TweenConfig::new().time(300.0))
                        .on_complete(move |_| inner_flag.set(true)),
                )
                .on_complete(move |_| outer_flag.set(true)),
        )
        .unwrap();

    scheduler.advance(200.0);
    assert!(!inner_complete.get());
    assert!(!outer_complete.get());

    // Inner extent: 100 + 300 = 400 local ms, which is the outer duration
    scheduler.advance(400.0);
    assert!(inner_complete.get());
    assert!(outer_complete.get());
    assert_eq!(obj.get("y"), Some(10.0));
}

#[test]
fn pause_by_tag_reaches_nested_tweens() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0), ("y", 0.0)]);

    scheduler
        .new_timeline(
            TimelineConfig::new()
                .auto_play(true)
                .tween(
                    0.0,
                    &obj,
                    &[("x", 100.0)],
                    TweenConfig::new().time(1000.0).tag("held"),
                )
                .tween(0.0, &obj, &[("y", 100.0)], TweenConfig::new().time(1000.0)),
        )
        .unwrap();

    scheduler.pause(&Selector::tag("held"));
    scheduler.advance(500.0);

    assert_eq!(obj.get("x"), Some(0.0));
    assert!((obj.get("y").unwrap() - 50.0).abs() < 1e-6);
}

#[test]
fn resume_does_not_fire_without_matching_pause() {
    let scheduler = Scheduler::new();
    let obj = target(&[("x", 0.0)]);
    let resumes = Rc::new(Cell::new(0u32));
    let counter = resumes.clone();

    scheduler
        .to(
            &obj,
            &[("x", 10.0)],
            TweenConfig::new()
                .time(1000.0)
                .on_resume(move |_| counter.set(counter.get() + 1)),
        )
        .unwrap();

    scheduler.resume(&Selector::Everything);
    assert_eq!(resumes.get(), 0);

    scheduler.pause(&Selector::Everything);
    scheduler.resume(&Selector::Everything);
    assert_eq!(resumes.get(), 1);
}
