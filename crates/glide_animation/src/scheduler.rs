//! Animation scheduler
//!
//! Holds every live tween and timeline in one arena, drives the whole tree
//! once per host tick, and routes control operations (pause/resume/cancel/
//! speed/position) to the right nodes through a selector resolved at the
//! public boundary.
//!
//! The engine sits behind a shared cell; `Scheduler` owns it and
//! `SchedulerHandle` holds a weak reference for callbacks and host
//! components. Update passes never iterate a live collection: each pass
//! snapshots the ids it will visit, nodes created by callbacks during the
//! pass are merged in afterwards, and nodes removed during the pass are
//! pruned afterwards. Callbacks always run with the engine unborrowed (their
//! closure is taken out of its slot, invoked, and restored), so they may
//! freely create or cancel animations mid-pass.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use glide_core::{TargetKey, TargetRef};

use crate::error::{AnimationError, Result};
use crate::events::{EventCallback, EventKind, MarkerEvent, MarkerPayload, PlaybackEvent};
use crate::selector::{Selector, TimePosition};
use crate::timeline::{ChildSpec, Marker, Timeline, TimelineConfig, TweenSpec};
use crate::tween::{RateProperty, Tween, TweenConfig};

new_key_type! {
    /// Stable handle to a tween or timeline in the scheduler arena
    pub struct NodeId;
}

/// A node in the animation tree.
pub(crate) enum Node {
    Tween(Tween),
    Timeline(Timeline),
}

impl Node {
    fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Tween(t) => t.parent,
            Node::Timeline(tl) => tl.parent,
        }
    }

    fn tag(&self) -> Option<&str> {
        match self {
            Node::Tween(t) => t.tag.as_deref(),
            Node::Timeline(tl) => tl.tag.as_deref(),
        }
    }

    fn target(&self) -> Option<TargetRef> {
        match self {
            Node::Tween(t) => Some(t.target.clone()),
            Node::Timeline(_) => None,
        }
    }

    fn current_position(&self) -> f64 {
        match self {
            Node::Tween(t) => t.clock.current_position(),
            Node::Timeline(tl) => tl.position,
        }
    }

    fn callbacks_mut(&mut self) -> &mut crate::events::Callbacks {
        match self {
            Node::Tween(t) => &mut t.callbacks,
            Node::Timeline(tl) => &mut tl.callbacks,
        }
    }

    fn start_in_parent(&self) -> f64 {
        match self {
            Node::Tween(t) => t.start_in_parent,
            Node::Timeline(tl) => tl.start_in_parent,
        }
    }
}

/// Internal state of the animation scheduler.
pub(crate) struct Engine {
    pub nodes: SlotMap<NodeId, Node>,
    /// Live top-level timelines; index 0 is the default timeline if present
    roots: Vec<NodeId>,
    /// Roots created while a pass is running; merged in afterwards
    pending_roots: Vec<NodeId>,
    default_timeline: Option<NodeId>,
    /// Timestamp of the most recent `advance`; the reference clock for
    /// control calls issued between frames
    last_time: f64,
    in_pass: bool,
    wake_callback: Option<Box<dyn FnMut()>>,
    tick_registered: bool,
}

impl Engine {
    fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            roots: Vec::new(),
            pending_roots: Vec::new(),
            default_timeline: None,
            last_time: 0.0,
            in_pass: false,
            wake_callback: None,
            tick_registered: false,
        }
    }
}

type SharedEngine = Rc<RefCell<Engine>>;
type WeakEngine = Weak<RefCell<Engine>>;

/// Result of one matching tween or timeline from [`Scheduler::get_animations`].
#[derive(Clone)]
pub enum AnimationRef {
    Tween(TweenHandle),
    Timeline(TimelineHandle),
}

impl AnimationRef {
    pub fn node_id(&self) -> NodeId {
        match self {
            AnimationRef::Tween(h) => h.id,
            AnimationRef::Timeline(h) => h.id,
        }
    }
}

// ============================================================================
// Event dispatch
// ============================================================================

/// Invoke a node's callback for `event.kind`, if registered.
///
/// The closure is taken out of its slot, run with the engine unborrowed, and
/// restored afterwards (unless the node vanished or replaced it meanwhile).
fn fire(engine: &SharedEngine, id: NodeId, event: PlaybackEvent) {
    let kind = event.kind;
    let callback = engine
        .borrow_mut()
        .nodes
        .get_mut(id)
        .and_then(|node| node.callbacks_mut().take(kind));
    if let Some(mut callback) = callback {
        callback(&event);
        if let Some(node) = engine.borrow_mut().nodes.get_mut(id) {
            node.callbacks_mut().restore(kind, callback);
        }
    }
}

// ============================================================================
// Creation
// ============================================================================

fn register_tick(engine: &SharedEngine) {
    let callback = {
        let mut e = engine.borrow_mut();
        if e.tick_registered {
            None
        } else {
            e.tick_registered = true;
            e.wake_callback.take()
        }
    };
    if let Some(mut callback) = callback {
        callback();
        let mut e = engine.borrow_mut();
        if e.wake_callback.is_none() {
            e.wake_callback = Some(callback);
        }
    }
}

/// Get or lazily create the default timeline. Creating it counts as the
/// first timeline for tick registration.
fn ensure_default(engine: &SharedEngine) -> NodeId {
    let (id, created) = {
        let mut e = engine.borrow_mut();
        match e.default_timeline {
            Some(id) => (id, false),
            None => {
                let id = e.nodes.insert(Node::Timeline(Timeline::default_root()));
                e.default_timeline = Some(id);
                if e.in_pass {
                    e.pending_roots.push(id);
                } else {
                    e.roots.insert(0, id);
                }
                (id, true)
            }
        }
    };
    if created {
        register_tick(engine);
    }
    id
}

fn validated_properties(properties: &[(&str, f64)]) -> Vec<(String, f64)> {
    let mut requested = Vec::with_capacity(properties.len());
    for (name, value) in properties {
        if value.is_finite() {
            requested.push((name.to_string(), *value));
        } else {
            tracing::warn!("dropping non-finite value {value} for property {name:?}");
        }
    }
    requested
}

fn create_tween(
    engine: &SharedEngine,
    target: &TargetRef,
    properties: &[(&str, f64)],
    mut config: TweenConfig,
    invert: bool,
) -> Result<TweenHandle> {
    let mut requested = validated_properties(properties);
    if requested.is_empty() {
        return Err(AnimationError::NoProperties);
    }

    if invert {
        // "from" semantics: swap current target values with the supplied
        // ones right now, baking the inversion in; delta no longer applies.
        for (name, value) in requested.iter_mut() {
            let current = target.get(name).unwrap_or(0.0);
            target.set(name, *value);
            *value = current;
        }
        config.delta = false;
    }

    let default_id = ensure_default(engine);

    let id = {
        let mut e = engine.borrow_mut();
        // Default-timeline children use absolute offsets
        let start = e.last_time + config.delay_ms;
        let mut tween = Tween::new(target.clone(), requested, config, start);
        tween.parent = Some(default_id);
        if tween.constant_rate.is_some() && !tween.resolve_constant_rate() {
            let rate = tween.constant_rate.as_ref().map(|r| r.property.clone());
            return Err(AnimationError::UnresolvableRate(describe_rate(rate)));
        }
        let id = e.nodes.insert(Node::Tween(tween));
        if let Some(Node::Timeline(tl)) = e.nodes.get_mut(default_id) {
            tl.adopt(id);
        }
        id
    };

    Ok(TweenHandle {
        id,
        engine: Rc::downgrade(engine),
    })
}

fn describe_rate(property: Option<RateProperty>) -> String {
    match property {
        Some(RateProperty::Position) => "x/y".to_string(),
        Some(RateProperty::Scale) => "xScale/yScale".to_string(),
        Some(RateProperty::Named(name)) => name,
        None => String::new(),
    }
}

fn create_timeline(engine: &SharedEngine, config: TimelineConfig) -> Result<TimelineHandle> {
    let id = {
        let mut e = engine.borrow_mut();
        let now = e.last_time;
        let id = build_timeline(&mut e, config, None, now)?;
        if e.in_pass {
            e.pending_roots.push(id);
        } else {
            e.roots.push(id);
        }
        id
    };
    register_tick(engine);
    Ok(TimelineHandle {
        id,
        engine: Rc::downgrade(engine),
    })
}

fn build_timeline(
    e: &mut Engine,
    config: TimelineConfig,
    parent: Option<NodeId>,
    start_in_parent: f64,
) -> Result<NodeId> {
    let mut timeline = Timeline::new(&config, start_in_parent);
    timeline.parent = parent;
    timeline.callbacks = config.callbacks;
    let id = e.nodes.insert(Node::Timeline(timeline));

    match populate_timeline(e, id, config.markers, config.children) {
        Ok(()) => {
            let duration = computed_duration(e, id);
            if let Some(Node::Timeline(tl)) = e.nodes.get_mut(id) {
                tl.duration = duration;
            }
            Ok(id)
        }
        Err(err) => {
            remove_subtree(e, id);
            Err(err)
        }
    }
}

fn populate_timeline(
    e: &mut Engine,
    id: NodeId,
    markers: Vec<(String, f64, Option<MarkerPayload>)>,
    mut children: Vec<ChildSpec>,
) -> Result<()> {
    if let Some(Node::Timeline(tl)) = e.nodes.get_mut(id) {
        for (name, time, payload) in markers {
            if let Err(err) = tl.markers.add(&name, time, payload) {
                tracing::warn!("dropping marker: {err}");
            }
        }
    }

    // Evaluation order follows start time; declaration order breaks ties
    children.sort_by(|a, b| child_spec_start(a).total_cmp(&child_spec_start(b)));

    for spec in children {
        match spec {
            ChildSpec::Tween(spec) => build_child_tween(e, id, spec)?,
            ChildSpec::Timeline(start, config) => {
                let child = build_timeline(e, config, Some(id), start)?;
                if let Some(Node::Timeline(tl)) = e.nodes.get_mut(id) {
                    tl.children.push(child);
                }
            }
        }
    }
    Ok(())
}

fn child_spec_start(spec: &ChildSpec) -> f64 {
    match spec {
        ChildSpec::Tween(t) => t.start_time,
        ChildSpec::Timeline(start, _) => *start,
    }
}

fn build_child_tween(e: &mut Engine, parent: NodeId, spec: TweenSpec) -> Result<()> {
    let requested: Vec<(String, f64)> = {
        let mut out = Vec::with_capacity(spec.properties.len());
        for (name, value) in spec.properties {
            if value.is_finite() {
                out.push((name, value));
            } else {
                tracing::warn!("dropping non-finite value {value} for property {name:?}");
            }
        }
        out
    };
    if requested.is_empty() {
        return Err(AnimationError::NoProperties);
    }

    let start = spec.start_time + spec.config.delay_ms;
    let mut tween = Tween::new(spec.target, requested, spec.config, start);
    tween.parent = Some(parent);
    if tween.constant_rate.is_some() && !tween.resolve_constant_rate() {
        let rate = tween.constant_rate.as_ref().map(|r| r.property.clone());
        return Err(AnimationError::UnresolvableRate(describe_rate(rate)));
    }

    let key = tween.target.key();
    let property_names: SmallVec<[String; 4]> =
        tween.requested.iter().map(|(name, _)| name.clone()).collect();
    let id = e.nodes.insert(Node::Tween(tween));
    if let Some(Node::Timeline(tl)) = e.nodes.get_mut(parent) {
        tl.children.push(id);
        for name in &property_names {
            tl.schedule.insert(key, name, start, id);
        }
    }
    Ok(())
}

// ============================================================================
// Duration accounting
// ============================================================================

/// A timeline's aggregate local duration, recomputed from live children and
/// markers (never a cached child value). `None` means unbounded.
fn computed_duration(e: &Engine, id: NodeId) -> Option<f64> {
    let Some(Node::Timeline(tl)) = e.nodes.get(id) else {
        return Some(0.0);
    };
    if tl.is_default {
        return None;
    }
    let mut max = 0.0_f64;
    for &child in &tl.children {
        match node_extent(e, child) {
            Some(extent) => max = max.max(extent),
            None => return None,
        }
    }
    if let Some(last) = tl.markers.last_time() {
        max = max.max(last);
    }
    Some(max)
}

/// The latest parent-local time at which `id` could still be active:
/// its start offset plus its total local duration over its speed scale.
fn node_extent(e: &Engine, id: NodeId) -> Option<f64> {
    let Some(node) = e.nodes.get(id) else {
        return Some(0.0);
    };
    match node {
        Node::Tween(t) => t
            .total_duration()
            .map(|total| t.start_in_parent + total / t.clock.speed_scale()),
        Node::Timeline(tl) => {
            let speed = tl.clock.speed_scale();
            let start = tl.start_in_parent;
            computed_duration(e, id).map(|d| start + d / speed)
        }
    }
}

/// Full rescan of `from` and every ancestor. Used when a removal or speed
/// change may have shrunk an aggregate duration.
fn rescan_durations_upward(e: &mut Engine, from: Option<NodeId>) {
    let mut current = from;
    while let Some(id) = current {
        let parent = match e.nodes.get(id) {
            Some(Node::Timeline(tl)) => tl.parent,
            Some(Node::Tween(t)) => t.parent,
            None => None,
        };
        if matches!(e.nodes.get(id), Some(Node::Timeline(_))) {
            let duration = computed_duration(e, id);
            if let Some(Node::Timeline(tl)) = e.nodes.get_mut(id) {
                if !tl.is_default {
                    tl.duration = duration;
                }
            }
        }
        current = parent;
    }
}

/// O(1) raise of each ancestor's duration after an insert or marker add that
/// can only extend the aggregate.
fn raise_duration_chain(e: &mut Engine, id: NodeId) {
    let mut child = id;
    loop {
        let parent = match e.nodes.get(child) {
            Some(node) => node.parent(),
            None => return,
        };
        let Some(parent_id) = parent else { return };
        let is_default = match e.nodes.get(parent_id) {
            Some(Node::Timeline(tl)) => tl.is_default,
            _ => return,
        };
        if is_default {
            return;
        }
        let extent = node_extent(e, child);
        if let Some(Node::Timeline(tl)) = e.nodes.get_mut(parent_id) {
            match extent {
                None => tl.duration = None,
                Some(extent) => {
                    if let Some(current) = tl.duration {
                        if extent > current {
                            tl.duration = Some(extent);
                        } else {
                            return; // nothing changed upward either
                        }
                    }
                }
            }
        }
        child = parent_id;
    }
}

// ============================================================================
// Predicted start values
// ============================================================================

/// Resolve the assumed starting values for a tween activating before its
/// preceding siblings have played, by chaining end values along the
/// per-(target, property) schedule.
fn predicted_start_values(
    e: &Engine,
    timeline_id: NodeId,
    tween_id: NodeId,
) -> Option<FxHashMap<String, f64>> {
    let Some(Node::Timeline(tl)) = e.nodes.get(timeline_id) else {
        return None;
    };
    let Some(Node::Tween(tween)) = e.nodes.get(tween_id) else {
        return None;
    };

    let key = tween.target.key();
    let mut map = FxHashMap::default();
    for (property, _) in &tween.requested {
        let mut value: Option<f64> = None;
        for (_, prev_id) in tl.schedule.preceding(key, property, tween.start_in_parent) {
            if *prev_id == tween_id {
                continue;
            }
            let Some(Node::Tween(prev)) = e.nodes.get(*prev_id) else {
                continue;
            };
            let end = if let Some(spans) = &prev.captured {
                spans.iter().find(|s| s.name == *property).map(|s| s.end)
            } else {
                prev.requested
                    .iter()
                    .find(|(name, _)| name == property)
                    .map(|(_, requested)| {
                        if prev.delta {
                            let base = value
                                .or_else(|| prev.target.get(property))
                                .unwrap_or(0.0);
                            base + requested
                        } else {
                            *requested
                        }
                    })
            };
            if let Some(end) = end {
                value = Some(end);
            }
        }
        if let Some(value) = value {
            map.insert(property.clone(), value);
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

// ============================================================================
// Removal
// ============================================================================

/// Detach `id` from its parent and remove it and every descendant from the
/// arena. Returns the removed nodes so cancellation can fire their
/// callbacks. Ancestor durations are rescanned (removal can only shrink).
fn remove_subtree(e: &mut Engine, id: NodeId) -> Vec<Node> {
    let parent = e.nodes.get(id).and_then(|node| node.parent());
    if let Some(parent_id) = parent {
        if let Some(Node::Timeline(tl)) = e.nodes.get_mut(parent_id) {
            tl.children.retain(|c| *c != id);
            tl.pending_children.retain(|c| *c != id);
            tl.schedule.remove_node(id);
        }
    }

    let mut stack = vec![id];
    let mut removed = Vec::new();
    while let Some(next) = stack.pop() {
        if let Some(node) = e.nodes.remove(next) {
            if let Node::Timeline(tl) = &node {
                stack.extend(tl.children.iter().copied());
                stack.extend(tl.pending_children.iter().copied());
            }
            removed.push(node);
        }
    }

    let Engine {
        roots,
        pending_roots,
        nodes,
        default_timeline,
        ..
    } = e;
    roots.retain(|r| nodes.contains_key(*r));
    pending_roots.retain(|r| nodes.contains_key(*r));
    if default_timeline.is_some_and(|d| !nodes.contains_key(d)) {
        *default_timeline = None;
    }

    rescan_durations_upward(e, parent);
    removed
}

/// Cancel a node: synchronously remove it and its whole subtree, then fire
/// each removed node's cancel callback. Once this returns, no further update
/// of the subtree can ever occur.
fn cancel_node(engine: &SharedEngine, id: NodeId) {
    let fired: Vec<(EventCallback, PlaybackEvent)> = {
        let mut e = engine.borrow_mut();
        if !e.nodes.contains_key(id) {
            return;
        }
        let removed = remove_subtree(&mut e, id);
        removed
            .into_iter()
            .filter_map(|mut node| {
                let position = node.current_position();
                let target = node.target();
                node.callbacks_mut().take(EventKind::Cancel).map(|callback| {
                    let mut event = PlaybackEvent::new(EventKind::Cancel, position);
                    if let Some(target) = target {
                        event = event.with_target(target);
                    }
                    (callback, event)
                })
            })
            .collect()
    };
    for (mut callback, event) in fired {
        callback(&event);
    }
}

// ============================================================================
// Frame pass
// ============================================================================

enum NodeOutcome {
    Gone,
    Running,
    TweenCompleted,
    ForceRemoved,
}

/// The tail half of the snapshot-then-merge discipline shared by the root
/// pass and every timeline pass: fold in nodes created mid-pass, then drop
/// ids whose nodes were removed mid-pass.
fn merge_and_prune(list: &mut Vec<NodeId>, pending: Vec<NodeId>, nodes: &SlotMap<NodeId, Node>) {
    list.extend(pending);
    list.retain(|id| nodes.contains_key(*id));
}

fn advance_engine(engine: &SharedEngine, now: f64) {
    {
        let mut e = engine.borrow_mut();
        if e.in_pass {
            tracing::warn!("advance called re-entrantly; ignoring");
            return;
        }
        e.in_pass = true;
        e.last_time = now;
    }

    // Snapshot: roots created or removed during the pass are handled after
    let roots: Vec<NodeId> = engine.borrow().roots.clone();
    for id in roots {
        update_node(engine, id, now, false);
    }

    let mut e = engine.borrow_mut();
    e.in_pass = false;
    let pending = std::mem::take(&mut e.pending_roots);
    {
        let Engine { roots, nodes, .. } = &mut *e;
        merge_and_prune(roots, pending, nodes);
    }
    // The default timeline is always processed first
    if let Some(default_id) = e.default_timeline {
        if let Some(index) = e.roots.iter().position(|r| *r == default_id) {
            if index != 0 {
                let id = e.roots.remove(index);
                e.roots.insert(0, id);
            }
        }
    }
}

fn update_node(engine: &SharedEngine, id: NodeId, parent_clock: f64, force: bool) -> NodeOutcome {
    enum Kind {
        Tween,
        Timeline,
    }
    let kind = match engine.borrow().nodes.get(id) {
        Some(Node::Tween(_)) => Kind::Tween,
        Some(Node::Timeline(_)) => Kind::Timeline,
        None => return NodeOutcome::Gone,
    };
    match kind {
        Kind::Tween => update_tween(engine, id, parent_clock, force),
        Kind::Timeline => update_timeline(engine, id, parent_clock, force),
    }
}

fn update_tween(engine: &SharedEngine, id: NodeId, parent_clock: f64, force: bool) -> NodeOutcome {
    // Resolve predicted start values first if this update will capture
    let predicted = {
        let e = engine.borrow();
        match e.nodes.get(id) {
            Some(Node::Tween(t)) => {
                if t.would_capture(parent_clock, force) {
                    t.parent.and_then(|p| predicted_start_values(&e, p, id))
                } else {
                    None
                }
            }
            _ => return NodeOutcome::Gone,
        }
    };

    let tick = {
        let mut e = engine.borrow_mut();
        match e.nodes.get_mut(id) {
            Some(Node::Tween(t)) => t.advance(parent_clock, force, predicted.as_ref()),
            _ => return NodeOutcome::Gone,
        }
    };

    let completed = tick.completed;
    let force_remove = tick.force_remove;
    for event in tick.events {
        fire(engine, id, event);
    }

    if force_remove {
        // Dead target: silent removal, even from nested timelines
        let mut e = engine.borrow_mut();
        remove_subtree(&mut e, id);
        return NodeOutcome::ForceRemoved;
    }
    if completed {
        NodeOutcome::TweenCompleted
    } else {
        NodeOutcome::Running
    }
}

fn update_timeline(
    engine: &SharedEngine,
    id: NodeId,
    parent_clock: f64,
    force: bool,
) -> NodeOutcome {
    struct Pass {
        child_clock: f64,
        snapshot: SmallVec<[NodeId; 8]>,
        is_default: bool,
        events: SmallVec<[PlaybackEvent; 4]>,
    }

    let pass = {
        let mut e = engine.borrow_mut();
        let Some(Node::Timeline(tl)) = e.nodes.get_mut(id) else {
            return NodeOutcome::Gone;
        };
        tl.clock.observe(parent_clock);
        if !tl.is_default && tl.clock.is_paused() && !force {
            return NodeOutcome::Running;
        }

        let new_position = tl.clock.position(parent_clock);
        let old_position = tl.position;
        tl.position = new_position;

        let mut events: SmallVec<[PlaybackEvent; 4]> = SmallVec::new();
        if !tl.is_default {
            if !tl.has_started && new_position >= 0.0 {
                tl.has_started = true;
                events.push(PlaybackEvent::new(EventKind::Start, new_position));
            }
            let inclusive = tl.marker_inclusive;
            tl.marker_inclusive = false;
            for marker in tl.markers.crossed(old_position, new_position, inclusive) {
                events.push(
                    PlaybackEvent::new(EventKind::MarkerPass, new_position).with_marker(
                        MarkerEvent {
                            name: marker.name.clone(),
                            time: marker.time,
                            payload: marker.payload.clone(),
                        },
                    ),
                );
            }
        }

        tl.updating = true;
        Pass {
            child_clock: new_position,
            snapshot: tl.children.iter().copied().collect(),
            is_default: tl.is_default,
            events,
        }
    };

    for event in pass.events {
        fire(engine, id, event);
    }

    for child in &pass.snapshot {
        let outcome = update_node(engine, *child, pass.child_clock, force);
        // Completed tweens are destroyed only on the default timeline; a
        // finished nested tween may still need to be found or queried.
        if pass.is_default && matches!(outcome, NodeOutcome::TweenCompleted) {
            let mut e = engine.borrow_mut();
            remove_subtree(&mut e, *child);
        }
    }

    // Merge children added mid-pass, prune removed ones, detect completion
    let completion = {
        let mut e = engine.borrow_mut();
        let (mut children, pending) = match e.nodes.get_mut(id) {
            Some(Node::Timeline(tl)) => {
                tl.updating = false;
                (
                    std::mem::take(&mut tl.children),
                    std::mem::take(&mut tl.pending_children),
                )
            }
            _ => return NodeOutcome::Gone,
        };
        merge_and_prune(&mut children, pending, &e.nodes);
        match e.nodes.get_mut(id) {
            Some(Node::Timeline(tl)) => {
                tl.children = children;
                if !tl.is_default && !tl.has_completed && tl.has_started {
                    match tl.duration {
                        Some(duration) if tl.position >= duration => {
                            tl.has_completed = true;
                            Some((
                                PlaybackEvent::new(EventKind::Complete, tl.position),
                                tl.auto_cancel,
                            ))
                        }
                        _ => None,
                    }
                } else {
                    None
                }
            }
            _ => return NodeOutcome::Gone,
        }
    };

    if let Some((event, auto_cancel)) = completion {
        fire(engine, id, event);
        if auto_cancel {
            cancel_node(engine, id);
        }
    }
    NodeOutcome::Running
}

// ============================================================================
// Control operations
// ============================================================================

fn pause_node(engine: &SharedEngine, id: NodeId) {
    enum Act {
        ForwardToChildren(Vec<NodeId>),
        Fire(PlaybackEvent),
        Nothing,
    }
    let act = {
        let mut e = engine.borrow_mut();
        match e.nodes.get_mut(id) {
            // The default timeline is never paused as a unit
            Some(Node::Timeline(tl)) if tl.is_default => {
                Act::ForwardToChildren(tl.children.clone())
            }
            Some(Node::Timeline(tl)) => {
                if tl.clock.pause() {
                    Act::Fire(PlaybackEvent::new(EventKind::Pause, tl.position))
                } else {
                    Act::Nothing
                }
            }
            Some(Node::Tween(t)) => {
                if t.clock.pause() {
                    Act::Fire(
                        PlaybackEvent::new(EventKind::Pause, t.clock.current_position())
                            .with_target(t.target.clone()),
                    )
                } else {
                    Act::Nothing
                }
            }
            None => Act::Nothing,
        }
    };
    match act {
        Act::ForwardToChildren(children) => {
            for child in children {
                pause_node(engine, child);
            }
        }
        Act::Fire(event) => fire(engine, id, event),
        Act::Nothing => {}
    }
}

fn resume_node(engine: &SharedEngine, id: NodeId) {
    enum Act {
        ForwardToChildren(Vec<NodeId>),
        Fire(PlaybackEvent),
        Nothing,
    }
    let act = {
        let mut e = engine.borrow_mut();
        match e.nodes.get_mut(id) {
            Some(Node::Timeline(tl)) if tl.is_default => {
                Act::ForwardToChildren(tl.children.clone())
            }
            Some(Node::Timeline(tl)) => {
                if tl.clock.resume() {
                    Act::Fire(PlaybackEvent::new(EventKind::Resume, tl.position))
                } else {
                    Act::Nothing
                }
            }
            Some(Node::Tween(t)) => {
                if t.clock.resume() {
                    Act::Fire(
                        PlaybackEvent::new(EventKind::Resume, t.clock.current_position())
                            .with_target(t.target.clone()),
                    )
                } else {
                    Act::Nothing
                }
            }
            None => Act::Nothing,
        }
    };
    match act {
        Act::ForwardToChildren(children) => {
            for child in children {
                resume_node(engine, child);
            }
        }
        Act::Fire(event) => fire(engine, id, event),
        Act::Nothing => {}
    }
}

fn set_speed_node(engine: &SharedEngine, id: NodeId, scale: f64) {
    enum Act {
        ForwardToChildren(Vec<NodeId>),
        Rescan(Option<NodeId>),
        Nothing,
    }
    let act = {
        let mut e = engine.borrow_mut();
        match e.nodes.get_mut(id) {
            Some(Node::Timeline(tl)) if tl.is_default => {
                Act::ForwardToChildren(tl.children.clone())
            }
            Some(Node::Timeline(tl)) => {
                tl.clock.set_speed_scale(scale);
                Act::Rescan(tl.parent)
            }
            Some(Node::Tween(t)) => {
                t.clock.set_speed_scale(scale);
                Act::Rescan(t.parent)
            }
            None => Act::Nothing,
        }
    };
    match act {
        Act::ForwardToChildren(children) => {
            for child in children {
                set_speed_node(engine, child, scale);
            }
        }
        Act::Rescan(parent) => {
            // A speed change rescales this node's extent in its parent
            let mut e = engine.borrow_mut();
            rescan_durations_upward(&mut e, parent);
        }
        Act::Nothing => {}
    }
}

/// Whether direct control of this node is legal: timelines always, tweens
/// only when hosted by the default timeline. Warned no-op otherwise.
fn direct_control_allowed(engine: &SharedEngine, id: NodeId) -> bool {
    let e = engine.borrow();
    match e.nodes.get(id) {
        Some(Node::Tween(t)) => {
            let nested = t
                .parent
                .is_some_and(|p| Some(p) != e.default_timeline);
            if nested {
                tracing::warn!(
                    "ignoring direct control of a tween nested in a timeline; control its timeline instead"
                );
            }
            !nested
        }
        _ => true,
    }
}

// ============================================================================
// Seeking
// ============================================================================

fn seek_tween_direct(engine: &SharedEngine, id: NodeId, position: f64) {
    let parent_clock = {
        let mut e = engine.borrow_mut();
        let Some(Node::Tween(t)) = e.nodes.get_mut(id) else {
            return;
        };
        t.seek(position);
        t.clock.last_parent()
    };
    let event = {
        let e = engine.borrow();
        match e.nodes.get(id) {
            Some(Node::Tween(t)) => PlaybackEvent::new(EventKind::PositionChange, position)
                .with_target(t.target.clone()),
            _ => return,
        }
    };
    fire(engine, id, event);
    update_node(engine, id, parent_clock, true);
}

/// Children ordered farthest-from-`position` first, so nearer overlapping
/// writers win when they touch the same target property.
fn children_by_distance(e: &Engine, children: &[NodeId], position: f64) -> Vec<NodeId> {
    let mut with_distance: Vec<(f64, NodeId)> = children
        .iter()
        .filter_map(|&child| {
            e.nodes
                .get(child)
                .map(|node| ((position - node.start_in_parent()).abs(), child))
        })
        .collect();
    with_distance.sort_by(|a, b| b.0.total_cmp(&a.0));
    with_distance.into_iter().map(|(_, child)| child).collect()
}

fn seek_timeline(engine: &SharedEngine, id: NodeId, position: f64) {
    enum Mode {
        Default(Vec<NodeId>),
        Cascade(Vec<NodeId>),
    }
    let mode = {
        let mut e = engine.borrow_mut();
        let Some(Node::Timeline(tl)) = e.nodes.get_mut(id) else {
            return;
        };
        if tl.is_default {
            // The default timeline has no position of its own; delegate
            Mode::Default(tl.children.clone())
        } else {
            tl.clock.seek(position);
            tl.position = position;
            tl.marker_inclusive = true;
            tl.resync_flags(position);
            let children = tl.children.clone();
            Mode::Cascade(children_by_distance(&e, &children, position))
        }
    };

    match mode {
        Mode::Default(children) => {
            for child in children {
                seek_tween_direct(engine, child, position);
            }
        }
        Mode::Cascade(children) => {
            fire(
                engine,
                id,
                PlaybackEvent::new(EventKind::PositionChange, position),
            );
            for child in children {
                cascade_parent_jump(engine, child, position);
            }
            maybe_complete_after_seek(engine, id);
        }
    }
}

/// Propagate a parent timeline's discontinuous jump into a child: re-pin its
/// clock, realign its flags, and apply the new position.
fn cascade_parent_jump(engine: &SharedEngine, id: NodeId, parent_position: f64) {
    enum Kind {
        Tween,
        Timeline(Vec<NodeId>, f64),
    }
    let kind = {
        let mut e = engine.borrow_mut();
        let repinned = match e.nodes.get_mut(id) {
            Some(Node::Tween(t)) => {
                t.clock.repin(parent_position);
                let local = t.clock.position(parent_position);
                t.resync_flags(local);
                None
            }
            Some(Node::Timeline(tl)) => {
                tl.clock.repin(parent_position);
                let local = tl.clock.position(parent_position);
                tl.position = local;
                tl.marker_inclusive = true;
                tl.resync_flags(local);
                Some((tl.children.clone(), local))
            }
            None => return,
        };
        match repinned {
            None => Kind::Tween,
            Some((children, local)) => {
                Kind::Timeline(children_by_distance(&e, &children, local), local)
            }
        }
    };
    match kind {
        Kind::Tween => {
            update_node(engine, id, parent_position, true);
        }
        Kind::Timeline(children, local) => {
            for child in children {
                cascade_parent_jump(engine, child, local);
            }
            maybe_complete_after_seek(engine, id);
        }
    }
}

fn maybe_complete_after_seek(engine: &SharedEngine, id: NodeId) {
    let completion = {
        let mut e = engine.borrow_mut();
        match e.nodes.get_mut(id) {
            Some(Node::Timeline(tl)) => {
                if !tl.is_default && !tl.has_completed && tl.has_started {
                    match tl.duration {
                        Some(duration) if tl.position >= duration => {
                            tl.has_completed = true;
                            Some((
                                PlaybackEvent::new(EventKind::Complete, tl.position),
                                tl.auto_cancel,
                            ))
                        }
                        _ => None,
                    }
                } else {
                    None
                }
            }
            _ => None,
        }
    };
    if let Some((event, auto_cancel)) = completion {
        fire(engine, id, event);
        if auto_cancel {
            cancel_node(engine, id);
        }
    }
}

fn set_position_node(engine: &SharedEngine, id: NodeId, position: &TimePosition) -> Result<()> {
    let resolved = {
        let e = engine.borrow();
        match (e.nodes.get(id), position) {
            (None, _) => return Err(AnimationError::Expired),
            (Some(_), TimePosition::Millis(ms)) => *ms,
            (Some(Node::Timeline(tl)), TimePosition::Marker(name)) => tl
                .markers
                .time_of(name)
                .ok_or_else(|| AnimationError::UnknownMarker(name.clone()))?,
            (Some(Node::Tween(_)), TimePosition::Marker(name)) => {
                return Err(AnimationError::UnknownMarker(name.clone()));
            }
        }
    };
    let is_tween = matches!(engine.borrow().nodes.get(id), Some(Node::Tween(_)));
    if is_tween {
        if direct_control_allowed(engine, id) {
            seek_tween_direct(engine, id, resolved);
        }
    } else {
        seek_timeline(engine, id, resolved);
    }
    Ok(())
}

// ============================================================================
// Selector resolution
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum ControlOp {
    Pause,
    Resume,
    Cancel,
    Speed,
    Position,
}

fn walk_tagged(e: &Engine, id: NodeId, tag: &str, out: &mut Vec<NodeId>) {
    let Some(node) = e.nodes.get(id) else { return };
    if node.tag() == Some(tag) {
        out.push(id);
    }
    if let Node::Timeline(tl) = node {
        for &child in &tl.children {
            walk_tagged(e, child, tag, out);
        }
    }
}

fn walk_targeting(e: &Engine, id: NodeId, key: TargetKey, out: &mut Vec<NodeId>) {
    let Some(node) = e.nodes.get(id) else { return };
    match node {
        Node::Tween(t) => {
            if t.target.key() == key {
                out.push(id);
            }
        }
        Node::Timeline(tl) => {
            for &child in &tl.children {
                walk_targeting(e, child, key, out);
            }
        }
    }
}

/// Resolve a selector to the node set a control operation applies to.
fn resolve_selector(e: &Engine, selector: &Selector, op: ControlOp) -> Vec<NodeId> {
    match selector {
        Selector::Everything => {
            let mut out = Vec::new();
            for &root in &e.roots {
                match e.nodes.get(root) {
                    // The default timeline is never a unit; forward to its
                    // children so it survives every "affect everything" call
                    Some(Node::Timeline(tl)) if tl.is_default => {
                        out.extend(tl.children.iter().copied());
                    }
                    Some(_) => out.push(root),
                    None => {}
                }
            }
            out
        }
        Selector::DefaultTimeline => match e.default_timeline.and_then(|d| e.nodes.get(d)) {
            Some(Node::Timeline(tl)) => tl.children.clone(),
            _ => Vec::new(),
        },
        Selector::Tag(tag) => {
            let mut out = Vec::new();
            for &root in &e.roots {
                walk_tagged(e, root, tag, &mut out);
            }
            out
        }
        Selector::Node(id) => vec![*id],
        Selector::Target(key) => {
            let mut out = Vec::new();
            if op == ControlOp::Cancel {
                // Cancel must guarantee no dangling reference anywhere
                for &root in &e.roots {
                    walk_targeting(e, root, *key, &mut out);
                }
            } else if let Some(Node::Timeline(tl)) =
                e.default_timeline.and_then(|d| e.nodes.get(d))
            {
                for &child in &tl.children {
                    if let Some(Node::Tween(t)) = e.nodes.get(child) {
                        if t.target.key() == *key {
                            out.push(child);
                        }
                    }
                }
            }
            out
        }
    }
}

fn apply_control(engine: &SharedEngine, selector: &Selector, op: ControlOp, value: Option<f64>) {
    let matches = resolve_selector(&engine.borrow(), selector, op);
    let check_direct = matches!(selector, Selector::Node(_));
    for id in matches {
        if check_direct && !direct_control_allowed(engine, id) {
            continue;
        }
        match op {
            ControlOp::Pause => pause_node(engine, id),
            ControlOp::Resume => resume_node(engine, id),
            ControlOp::Cancel => cancel_node(engine, id),
            ControlOp::Speed => {
                if let Some(scale) = value {
                    set_speed_node(engine, id, scale);
                }
            }
            ControlOp::Position => {
                if let Some(ms) = value {
                    if let Err(err) = set_position_node(engine, id, &TimePosition::Millis(ms)) {
                        tracing::warn!("set_position skipped a node: {err}");
                    }
                }
            }
        }
    }
}

fn set_position_selector(engine: &SharedEngine, selector: &Selector, position: &TimePosition) {
    match position {
        TimePosition::Millis(ms) => {
            apply_control(engine, selector, ControlOp::Position, Some(*ms));
        }
        TimePosition::Marker(_) => {
            // Marker names resolve per timeline; skip nodes that lack them
            let matches = resolve_selector(&engine.borrow(), selector, ControlOp::Position);
            for id in matches {
                if let Err(err) = set_position_node(engine, id, position) {
                    tracing::warn!("set_position skipped a node: {err}");
                }
            }
        }
    }
}

fn collect_animations(engine: &SharedEngine, selector: &Selector) -> Vec<AnimationRef> {
    let e = engine.borrow();
    let weak = Rc::downgrade(engine);
    let tween_ref = |id: NodeId| {
        AnimationRef::Tween(TweenHandle {
            id,
            engine: weak.clone(),
        })
    };
    let timeline_ref = |id: NodeId| {
        AnimationRef::Timeline(TimelineHandle {
            id,
            engine: weak.clone(),
        })
    };

    let default_children: Vec<NodeId> = match e.default_timeline.and_then(|d| e.nodes.get(d)) {
        Some(Node::Timeline(tl)) => tl.children.clone(),
        _ => Vec::new(),
    };
    let custom_roots: Vec<NodeId> = e
        .roots
        .iter()
        .copied()
        .filter(|r| Some(*r) != e.default_timeline)
        .collect();

    let mut out = Vec::new();
    match selector {
        Selector::Everything => {
            out.extend(default_children.iter().map(|&id| tween_ref(id)));
            out.extend(custom_roots.iter().map(|&id| timeline_ref(id)));
        }
        Selector::DefaultTimeline => {
            out.extend(default_children.iter().map(|&id| tween_ref(id)));
        }
        Selector::Tag(tag) => {
            for &id in &default_children {
                if e.nodes.get(id).is_some_and(|n| n.tag() == Some(tag)) {
                    out.push(tween_ref(id));
                }
            }
            // A nested timeline matches as a unit if any descendant matches
            for &root in &custom_roots {
                let mut matched = Vec::new();
                walk_tagged(&e, root, tag, &mut matched);
                if !matched.is_empty() {
                    out.push(timeline_ref(root));
                }
            }
        }
        Selector::Target(key) => {
            for &id in &default_children {
                if let Some(Node::Tween(t)) = e.nodes.get(id) {
                    if t.target.key() == *key {
                        out.push(tween_ref(id));
                    }
                }
            }
            for &root in &custom_roots {
                let mut matched = Vec::new();
                walk_targeting(&e, root, *key, &mut matched);
                if !matched.is_empty() {
                    out.push(timeline_ref(root));
                }
            }
        }
        Selector::Node(id) => match e.nodes.get(*id) {
            Some(Node::Tween(_)) => out.push(tween_ref(*id)),
            Some(Node::Timeline(_)) => out.push(timeline_ref(*id)),
            None => {}
        },
    }
    out
}

// ============================================================================
// Public surface
// ============================================================================

/// The animation scheduler: owns the tree of live tweens and timelines and
/// drives it once per host tick.
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::new();
/// let target = TargetRef::new(PropertyBag::new().with("x", 0.0));
///
/// scheduler.to(&target, &[("x", 100.0)], TweenConfig::new().time(1000.0))?;
///
/// // Host tick loop
/// scheduler.advance(16.7);
/// scheduler.advance(33.3);
/// ```
pub struct Scheduler {
    inner: SharedEngine,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Engine::new())),
        }
    }

    /// Get a weak handle for passing to callbacks and host components.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Install the host's tick-registration hook. It is invoked exactly once
    /// for the lifetime of the scheduler, when the first timeline is
    /// created, so the host can attach its per-frame listener.
    pub fn set_wake_callback<F>(&self, callback: F)
    where
        F: FnMut() + 'static,
    {
        let mut callback: Box<dyn FnMut()> = Box::new(callback);
        let registered = self.inner.borrow().tick_registered;
        if registered {
            // The first timeline already exists; the registration moment has
            // passed, so invoke the hook right away.
            callback();
        }
        self.inner.borrow_mut().wake_callback = Some(callback);
    }

    /// Drive every live timeline once. `now_ms` must be monotonically
    /// non-decreasing across calls.
    pub fn advance(&self, now_ms: f64) {
        advance_engine(&self.inner, now_ms);
    }

    /// Tween `target`'s properties to the supplied values.
    pub fn to(
        &self,
        target: &TargetRef,
        properties: &[(&str, f64)],
        config: TweenConfig,
    ) -> Result<TweenHandle> {
        create_tween(&self.inner, target, properties, config, false)
    }

    /// Tween `target`'s properties from the supplied values back to their
    /// current ones.
    pub fn from(
        &self,
        target: &TargetRef,
        properties: &[(&str, f64)],
        config: TweenConfig,
    ) -> Result<TweenHandle> {
        create_tween(&self.inner, target, properties, config, true)
    }

    /// Create an independent top-level timeline.
    pub fn new_timeline(&self, config: TimelineConfig) -> Result<TimelineHandle> {
        create_timeline(&self.inner, config)
    }

    pub fn pause(&self, selector: &Selector) {
        apply_control(&self.inner, selector, ControlOp::Pause, None);
    }

    pub fn resume(&self, selector: &Selector) {
        apply_control(&self.inner, selector, ControlOp::Resume, None);
    }

    pub fn cancel(&self, selector: &Selector) {
        apply_control(&self.inner, selector, ControlOp::Cancel, None);
    }

    pub fn set_speed_scale(&self, selector: &Selector, scale: f64) {
        if !(scale.is_finite() && scale > 0.0) {
            tracing::warn!("ignoring invalid speed scale {scale}");
            return;
        }
        apply_control(&self.inner, selector, ControlOp::Speed, Some(scale));
    }

    pub fn set_position(&self, selector: &Selector, position: impl Into<TimePosition>) {
        set_position_selector(&self.inner, selector, &position.into());
    }

    /// Matching tweens inside the default timeline, plus whole matching
    /// timelines (a timeline matches as a unit if any descendant matches).
    pub fn get_animations(&self, selector: &Selector) -> Vec<AnimationRef> {
        collect_animations(&self.inner, selector)
    }

    pub fn tween_count(&self) -> usize {
        self.inner
            .borrow()
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n, Node::Tween(_)))
            .count()
    }

    /// Number of timelines, excluding the implicit default one.
    pub fn timeline_count(&self) -> usize {
        let e = self.inner.borrow();
        e.nodes
            .iter()
            .filter(|(id, n)| matches!(n, Node::Timeline(_)) && Some(*id) != e.default_timeline)
            .count()
    }

    /// Whether anything could still be moving.
    pub fn has_active_animations(&self) -> bool {
        let e = self.inner.borrow();
        e.nodes.iter().any(|(_, node)| match node {
            Node::Tween(t) => !t.has_completed && !t.clock.is_paused(),
            Node::Timeline(tl) => {
                !tl.is_default && !tl.has_completed && !tl.clock.is_paused()
            }
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak handle to the scheduler.
///
/// Held by callbacks and host components; never keeps the engine alive.
/// Every operation on a dead handle is a safe no-op (creation returns
/// `Err(SchedulerGone)`).
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: WeakEngine,
}

impl SchedulerHandle {
    fn upgrade(&self) -> Option<SharedEngine> {
        self.inner.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn advance(&self, now_ms: f64) {
        if let Some(engine) = self.upgrade() {
            advance_engine(&engine, now_ms);
        }
    }

    pub fn to(
        &self,
        target: &TargetRef,
        properties: &[(&str, f64)],
        config: TweenConfig,
    ) -> Result<TweenHandle> {
        let engine = self.upgrade().ok_or(AnimationError::SchedulerGone)?;
        create_tween(&engine, target, properties, config, false)
    }

    pub fn from(
        &self,
        target: &TargetRef,
        properties: &[(&str, f64)],
        config: TweenConfig,
    ) -> Result<TweenHandle> {
        let engine = self.upgrade().ok_or(AnimationError::SchedulerGone)?;
        create_tween(&engine, target, properties, config, true)
    }

    pub fn new_timeline(&self, config: TimelineConfig) -> Result<TimelineHandle> {
        let engine = self.upgrade().ok_or(AnimationError::SchedulerGone)?;
        create_timeline(&engine, config)
    }

    pub fn pause(&self, selector: &Selector) {
        if let Some(engine) = self.upgrade() {
            apply_control(&engine, selector, ControlOp::Pause, None);
        }
    }

    pub fn resume(&self, selector: &Selector) {
        if let Some(engine) = self.upgrade() {
            apply_control(&engine, selector, ControlOp::Resume, None);
        }
    }

    pub fn cancel(&self, selector: &Selector) {
        if let Some(engine) = self.upgrade() {
            apply_control(&engine, selector, ControlOp::Cancel, None);
        }
    }

    pub fn set_speed_scale(&self, selector: &Selector, scale: f64) {
        if !(scale.is_finite() && scale > 0.0) {
            tracing::warn!("ignoring invalid speed scale {scale}");
            return;
        }
        if let Some(engine) = self.upgrade() {
            apply_control(&engine, selector, ControlOp::Speed, Some(scale));
        }
    }

    pub fn set_position(&self, selector: &Selector, position: impl Into<TimePosition>) {
        if let Some(engine) = self.upgrade() {
            set_position_selector(&engine, selector, &position.into());
        }
    }

    pub fn get_animations(&self, selector: &Selector) -> Vec<AnimationRef> {
        match self.upgrade() {
            Some(engine) => collect_animations(&engine, selector),
            None => Vec::new(),
        }
    }
}

// ============================================================================
// Per-node handles
// ============================================================================

/// Control surface for one tween.
///
/// Direct control is only legal while the tween is hosted by the default
/// timeline; for tweens nested in a timeline, control the timeline instead
/// (calls become warned no-ops). A handle whose tween has been destroyed is
/// safely inert.
#[derive(Clone)]
pub struct TweenHandle {
    id: NodeId,
    engine: WeakEngine,
}

impl TweenHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|e| e.borrow().nodes.contains_key(self.id))
    }

    fn with_tween<R>(&self, f: impl FnOnce(&Tween) -> R) -> Option<R> {
        let engine = self.engine.upgrade()?;
        let e = engine.borrow();
        match e.nodes.get(self.id) {
            Some(Node::Tween(t)) => Some(f(t)),
            _ => None,
        }
    }

    pub fn pause(&self) {
        if let Some(engine) = self.engine.upgrade() {
            if direct_control_allowed(&engine, self.id) {
                pause_node(&engine, self.id);
            }
        }
    }

    pub fn resume(&self) {
        if let Some(engine) = self.engine.upgrade() {
            if direct_control_allowed(&engine, self.id) {
                resume_node(&engine, self.id);
            }
        }
    }

    pub fn cancel(&self) {
        if let Some(engine) = self.engine.upgrade() {
            if direct_control_allowed(&engine, self.id) {
                cancel_node(&engine, self.id);
            }
        }
    }

    pub fn set_position(&self, position_ms: f64) {
        if let Some(engine) = self.engine.upgrade() {
            if direct_control_allowed(&engine, self.id) {
                seek_tween_direct(&engine, self.id, position_ms);
            }
        }
    }

    pub fn set_speed_scale(&self, scale: f64) {
        if !(scale.is_finite() && scale > 0.0) {
            tracing::warn!("ignoring invalid speed scale {scale}");
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            if direct_control_allowed(&engine, self.id) {
                set_speed_node(&engine, self.id, scale);
            }
        }
    }

    pub fn get_position(&self) -> Option<f64> {
        self.with_tween(|t| t.clock.current_position())
    }

    pub fn get_speed_scale(&self) -> Option<f64> {
        self.with_tween(|t| t.clock.speed_scale())
    }

    pub fn is_paused(&self) -> bool {
        self.with_tween(|t| t.clock.is_paused()).unwrap_or(false)
    }

    /// Duration of one iteration in milliseconds.
    pub fn get_duration(&self) -> Option<f64> {
        self.with_tween(|t| t.duration_ms)
    }

    /// Duration across all iterations; `None` when the handle is dead or
    /// the tween repeats forever.
    pub fn get_total_duration(&self) -> Option<f64> {
        self.with_tween(|t| t.total_duration()).flatten()
    }

    pub fn tag(&self) -> Option<String> {
        self.with_tween(|t| t.tag.clone()).flatten()
    }
}

/// Control surface for one timeline.
#[derive(Clone)]
pub struct TimelineHandle {
    id: NodeId,
    engine: WeakEngine,
}

impl TimelineHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|e| e.borrow().nodes.contains_key(self.id))
    }

    fn with_timeline<R>(&self, f: impl FnOnce(&Timeline) -> R) -> Option<R> {
        let engine = self.engine.upgrade()?;
        let e = engine.borrow();
        match e.nodes.get(self.id) {
            Some(Node::Timeline(tl)) => Some(f(tl)),
            _ => None,
        }
    }

    pub fn pause(&self) {
        if let Some(engine) = self.engine.upgrade() {
            pause_node(&engine, self.id);
        }
    }

    pub fn resume(&self) {
        if let Some(engine) = self.engine.upgrade() {
            resume_node(&engine, self.id);
        }
    }

    pub fn cancel(&self) {
        if let Some(engine) = self.engine.upgrade() {
            cancel_node(&engine, self.id);
        }
    }

    /// Seek to an absolute position or a marker name.
    pub fn set_position(&self, position: impl Into<TimePosition>) -> Result<()> {
        let engine = self.engine.upgrade().ok_or(AnimationError::SchedulerGone)?;
        set_position_node(&engine, self.id, &position.into())
    }

    pub fn get_position(&self) -> Option<f64> {
        self.with_timeline(|tl| tl.position)
    }

    pub fn set_speed_scale(&self, scale: f64) {
        if !(scale.is_finite() && scale > 0.0) {
            tracing::warn!("ignoring invalid speed scale {scale}");
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            set_speed_node(&engine, self.id, scale);
        }
    }

    pub fn get_speed_scale(&self) -> Option<f64> {
        self.with_timeline(|tl| tl.clock.speed_scale())
    }

    pub fn is_paused(&self) -> bool {
        self.with_timeline(|tl| tl.clock.is_paused()).unwrap_or(false)
    }

    /// Cached aggregate duration; `None` when unbounded (or the handle is
    /// dead).
    pub fn get_duration(&self) -> Option<f64> {
        self.with_timeline(|tl| tl.duration).flatten()
    }

    /// Aggregate duration recomputed recursively from live children, never
    /// a cached child value. `None` when unbounded (or the handle is dead).
    pub fn get_total_duration(&self) -> Option<f64> {
        let engine = self.engine.upgrade()?;
        let e = engine.borrow();
        computed_duration(&e, self.id)
    }

    /// Add a marker. Duplicate names fail and leave the existing marker
    /// unchanged.
    pub fn add_marker(&self, name: &str, time_ms: f64) -> Result<()> {
        self.add_marker_inner(name, time_ms, None)
    }

    pub fn add_marker_with_payload(
        &self,
        name: &str,
        time_ms: f64,
        payload: MarkerPayload,
    ) -> Result<()> {
        self.add_marker_inner(name, time_ms, Some(payload))
    }

    fn add_marker_inner(
        &self,
        name: &str,
        time_ms: f64,
        payload: Option<MarkerPayload>,
    ) -> Result<()> {
        if !(time_ms.is_finite() && time_ms >= 0.0) {
            return Err(AnimationError::InvalidTime {
                what: "marker time",
                value: time_ms,
            });
        }
        let engine = self.engine.upgrade().ok_or(AnimationError::SchedulerGone)?;
        {
            let mut e = engine.borrow_mut();
            match e.nodes.get_mut(self.id) {
                Some(Node::Timeline(tl)) => {
                    tl.markers.add(name, time_ms, payload)?;
                    // A new marker can only extend the duration
                    if let Some(duration) = tl.duration {
                        if time_ms > duration {
                            tl.duration = Some(time_ms);
                        }
                    }
                }
                _ => return Err(AnimationError::Expired),
            }
            raise_duration_chain(&mut e, self.id);
        }
        Ok(())
    }

    pub fn delete_marker(&self, name: &str) -> Result<()> {
        let engine = self.engine.upgrade().ok_or(AnimationError::SchedulerGone)?;
        let mut e = engine.borrow_mut();
        match e.nodes.get_mut(self.id) {
            Some(Node::Timeline(tl)) => {
                tl.markers.remove(name)?;
            }
            _ => return Err(AnimationError::Expired),
        }
        // Removal can only shrink; full rescan
        rescan_durations_upward(&mut e, Some(self.id));
        Ok(())
    }

    pub fn get_markers(&self) -> Vec<Marker> {
        self.with_timeline(|tl| tl.markers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tag(&self) -> Option<String> {
        self.with_timeline(|tl| tl.tag.clone()).flatten()
    }
}

impl From<&TweenHandle> for Selector {
    fn from(handle: &TweenHandle) -> Self {
        Selector::Node(handle.id)
    }
}

impl From<&TimelineHandle> for Selector {
    fn from(handle: &TimelineHandle) -> Self {
        Selector::Node(handle.id)
    }
}
