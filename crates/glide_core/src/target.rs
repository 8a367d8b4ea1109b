//! Animation targets
//!
//! A target is any externally owned object exposing named numeric properties.
//! The engine writes interpolated values through [`TweenTarget`] and uses
//! [`TargetKey`] pointer identity to route control operations ("cancel
//! everything animating this object") without borrowing the object itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

/// A mutable bag of named numeric properties the engine can animate.
///
/// Implementors decide how properties are stored; the engine only requires
/// read/write access by name. `get` returning `None` for a property that was
/// previously written is treated as the target having been destroyed
/// out-of-band (see [`TweenTarget::is_alive`]).
pub trait TweenTarget {
    /// Read a property value, or `None` if the target does not expose it.
    fn get(&self, property: &str) -> Option<f64>;

    /// Write a property value.
    fn set(&mut self, property: &str, value: f64);

    /// Liveness indicator for record-like targets.
    ///
    /// Defaults to `true`. Targets whose host-side lifetime can end while
    /// animations still reference them should override this; the engine
    /// force-removes tweens whose target reports dead.
    fn is_alive(&self) -> bool {
        true
    }
}

/// A map-backed [`TweenTarget`] with an explicit liveness switch.
///
/// Useful as-is for tests and for hosts whose animated state is already a
/// loose property map.
#[derive(Clone, Debug, Default)]
pub struct PropertyBag {
    values: FxHashMap<String, f64>,
    alive: bool,
}

impl PropertyBag {
    /// Create an empty, live property bag.
    pub fn new() -> Self {
        Self {
            values: FxHashMap::default(),
            alive: true,
        }
    }

    /// Builder: insert a property.
    pub fn with(mut self, property: impl Into<String>, value: f64) -> Self {
        self.values.insert(property.into(), value);
        self
    }

    /// Insert or overwrite a property.
    pub fn insert(&mut self, property: impl Into<String>, value: f64) {
        self.values.insert(property.into(), value);
    }

    /// Remove a property. Subsequent reads return `None`.
    pub fn remove(&mut self, property: &str) -> Option<f64> {
        self.values.remove(property)
    }

    /// Mark the bag destroyed. Animations referencing it will be removed on
    /// their next update.
    pub fn destroy(&mut self) {
        if self.alive {
            tracing::debug!("property bag destroyed with {} properties", self.values.len());
        }
        self.alive = false;
    }

    /// Number of stored properties.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bag holds no properties.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TweenTarget for PropertyBag {
    fn get(&self, property: &str) -> Option<f64> {
        self.values.get(property).copied()
    }

    fn set(&mut self, property: &str, value: f64) {
        self.values.insert(property.to_string(), value);
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

/// Stable identity of a shared target.
///
/// Two `TargetRef`s compare equal iff they point at the same allocation.
/// Used by selector routing and by per-(target, property) scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey(usize);

/// A shared handle to a [`TweenTarget`].
///
/// The engine holds clones of this handle but never owns the target's
/// host-side lifetime; liveness is re-checked on every update.
#[derive(Clone)]
pub struct TargetRef {
    inner: Rc<RefCell<dyn TweenTarget>>,
}

impl TargetRef {
    /// Wrap a target in a shared handle.
    pub fn new(target: impl TweenTarget + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(target)),
        }
    }

    /// Share an already-shared target, letting the host keep typed access to
    /// it (for example to flip a liveness switch mid-animation).
    pub fn from_shared<T: TweenTarget + 'static>(shared: Rc<RefCell<T>>) -> Self {
        let inner: Rc<RefCell<dyn TweenTarget>> = shared;
        Self { inner }
    }

    /// Identity key for this target's allocation.
    pub fn key(&self) -> TargetKey {
        TargetKey(Rc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Read a property.
    pub fn get(&self, property: &str) -> Option<f64> {
        self.inner.borrow().get(property)
    }

    /// Write a property.
    pub fn set(&self, property: &str, value: f64) {
        self.inner.borrow_mut().set(property, value);
    }

    /// Whether the underlying target still reports alive.
    pub fn is_alive(&self) -> bool {
        self.inner.borrow().is_alive()
    }

    /// Run a closure with mutable access to the underlying target.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut dyn TweenTarget) -> R) -> R {
        f(&mut *self.inner.borrow_mut())
    }
}

impl PartialEq for TargetRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TargetRef {}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TargetRef").field(&self.key()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_bag_roundtrip() {
        let mut bag = PropertyBag::new().with("x", 1.0);
        assert_eq!(bag.get("x"), Some(1.0));
        assert_eq!(bag.get("y"), None);

        bag.set("x", 5.0);
        assert_eq!(bag.get("x"), Some(5.0));
    }

    #[test]
    fn test_property_bag_liveness() {
        let mut bag = PropertyBag::new().with("x", 0.0);
        assert!(bag.is_alive());
        bag.destroy();
        assert!(!bag.is_alive());
    }

    #[test]
    fn test_target_ref_identity() {
        let a = TargetRef::new(PropertyBag::new());
        let b = TargetRef::new(PropertyBag::new());
        let a2 = a.clone();

        assert_eq!(a, a2);
        assert_eq!(a.key(), a2.key());
        assert_ne!(a, b);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_target_ref_shared_writes() {
        let target = TargetRef::new(PropertyBag::new().with("alpha", 1.0));
        let alias = target.clone();

        alias.set("alpha", 0.25);
        assert_eq!(target.get("alpha"), Some(0.25));
    }
}
