//! Observable cells and the write pipeline shared with computed nodes.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::context::{ignore_dependencies, record_dependency};
use crate::error::{Error, Result};
use crate::storage::{notify_subscribers, with_node_storage, Node, NodeId, NodeKind};
use crate::subscribable::{Subscribable, Subscription, BEFORE_CHANGE, CHANGE};

/// When a write notifies subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyMode {
    /// Only when the comparer reports the new value as different.
    #[default]
    Default,
    /// On every write, even of an equal value.
    Always,
}

/// Equality test deciding whether a write counts as a change.
pub type Comparer<T> = Rc<dyn Fn(&T, &T) -> bool>;

pub(crate) fn default_comparer<T: PartialEq + 'static>() -> Comparer<T> {
    Rc::new(|new: &T, old: &T| new == old)
}

/// Comparer that treats every write as a change.
///
/// Use it for composite values whose identity changes on every write even when
/// their contents compare equal.
pub fn never_equal<T: 'static>() -> Comparer<T> {
    Rc::new(|_: &T, _: &T| false)
}

/// Context handed to evaluator and write callbacks.
///
/// Defaults to the empty owner.
#[derive(Clone, Default)]
pub struct Owner(Option<Rc<dyn Any>>);

impl Owner {
    pub fn new<O: 'static>(owner: O) -> Self {
        Self(Some(Rc::new(owner)))
    }

    pub fn from_rc<O: 'static>(owner: Rc<O>) -> Self {
        Self(Some(owner))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<O: 'static>(&self) -> Option<&O> {
        self.0.as_deref().and_then(|owner| owner.downcast_ref())
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owner")
            .field(&if self.is_none() { "none" } else { "some" })
            .finish()
    }
}

pub(crate) type ReadFn<T> = Rc<dyn Fn(&Owner) -> Result<T>>;
pub(crate) type WriteFn<T> = Rc<dyn Fn(&Owner, T) -> Result<()>>;
pub(crate) type DisposeWhen = Rc<dyn Fn() -> bool>;

/// Typed behavior stored alongside a node.
pub(crate) struct Hooks<T> {
    pub comparer: Comparer<T>,
    pub owner: Owner,
    pub read: Option<ReadFn<T>>,
    pub write: Option<WriteFn<T>>,
    pub dispose_when: Option<DisposeWhen>,
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self {
            comparer: self.comparer.clone(),
            owner: self.owner.clone(),
            read: self.read.clone(),
            write: self.write.clone(),
            dispose_when: self.dispose_when.clone(),
        }
    }
}

/// Options merged onto a live node by `extend`.
pub struct Extension<T> {
    notify: Option<NotifyMode>,
    comparer: Option<Comparer<T>>,
    dispose_when: Option<DisposeWhen>,
}

impl<T> Default for Extension<T> {
    fn default() -> Self {
        Self {
            notify: None,
            comparer: None,
            dispose_when: None,
        }
    }
}

impl<T: 'static> Extension<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(mut self, mode: NotifyMode) -> Self {
        self.notify = Some(mode);
        self
    }

    pub fn comparer(mut self, comparer: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.comparer = Some(Rc::new(comparer));
        self
    }

    /// Only meaningful for computed nodes; checked before every evaluation.
    pub fn dispose_when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
        self.dispose_when = Some(Rc::new(predicate));
        self
    }
}

pub(crate) fn extend_node<T: 'static>(id: NodeId, extension: Extension<T>) -> Result<()> {
    with_node_storage(|storage| {
        let mut hooks = Hooks::clone(&*storage.hooks::<Hooks<T>>(id)?);
        if let Some(comparer) = extension.comparer {
            hooks.comparer = comparer;
        }
        if let Some(dispose_when) = extension.dispose_when {
            hooks.dispose_when = Some(dispose_when);
        }

        let node = storage.node_mut(id)?;
        if let Some(notify) = extension.notify {
            node.notify = notify;
        }
        node.hooks = Some(Rc::new(hooks));
        Ok(())
    })
}

/// Where a write into the set path comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOrigin {
    /// A caller writing through the accessor; needs write capability.
    External,
    /// A computed storing the result of its own evaluation.
    Evaluation,
}

pub(crate) fn current_value<T: Clone + 'static>(id: NodeId) -> Result<Option<T>> {
    with_node_storage(|storage| Ok(storage.value::<T>(id)?.cloned()))
}

pub(crate) fn read_value<T: Clone + 'static>(id: NodeId) -> Result<T> {
    current_value(id)?.ok_or(Error::NoValue)
}

/// Notify `change` subscribers with the current value, reads untracked.
pub(crate) fn value_has_mutated<T: Clone + 'static>(id: NodeId) -> Result<()> {
    match current_value::<T>(id)? {
        Some(value) => ignore_dependencies(|| notify_subscribers(id, &value, CHANGE)),
        None => Ok(()),
    }
}

/// Notify `beforeChange` subscribers with the current value, reads untracked.
pub(crate) fn value_will_mutate<T: Clone + 'static>(id: NodeId) -> Result<()> {
    match current_value::<T>(id)? {
        Some(value) => ignore_dependencies(|| notify_subscribers(id, &value, BEFORE_CHANGE)),
        None => Ok(()),
    }
}

/// The set path: compare, announce, assign, write through, announce.
///
/// `change` fires even if the `beforeChange` pass or the write callback fails;
/// the first failure is returned.
pub(crate) fn write_value<T: Clone + 'static>(
    id: NodeId,
    value: T,
    origin: WriteOrigin,
) -> Result<()> {
    let (hooks, notify, writable, current) = with_node_storage(|storage| {
        let node = storage.node(id)?;
        let (notify, writable) = (node.notify, node.writable);
        let hooks = storage.hooks::<Hooks<T>>(id)?;
        let current = storage.value::<T>(id)?.cloned();
        Ok::<_, Error>((hooks, notify, writable, current))
    })?;

    if origin == WriteOrigin::External && !writable {
        return Err(Error::NotWritable);
    }

    let changed = notify == NotifyMode::Always
        || current
            .as_ref()
            .map_or(true, |old| !(hooks.comparer)(&value, old));
    trace!(node = ?id, ?origin, changed, "write");
    if !changed {
        return Ok(());
    }

    let applied = apply_write(id, &hooks, current.is_some(), value, origin);
    let notified = value_has_mutated::<T>(id);
    match (applied, notified) {
        (Err(error), Err(dropped)) => {
            warn!(node = ?id, error = %dropped, "change notification failed after a failed write");
            Err(error)
        }
        (Err(error), Ok(())) => Err(error),
        (Ok(()), notified) => notified,
    }
}

fn apply_write<T: Clone + 'static>(
    id: NodeId,
    hooks: &Hooks<T>,
    had_value: bool,
    value: T,
    origin: WriteOrigin,
) -> Result<()> {
    if had_value {
        value_will_mutate::<T>(id)?;
    }

    let write = match (origin, &hooks.write) {
        (WriteOrigin::External, Some(write)) => Some((write.clone(), value.clone())),
        _ => None,
    };
    with_node_storage(|storage| storage.replace_value(id, value))?;

    match write {
        Some((write, value)) => write(&hooks.owner, value),
        None => Ok(()),
    }
}

/// Read and write access shared by observables and computeds.
pub trait Reactive<T> {
    /// Read the value, recording a dependency of the running evaluation.
    fn get(&self) -> Result<T>;

    /// Read the value without recording a dependency.
    fn peek(&self) -> Result<T>;

    fn set(&self, value: T) -> Result<()>;

    /// Call-style access: `None` reads, `Some(value)` writes.
    fn invoke(&self, value: Option<T>) -> Result<Option<T>> {
        match value {
            None => self.get().map(Some),
            Some(value) => self.set(value).map(|()| None),
        }
    }
}

/// A mutable reactive cell holding a value of type `T`.
///
/// Observables are Copy-able handles. Reading one inside a computed evaluator
/// makes the computed depend on it; writing a different value notifies
/// `beforeChange` subscribers with the old value and `change` subscribers with
/// the new one.
///
/// # Examples
///
/// ```rust,no_run
/// use tracked_signals::prelude::*;
///
/// let count = observable(1);
/// count.subscribe(|value| println!("count is now {value}"))?;
/// count.set(2)?;
/// assert_eq!(count.get()?, 2);
/// # Ok::<(), tracked_signals::Error>(())
/// ```
pub struct Observable<T> {
    id: NodeId,
    _phantom: PhantomData<T>,
}

impl<T> Observable<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Copy for Observable<T> {}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Observable<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Observable<T> {}

impl<T> Hash for Observable<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Observable<bool> {
    /// Toggle the boolean value of the observable.
    pub fn toggle(&self) -> Result<()> {
        self.update(|value| !*value)
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable compared with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_comparer(value, default_comparer())
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Create an observable with a custom equality comparer.
    pub fn with_comparer(value: T, comparer: Comparer<T>) -> Self {
        let hooks = Hooks {
            comparer,
            owner: Owner::none(),
            read: None,
            write: None,
            dispose_when: None,
        };
        let mut node = Node::new(NodeKind::Observable);
        node.value = Some(Box::new(value));
        node.hooks = Some(Rc::new(hooks));
        node.writable = true;

        let id = with_node_storage(|storage| storage.insert(node));
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    /// Get the current value, tracking the read if called within an evaluation.
    pub fn get(&self) -> Result<T> {
        record_dependency(self.id);
        read_value(self.id)
    }

    /// Get the current value without tracking the read.
    pub fn peek(&self) -> Result<T> {
        read_value(self.id)
    }

    /// Set a new value, notifying subscribers if it differs from the current one.
    pub fn set(&self, value: T) -> Result<()> {
        write_value(self.id, value, WriteOrigin::External)
    }

    /// Replace the value with one derived from the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = f(&self.peek()?);
        self.set(next)
    }

    /// Announce an in-place mutation to `change` subscribers.
    pub fn value_has_mutated(&self) -> Result<()> {
        value_has_mutated::<T>(self.id)
    }

    /// Announce an upcoming in-place mutation to `beforeChange` subscribers.
    pub fn value_will_mutate(&self) -> Result<()> {
        value_will_mutate::<T>(self.id)
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Result<Subscription> {
        self.as_subscribable().subscribe(callback)
    }

    pub fn subscribe_event(
        &self,
        event: &str,
        callback: impl Fn(&T) + 'static,
    ) -> Result<Subscription> {
        self.as_subscribable().subscribe_event(event, callback)
    }

    pub fn try_subscribe(
        &self,
        event: &str,
        callback: impl Fn(&T) -> Result<()> + 'static,
    ) -> Result<Subscription> {
        self.as_subscribable().try_subscribe(event, callback)
    }

    pub fn notify_subscribers(&self, value: &T) -> Result<()> {
        self.as_subscribable().notify_subscribers(value)
    }

    pub fn notify_event(&self, value: &T, event: &str) -> Result<()> {
        self.as_subscribable().notify_event(value, event)
    }

    pub fn subscriptions_count(&self) -> Result<usize> {
        self.as_subscribable().subscriptions_count()
    }

    pub fn event_subscriptions_count(&self, event: &str) -> Result<usize> {
        self.as_subscribable().event_subscriptions_count(event)
    }

    /// Plain observables hold no dependency edges.
    pub fn dependencies_count(&self) -> usize {
        0
    }

    pub fn is_active(&self) -> bool {
        false
    }

    /// Merge notify mode or comparer onto this observable.
    pub fn extend(self, extension: Extension<T>) -> Result<Self> {
        extend_node(self.id, extension)?;
        Ok(self)
    }

    pub fn as_subscribable(&self) -> Subscribable<T> {
        Subscribable::from_id(self.id)
    }
}

impl<T: Clone + 'static> Reactive<T> for Observable<T> {
    fn get(&self) -> Result<T> {
        Observable::get(self)
    }

    fn peek(&self) -> Result<T> {
        Observable::peek(self)
    }

    fn set(&self, value: T) -> Result<()> {
        Observable::set(self, value)
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.id)
            .field("value", &self.peek().ok())
            .finish()
    }
}
