//! Generational arena storage for reactive nodes.
//!
//! Every subscribable, observable and computed lives in a thread-local slot map.
//! Handles only carry the generational key, so they can be `Copy` while the
//! storage keeps ownership of values, event buckets and dependency edges.
//!
//! Access always goes through short scoped borrows. Callbacks are cloned out of
//! the storage before they run, so user code can freely read, write, subscribe
//! and dispose while a notification pass is in flight.

use slotmap::{new_key_type, SlotMap};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::observable::NotifyMode;

new_key_type! {
    /// Unique identifier for a node in the storage.
    pub struct NodeId;
}

/// What a node was constructed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Subscribable,
    Observable,
    Computed,
}

/// Type-erased subscriber callback, receiving the notified value.
pub(crate) type Callback = Rc<dyn Fn(&dyn Any) -> Result<()>>;

/// One entry in an event bucket.
///
/// Disposal only flips the flag. The entry leaves its bucket during the next
/// notification pass over that bucket.
pub(crate) struct SubscriptionEntry {
    callback: Callback,
    disposed: Cell<bool>,
}

impl SubscriptionEntry {
    pub fn dispose(&self) {
        self.disposed.set(true);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub fn invoke(&self, value: &dyn Any) -> Result<()> {
        (self.callback)(value)
    }
}

/// Bookkeeping carried only by computed nodes.
#[derive(Default)]
pub(crate) struct ComputedState {
    /// Subscriptions held against the sources read by the last completed evaluation.
    pub edges: Vec<Rc<SubscriptionEntry>>,
    /// Re-entrancy guard.
    pub evaluating: bool,
    /// First evaluation is still deferred.
    pub pending: bool,
    pub disposed: bool,
    /// At least one evaluation completed successfully.
    pub evaluated: bool,
}

pub(crate) struct Node {
    pub kind: NodeKind,
    /// `None` until a computed finishes its first evaluation.
    pub value: Option<Box<dyn Any>>,
    /// Typed behavior (comparer, evaluator, writer), downcast by the handle.
    pub hooks: Option<Rc<dyn Any>>,
    pub notify: NotifyMode,
    pub writable: bool,
    pub computed: Option<ComputedState>,
    buckets: BTreeMap<String, Vec<Rc<SubscriptionEntry>>>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            value: None,
            hooks: None,
            notify: NotifyMode::default(),
            writable: false,
            computed: None,
            buckets: BTreeMap::new(),
        }
    }
}

/// Thread-local storage for all nodes.
pub(crate) struct NodeStorage {
    nodes: SlotMap<NodeId, Node>,
}

impl NodeStorage {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, node: Node) -> NodeId {
        self.nodes.insert(node)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or(Error::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or(Error::NodeNotFound(id))
    }

    pub fn computed(&self, id: NodeId) -> Result<&ComputedState> {
        self.node(id)?
            .computed
            .as_ref()
            .ok_or(Error::NodeNotFound(id))
    }

    pub fn computed_mut(&mut self, id: NodeId) -> Result<&mut ComputedState> {
        self.node_mut(id)?
            .computed
            .as_mut()
            .ok_or(Error::NodeNotFound(id))
    }

    /// Current value of a node, `Ok(None)` if it has none yet.
    pub fn value<T: 'static>(&self, id: NodeId) -> Result<Option<&T>> {
        match &self.node(id)?.value {
            Some(value) => value
                .downcast_ref::<T>()
                .map(Some)
                .ok_or(Error::TypeMismatch(id)),
            None => Ok(None),
        }
    }

    pub fn replace_value<T: 'static>(&mut self, id: NodeId, value: T) -> Result<()> {
        self.node_mut(id)?.value = Some(Box::new(value));
        Ok(())
    }

    pub fn hooks<H: 'static>(&self, id: NodeId) -> Result<Rc<H>> {
        let hooks = self
            .node(id)?
            .hooks
            .clone()
            .ok_or(Error::NodeNotFound(id))?;
        hooks.downcast::<H>().map_err(|_| Error::TypeMismatch(id))
    }

    /// Append a subscriber to the bucket for `event`.
    ///
    /// Disposed entries are pruned first, so a source that never notifies does
    /// not accumulate the edges of computeds that keep re-subscribing to it.
    /// Passes already in flight iterate their own snapshot and are unaffected.
    pub fn subscribe(
        &mut self,
        id: NodeId,
        event: &str,
        callback: Callback,
    ) -> Result<Rc<SubscriptionEntry>> {
        let entry = Rc::new(SubscriptionEntry {
            callback,
            disposed: Cell::new(false),
        });
        let bucket = self
            .node_mut(id)?
            .buckets
            .entry(event.to_owned())
            .or_default();
        bucket.retain(|entry| !entry.is_disposed());
        bucket.push(entry.clone());
        Ok(entry)
    }

    /// The subscribers present in a bucket right now, in subscription order.
    pub fn snapshot(&self, id: NodeId, event: &str) -> Result<Vec<Rc<SubscriptionEntry>>> {
        Ok(self
            .node(id)?
            .buckets
            .get(event)
            .cloned()
            .unwrap_or_default())
    }

    /// Drop disposed entries from a bucket.
    pub fn sweep(&mut self, id: NodeId, event: &str) {
        if let Some(bucket) = self
            .nodes
            .get_mut(id)
            .and_then(|node| node.buckets.get_mut(event))
        {
            bucket.retain(|entry| !entry.is_disposed());
        }
    }

    /// Live subscribers, for one event or across all of them.
    pub fn subscriptions_count(&self, id: NodeId, event: Option<&str>) -> Result<usize> {
        let buckets = &self.node(id)?.buckets;
        let live = |bucket: &Vec<Rc<SubscriptionEntry>>| {
            bucket.iter().filter(|entry| !entry.is_disposed()).count()
        };
        Ok(match event {
            Some(event) => buckets.get(event).map(live).unwrap_or(0),
            None => buckets.values().map(live).sum(),
        })
    }
}

thread_local! {
    static STORAGE: RefCell<NodeStorage> = RefCell::new(NodeStorage::new());
}

/// Access the thread-local node storage.
pub(crate) fn with_node_storage<R>(f: impl FnOnce(&mut NodeStorage) -> R) -> R {
    STORAGE.with(|storage| f(&mut storage.borrow_mut()))
}

/// Like [`with_node_storage`], but gives up instead of panicking when the
/// storage is already borrowed or being torn down. Used from drop guards.
pub(crate) fn try_with_node_storage<R>(f: impl FnOnce(&mut NodeStorage) -> R) -> Option<R> {
    STORAGE
        .try_with(|storage| storage.try_borrow_mut().ok().map(|mut storage| f(&mut storage)))
        .ok()
        .flatten()
}

/// Run one notification pass over the bucket for `event`.
///
/// Subscribers added during the pass are not called. Subscribers disposed during
/// the pass are skipped even if they were present when it started. A failing
/// callback aborts the pass and its error is returned.
pub(crate) fn notify_subscribers(id: NodeId, value: &dyn Any, event: &str) -> Result<()> {
    let entries = with_node_storage(|storage| storage.snapshot(id, event))?;

    for entry in &entries {
        if !entry.is_disposed() {
            entry.invoke(value)?;
        }
    }

    with_node_storage(|storage| storage.sweep(id, event));
    Ok(())
}
