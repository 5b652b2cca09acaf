//! Computed nodes that derive their value from other nodes.
//!
//! A computed runs its evaluator inside an execution-stack frame, collects every
//! node read along the way, and subscribes to exactly those nodes. When one of
//! them changes the computed re-evaluates, rebuilding its edges from scratch, and
//! stores the result through the same set path a plain observable uses.
//!
//! A failed evaluation changes nothing: the previous value and edges stay in
//! place until an evaluation succeeds.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::context::{begin_evaluation, record_dependency};
use crate::error::{Error, Result};
use crate::observable::{
    current_value, default_comparer, extend_node, read_value, value_has_mutated,
    value_will_mutate, write_value, Comparer, DisposeWhen, Extension, Hooks, NotifyMode, Owner,
    ReadFn, Reactive, WriteFn, WriteOrigin,
};
use crate::storage::{
    try_with_node_storage, with_node_storage, Callback, ComputedState, Node, NodeId, NodeKind,
};
use crate::subscribable::{Subscribable, Subscription, CHANGE};

/// Construction options for a [`Computed`].
///
/// `read` is required; everything else is optional.
pub struct ComputedOptions<T> {
    read: Option<ReadFn<T>>,
    write: Option<WriteFn<T>>,
    owner: Owner,
    comparer: Comparer<T>,
    defer_evaluation: bool,
    dispose_when: Option<DisposeWhen>,
    notify: NotifyMode,
}

impl<T: PartialEq + 'static> ComputedOptions<T> {
    pub fn new() -> Self {
        Self::with_comparer(default_comparer())
    }
}

impl<T: PartialEq + 'static> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> ComputedOptions<T> {
    /// Options for a value type compared with a custom comparer.
    pub fn with_comparer(comparer: Comparer<T>) -> Self {
        Self {
            read: None,
            write: None,
            owner: Owner::none(),
            comparer,
            defer_evaluation: false,
            dispose_when: None,
            notify: NotifyMode::Default,
        }
    }

    /// The evaluator. Receives the owner.
    pub fn read(mut self, read: impl Fn(&Owner) -> Result<T> + 'static) -> Self {
        self.read = Some(Rc::new(read));
        self
    }

    /// Makes the computed writable. Receives the owner and the written value.
    pub fn write(mut self, write: impl Fn(&Owner, T) -> Result<()> + 'static) -> Self {
        self.write = Some(Rc::new(write));
        self
    }

    pub fn owner(mut self, owner: Owner) -> Self {
        self.owner = owner;
        self
    }

    /// Postpone the first evaluation until the first read or subscription.
    pub fn defer_evaluation(mut self, defer: bool) -> Self {
        self.defer_evaluation = defer;
        self
    }

    /// Checked before every evaluation; returning true disposes the computed.
    pub fn dispose_when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
        self.dispose_when = Some(Rc::new(predicate));
        self
    }

    pub fn notify(mut self, mode: NotifyMode) -> Self {
        self.notify = mode;
        self
    }
}

/// Clears the re-entrancy flag on every exit path.
struct EvaluatingGuard {
    id: NodeId,
}

impl Drop for EvaluatingGuard {
    fn drop(&mut self) {
        try_with_node_storage(|storage| {
            if let Ok(state) = storage.computed_mut(self.id) {
                state.evaluating = false;
            }
        });
    }
}

/// A cached value derived from other observables and computeds.
///
/// Dependencies are discovered while the evaluator runs, so a computed only
/// listens to the nodes its latest evaluation actually read.
///
/// # Examples
///
/// ```rust,no_run
/// use tracked_signals::prelude::*;
///
/// let count = observable(5);
/// let doubled = computed(move || Ok(count.get()? * 2))?;
/// assert_eq!(doubled.get()?, 10);
///
/// count.set(6)?;
/// assert_eq!(doubled.get()?, 12);
/// # Ok::<(), tracked_signals::Error>(())
/// ```
pub struct Computed<T> {
    id: NodeId,
    _phantom: PhantomData<T>,
}

impl<T> Computed<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Copy for Computed<T> {}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Computed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Computed<T> {}

impl<T> Hash for Computed<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create an eagerly evaluated, read-only computed.
    pub fn new(evaluator: impl Fn() -> Result<T> + 'static) -> Result<Self> {
        Self::with_options(ComputedOptions::new().read(move |_| evaluator()))
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed from options.
    ///
    /// Fails with `InvalidArgument` when no `read` evaluator was given, and with
    /// the evaluator's error when the eager first evaluation fails.
    pub fn with_options(options: ComputedOptions<T>) -> Result<Self> {
        let read = options
            .read
            .ok_or_else(|| Error::invalid_argument("a computed needs a read evaluator"))?;

        let mut node = Node::new(NodeKind::Computed);
        node.writable = options.write.is_some();
        node.notify = options.notify;
        node.computed = Some(ComputedState {
            pending: true,
            ..ComputedState::default()
        });
        node.hooks = Some(Rc::new(Hooks {
            comparer: options.comparer,
            owner: options.owner,
            read: Some(read),
            write: options.write,
            dispose_when: options.dispose_when,
        }));

        let id = with_node_storage(|storage| storage.insert(node));
        let computed = Self {
            id,
            _phantom: PhantomData,
        };

        if !options.defer_evaluation {
            if let Err(error) = computed.evaluate() {
                computed.dispose()?;
                return Err(error);
            }
        }
        Ok(computed)
    }

    /// Run the evaluator and store its result.
    ///
    /// Skipped when disposed, when `dispose_when` says so, or when this node is
    /// already evaluating further up the stack.
    fn evaluate(&self) -> Result<()> {
        let id = self.id;
        let (hooks, disposed) = with_node_storage(|storage| {
            let hooks = storage.hooks::<Hooks<T>>(id)?;
            let state = storage.computed_mut(id)?;
            state.pending = false;
            Ok::<_, Error>((hooks, state.disposed))
        })?;
        if disposed {
            return Ok(());
        }

        if let Some(dispose_when) = &hooks.dispose_when {
            if dispose_when() {
                return self.dispose();
            }
        }

        let Some(read) = hooks.read.as_ref() else {
            return Err(Error::invalid_argument("a computed needs a read evaluator"));
        };

        let initial = with_node_storage(|storage| {
            let state = storage.computed_mut(id)?;
            if state.evaluating {
                return Ok(None);
            }
            state.evaluating = true;
            Ok::<_, Error>(Some(!state.evaluated))
        })?;
        let Some(initial) = initial else {
            trace!(node = ?id, "skipping re-entrant evaluation");
            return Ok(());
        };

        trace!(node = ?id, initial, "evaluating computed");
        let evaluating = EvaluatingGuard { id };
        let frame = begin_evaluation(id, initial);
        let result = read(&hooks.owner);
        let dependencies = frame.finish();
        drop(evaluating);

        let value = result?;
        let disposed = with_node_storage(|storage| {
            let state = storage.computed_mut(id)?;
            state.evaluated = true;
            Ok::<_, Error>(state.disposed)
        })?;
        if !disposed {
            self.replace_dependencies(dependencies)?;
        }

        write_value(id, value, WriteOrigin::Evaluation)
    }

    /// Swap the previous edges for one fresh subscription per dependency.
    fn replace_dependencies(&self, dependencies: Vec<NodeId>) -> Result<()> {
        let previous = with_node_storage(|storage| {
            Ok::<_, Error>(mem::take(&mut storage.computed_mut(self.id)?.edges))
        })?;
        for edge in &previous {
            edge.dispose();
        }

        let target = *self;
        let mut edges = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            let callback: Callback = Rc::new(move |_: &dyn Any| target.evaluate());
            edges.push(with_node_storage(|storage| {
                storage.subscribe(dependency, CHANGE, callback)
            })?);
        }

        trace!(
            node = ?self.id,
            previous = previous.len(),
            current = edges.len(),
            "rewired dependencies"
        );
        with_node_storage(|storage| {
            storage.computed_mut(self.id)?.edges = edges;
            Ok(())
        })
    }

    fn is_pending(&self) -> Result<bool> {
        with_node_storage(|storage| Ok(storage.computed(self.id)?.pending))
    }

    fn ensure_evaluated(&self) -> Result<()> {
        if self.is_pending()? {
            self.evaluate()?;
        }
        Ok(())
    }

    /// Get the cached value, tracking the read if called within an evaluation.
    ///
    /// Forces the first evaluation of a deferred computed.
    pub fn get(&self) -> Result<T> {
        record_dependency(self.id);
        self.ensure_evaluated()?;
        read_value(self.id)
    }

    /// Re-evaluate now and return the result without tracking the read.
    ///
    /// After disposal nothing is evaluated and the last value is returned.
    pub fn peek(&self) -> Result<T> {
        self.evaluate()?;
        read_value(self.id)
    }

    /// Write through the `write` callback.
    ///
    /// Fails with `NotWritable` if the computed was built without one.
    pub fn set(&self, value: T) -> Result<()> {
        write_value(self.id, value, WriteOrigin::External)
    }

    /// Stop evaluating and release every dependency edge. The last value stays
    /// readable.
    pub fn dispose(&self) -> Result<()> {
        let (was_disposed, edges) = with_node_storage(|storage| {
            let state = storage.computed_mut(self.id)?;
            let was_disposed = mem::replace(&mut state.disposed, true);
            state.pending = false;
            Ok::<_, Error>((was_disposed, mem::take(&mut state.edges)))
        })?;
        for edge in &edges {
            edge.dispose();
        }
        if !was_disposed {
            debug!(node = ?self.id, released = edges.len(), "computed disposed");
        }
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        with_node_storage(|storage| storage.computed(self.id).map(|state| state.disposed))
            .unwrap_or(true)
    }

    /// Number of sources read by the last completed evaluation.
    pub fn dependencies_count(&self) -> usize {
        with_node_storage(|storage| storage.computed(self.id).map(|state| state.edges.len()))
            .unwrap_or(0)
    }

    /// Whether any source can still trigger a re-evaluation.
    pub fn is_active(&self) -> bool {
        self.dependencies_count() > 0
    }

    pub fn value_has_mutated(&self) -> Result<()> {
        value_has_mutated::<T>(self.id)
    }

    pub fn value_will_mutate(&self) -> Result<()> {
        value_will_mutate::<T>(self.id)
    }

    /// Subscribe to the `change` event, evaluating a deferred computed first.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Result<Subscription> {
        self.ensure_evaluated()?;
        self.as_subscribable().subscribe(callback)
    }

    pub fn subscribe_event(
        &self,
        event: &str,
        callback: impl Fn(&T) + 'static,
    ) -> Result<Subscription> {
        self.ensure_evaluated()?;
        self.as_subscribable().subscribe_event(event, callback)
    }

    pub fn try_subscribe(
        &self,
        event: &str,
        callback: impl Fn(&T) -> Result<()> + 'static,
    ) -> Result<Subscription> {
        self.ensure_evaluated()?;
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

    /// Merge notify mode, comparer or `dispose_when` onto this computed.
    pub fn extend(self, extension: Extension<T>) -> Result<Self> {
        extend_node(self.id, extension)?;
        Ok(self)
    }

    pub fn as_subscribable(&self) -> Subscribable<T> {
        Subscribable::from_id(self.id)
    }
}

impl<T: Clone + 'static> Reactive<T> for Computed<T> {
    fn get(&self) -> Result<T> {
        Computed::get(self)
    }

    fn peek(&self) -> Result<T> {
        Computed::peek(self)
    }

    fn set(&self, value: T) -> Result<()> {
        Computed::set(self, value)
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id)
            .field("value", &current_value::<T>(self.id).ok().flatten())
            .field("dependencies", &self.dependencies_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
