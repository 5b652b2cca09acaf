//! Named-event publish/subscribe primitive shared by every node type.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::storage::{
    notify_subscribers, with_node_storage, Callback, Node, NodeId, NodeKind, SubscriptionEntry,
};

/// Event fired after a value changed, carrying the new value.
pub const CHANGE: &str = "change";

/// Event fired before a value changes, carrying the old value.
pub const BEFORE_CHANGE: &str = "beforeChange";

/// Disposer for a single subscription.
///
/// Disposing is idempotent. The subscriber stops being called immediately, even
/// in the middle of a notification pass.
#[derive(Clone)]
pub struct Subscription {
    entry: Rc<SubscriptionEntry>,
}

impl Subscription {
    pub fn dispose(&self) {
        self.entry.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.entry.is_disposed()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn validate_event(event: &str) -> Result<()> {
    if event.is_empty() {
        return Err(Error::invalid_argument("event name must not be empty"));
    }
    Ok(())
}

/// Register a typed callback on `id` for `event`.
pub(crate) fn subscribe_node<T: 'static>(
    id: NodeId,
    event: &str,
    callback: impl Fn(&T) -> Result<()> + 'static,
) -> Result<Subscription> {
    validate_event(event)?;
    let callback: Callback = Rc::new(move |value: &dyn Any| match value.downcast_ref::<T>() {
        Some(value) => callback(value),
        None => Ok(()),
    });
    with_node_storage(|storage| storage.subscribe(id, event, callback))
        .map(|entry| Subscription { entry })
}

pub(crate) fn notify_node<T: 'static>(id: NodeId, value: &T, event: &str) -> Result<()> {
    validate_event(event)?;
    notify_subscribers(id, value, event)
}

/// A standalone event source delivering values of type `T`.
///
/// # Examples
///
/// ```rust,no_run
/// use tracked_signals::Subscribable;
///
/// let events = Subscribable::<i32>::new();
/// let subscription = events.subscribe(|value| println!("got {value}"))?;
/// events.notify_subscribers(&123)?;
/// subscription.dispose();
/// # Ok::<(), tracked_signals::Error>(())
/// ```
pub struct Subscribable<T> {
    id: NodeId,
    _phantom: PhantomData<fn(&T)>,
}

impl<T> Subscribable<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Copy for Subscribable<T> {}

impl<T> Clone for Subscribable<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Subscribable<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Subscribable<T> {}

impl<T> Hash for Subscribable<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Subscribable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribable").field("id", &self.id).finish()
    }
}

impl<T: 'static> Default for Subscribable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Subscribable<T> {
    pub fn new() -> Self {
        let id = with_node_storage(|storage| storage.insert(Node::new(NodeKind::Subscribable)));
        Self::from_id(id)
    }

    /// View any node as its subscribable part.
    pub(crate) fn from_id(id: NodeId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    /// Subscribe to the `change` event.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Result<Subscription> {
        self.subscribe_event(CHANGE, callback)
    }

    /// Subscribe to a named event.
    pub fn subscribe_event(
        &self,
        event: &str,
        callback: impl Fn(&T) + 'static,
    ) -> Result<Subscription> {
        subscribe_node(self.id, event, move |value: &T| {
            callback(value);
            Ok(())
        })
    }

    /// Subscribe with a fallible callback.
    ///
    /// An error from the callback aborts the notification pass it runs in and is
    /// returned to whoever triggered the notification.
    pub fn try_subscribe(
        &self,
        event: &str,
        callback: impl Fn(&T) -> Result<()> + 'static,
    ) -> Result<Subscription> {
        subscribe_node(self.id, event, callback)
    }

    /// Notify `change` subscribers.
    pub fn notify_subscribers(&self, value: &T) -> Result<()> {
        notify_node(self.id, value, CHANGE)
    }

    /// Notify the subscribers of a named event.
    pub fn notify_event(&self, value: &T, event: &str) -> Result<()> {
        notify_node(self.id, value, event)
    }

    /// Live subscriptions across all events.
    pub fn subscriptions_count(&self) -> Result<usize> {
        with_node_storage(|storage| storage.subscriptions_count(self.id, None))
    }

    pub fn event_subscriptions_count(&self, event: &str) -> Result<usize> {
        with_node_storage(|storage| storage.subscriptions_count(self.id, Some(event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::cell::Cell;
    use std::sync::Arc;

    #[test]
    fn test_notify_subscribers() {
        let instance = Subscribable::new();
        let notified = Arc::new(Mutex::new(None));
        let notified_clone = notified.clone();

        instance
            .subscribe(move |value: &i32| *notified_clone.lock() = Some(*value))
            .unwrap();
        instance.notify_subscribers(&123).unwrap();

        assert_eq!(*notified.lock(), Some(123));
    }

    #[test]
    fn test_unsubscribe() {
        let instance = Subscribable::new();
        let notified = Arc::new(Mutex::new(None));
        let notified_clone = notified.clone();

        let subscription = instance
            .subscribe(move |value: &i32| *notified_clone.lock() = Some(*value))
            .unwrap();
        subscription.dispose();
        subscription.dispose();
        instance.notify_subscribers(&123).unwrap();

        assert!(subscription.is_disposed());
        assert_eq!(*notified.lock(), None);
    }

    #[test]
    fn test_dispose_midway_through_notification() {
        let instance = Subscribable::<&str>::new();
        let second: Rc<Cell<Option<Subscription>>> = Rc::new(Cell::new(None));
        let second_notified = Rc::new(Cell::new(false));

        let handle = second.clone();
        instance
            .subscribe(move |_| {
                if let Some(subscription) = handle.take() {
                    subscription.dispose();
                }
            })
            .unwrap();
        let flag = second_notified.clone();
        second.set(Some(instance.subscribe(move |_| flag.set(true)).unwrap()));

        instance.notify_subscribers(&"ignored").unwrap();
        assert!(!second_notified.get());
        assert_eq!(instance.subscriptions_count().unwrap(), 1);
    }

    #[test]
    fn test_subscriber_added_during_notification_waits_for_next_pass() {
        let instance = Subscribable::<i32>::new();
        let late_calls = Rc::new(Cell::new(0));

        let calls = late_calls.clone();
        let added = Rc::new(Cell::new(false));
        instance
            .subscribe(move |_| {
                if !added.replace(true) {
                    let calls = calls.clone();
                    instance
                        .subscribe(move |_| calls.set(calls.get() + 1))
                        .unwrap();
                }
            })
            .unwrap();

        instance.notify_subscribers(&1).unwrap();
        assert_eq!(late_calls.get(), 0);
        instance.notify_subscribers(&2).unwrap();
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn test_notification_order_follows_subscription_order() {
        let instance = Subscribable::<i32>::new();
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = order.clone();
            instance
                .subscribe(move |_| order.borrow_mut().push(name))
                .unwrap();
        }
        instance.notify_subscribers(&0).unwrap();

        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_named_events() {
        let instance = Subscribable::new();
        let notified = Arc::new(Mutex::new(None));
        let notified_clone = notified.clone();

        instance
            .subscribe_event("myEvent", move |value: &i32| {
                *notified_clone.lock() = Some(*value)
            })
            .unwrap();

        instance.notify_event(&123, "unrelatedEvent").unwrap();
        instance.notify_subscribers(&789).unwrap();
        assert_eq!(*notified.lock(), None);

        instance.notify_event(&456, "myEvent").unwrap();
        assert_eq!(*notified.lock(), Some(456));
    }

    #[test]
    fn test_subscriptions_count() {
        let instance = Subscribable::<()>::new();
        instance.subscribe(|_| {}).unwrap();
        instance
            .subscribe_event("someSpecificEvent", |_| {})
            .unwrap();

        assert_eq!(instance.subscriptions_count().unwrap(), 2);
        assert_eq!(
            instance
                .event_subscriptions_count("someSpecificEvent")
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_empty_event_name_is_rejected() {
        let instance = Subscribable::<i32>::new();
        assert!(matches!(
            instance.subscribe_event("", |_| {}),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            instance.notify_event(&1, ""),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_failing_subscriber_aborts_the_pass() {
        let instance = Subscribable::<i32>::new();
        let reached = Rc::new(Cell::new(false));

        instance
            .try_subscribe(CHANGE, |_| Err(Error::evaluation("subscriber failed")))
            .unwrap();
        let flag = reached.clone();
        instance.subscribe(move |_| flag.set(true)).unwrap();

        assert!(matches!(
            instance.notify_subscribers(&1),
            Err(Error::Evaluation { .. })
        ));
        assert!(!reached.get());
    }
}
