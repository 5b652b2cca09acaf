//! Capability checks over nodes of any value type.
//!
//! Handles are typed, but downstream layers such as binding code often hold
//! nodes without knowing `T`. [`NodeRef`] erases the type, and the predicates
//! answer from the node's recorded kind and write capability.

use crate::computed::Computed;
use crate::observable::Observable;
use crate::storage::{with_node_storage, NodeId, NodeKind};
use crate::subscribable::Subscribable;

/// A type-erased reference to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    id: NodeId,
}

impl NodeRef {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's kind, or `None` if it is not registered on this thread.
    pub fn kind(&self) -> Option<NodeKind> {
        with_node_storage(|storage| storage.node(self.id).map(|node| node.kind).ok())
    }

    fn is_writable(&self) -> bool {
        with_node_storage(|storage| storage.node(self.id).map(|node| node.writable))
            .unwrap_or(false)
    }
}

/// Anything that may refer to a node.
pub trait AsNode {
    fn as_node(&self) -> Option<NodeRef>;
}

impl AsNode for NodeRef {
    fn as_node(&self) -> Option<NodeRef> {
        Some(*self)
    }
}

impl<T> AsNode for Subscribable<T> {
    fn as_node(&self) -> Option<NodeRef> {
        Some(NodeRef { id: self.id() })
    }
}

impl<T> AsNode for Observable<T> {
    fn as_node(&self) -> Option<NodeRef> {
        Some(NodeRef { id: self.id() })
    }
}

impl<T> AsNode for Computed<T> {
    fn as_node(&self) -> Option<NodeRef> {
        Some(NodeRef { id: self.id() })
    }
}

impl<N: AsNode> AsNode for Option<N> {
    fn as_node(&self) -> Option<NodeRef> {
        self.as_ref().and_then(AsNode::as_node)
    }
}

impl<N: AsNode + ?Sized> AsNode for &N {
    fn as_node(&self) -> Option<NodeRef> {
        (**self).as_node()
    }
}

fn kind_of<N: AsNode + ?Sized>(value: &N) -> Option<NodeKind> {
    value.as_node().and_then(|node| node.kind())
}

/// Every node supports subscriptions.
pub fn is_subscribable<N: AsNode + ?Sized>(value: &N) -> bool {
    kind_of(value).is_some()
}

/// Observables and computeds.
pub fn is_observable<N: AsNode + ?Sized>(value: &N) -> bool {
    matches!(
        kind_of(value),
        Some(NodeKind::Observable | NodeKind::Computed)
    )
}

pub fn is_computed<N: AsNode + ?Sized>(value: &N) -> bool {
    kind_of(value) == Some(NodeKind::Computed)
}

/// Observables, and computeds built with a `write` callback.
pub fn is_writeable_observable<N: AsNode + ?Sized>(value: &N) -> bool {
    is_observable(value) && value.as_node().is_some_and(|node| node.is_writable())
}
