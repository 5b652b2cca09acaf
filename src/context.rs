//! Execution stack and the ambient evaluation context.
//!
//! Each computed evaluation pushes a frame that collects the nodes read while it
//! runs. Reads land in the top frame only, so nested evaluations never leak
//! dependencies into their callers. Ignored frames swallow reads entirely; they
//! wrap change notifications so that a subscriber's side effects do not become
//! dependencies of whatever computed triggered the write.
//!
//! Frames are popped by a drop guard, which keeps the stack consistent when an
//! evaluator returns an error or panics.

use std::cell::RefCell;
use std::mem;

use crate::storage::NodeId;

enum Frame {
    Evaluation {
        node: NodeId,
        initial: bool,
        dependencies: Vec<NodeId>,
    },
    Ignored,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Record `id` as a dependency of the evaluation on top of the stack.
///
/// Repeated reads of the same node collapse into one entry, and a computed
/// reading itself is not recorded.
pub(crate) fn record_dependency(id: NodeId) {
    STACK.with(|stack| {
        if let Some(Frame::Evaluation {
            node, dependencies, ..
        }) = stack.borrow_mut().last_mut()
        {
            if *node != id && !dependencies.contains(&id) {
                dependencies.push(id);
            }
        }
    });
}

/// Pops its frame (and anything pushed above it) when dropped.
#[must_use]
pub(crate) struct FrameGuard {
    depth: usize,
}

impl FrameGuard {
    fn push(frame: Frame) -> Self {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let depth = stack.len();
            stack.push(frame);
            Self { depth }
        })
    }

    /// Pop the frame and hand back the nodes it collected, in first-read order.
    pub fn finish(self) -> Vec<NodeId> {
        STACK.with(|stack| match stack.borrow_mut().get_mut(self.depth) {
            Some(Frame::Evaluation { dependencies, .. }) => mem::take(dependencies),
            _ => Vec::new(),
        })
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = STACK.try_with(|stack| {
            if let Ok(mut stack) = stack.try_borrow_mut() {
                stack.truncate(self.depth);
            }
        });
    }
}

/// Start collecting dependencies for an evaluation of `node`.
pub(crate) fn begin_evaluation(node: NodeId, initial: bool) -> FrameGuard {
    FrameGuard::push(Frame::Evaluation {
        node,
        initial,
        dependencies: Vec::new(),
    })
}

/// Run `f` without recording any of its reads as dependencies.
pub fn ignore_dependencies<R>(f: impl FnOnce() -> R) -> R {
    let _guard = FrameGuard::push(Frame::Ignored);
    f()
}

/// Metadata about the computed evaluation currently in progress.
///
/// Every accessor returns `None` outside of an evaluation, including inside
/// [`ignore_dependencies`].
pub struct ComputedContext;

impl ComputedContext {
    /// Whether the running evaluation is the computed's first successful one.
    pub fn is_initial() -> Option<bool> {
        STACK.with(|stack| match stack.borrow().last() {
            Some(Frame::Evaluation { initial, .. }) => Some(*initial),
            _ => None,
        })
    }

    /// Distinct dependencies recorded so far by the running evaluation.
    pub fn dependencies_count() -> Option<usize> {
        STACK.with(|stack| match stack.borrow().last() {
            Some(Frame::Evaluation { dependencies, .. }) => Some(dependencies.len()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{with_node_storage, Node, NodeKind};

    fn node() -> NodeId {
        with_node_storage(|storage| storage.insert(Node::new(NodeKind::Observable)))
    }

    fn depth() -> usize {
        STACK.with(|stack| stack.borrow().len())
    }

    #[test]
    fn test_reads_outside_evaluation_are_dropped() {
        record_dependency(node());
        assert_eq!(depth(), 0);
        assert_eq!(ComputedContext::dependencies_count(), None);
        assert_eq!(ComputedContext::is_initial(), None);
    }

    #[test]
    fn test_frame_collects_distinct_reads() {
        let (owner, a, b) = (node(), node(), node());

        let frame = begin_evaluation(owner, true);
        record_dependency(a);
        record_dependency(b);
        record_dependency(a);
        record_dependency(owner);
        assert_eq!(ComputedContext::dependencies_count(), Some(2));
        assert_eq!(ComputedContext::is_initial(), Some(true));

        assert_eq!(frame.finish(), vec![a, b]);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_nested_frames_are_isolated() {
        let (outer, inner, a, b) = (node(), node(), node(), node());

        let outer_frame = begin_evaluation(outer, false);
        record_dependency(a);
        {
            let inner_frame = begin_evaluation(inner, true);
            record_dependency(b);
            assert_eq!(inner_frame.finish(), vec![b]);
        }
        assert_eq!(ComputedContext::is_initial(), Some(false));
        assert_eq!(outer_frame.finish(), vec![a]);
    }

    #[test]
    fn test_ignored_frame_swallows_reads() {
        let (owner, a, b) = (node(), node(), node());

        let frame = begin_evaluation(owner, true);
        record_dependency(a);
        let count = ignore_dependencies(|| {
            record_dependency(b);
            ComputedContext::dependencies_count()
        });
        assert_eq!(count, None);
        assert_eq!(frame.finish(), vec![a]);
    }

    #[test]
    fn test_stack_restored_after_panic() {
        let owner = node();
        let result = std::panic::catch_unwind(|| {
            let _frame = begin_evaluation(owner, true);
            panic!("evaluator blew up");
        });
        assert!(result.is_err());
        assert_eq!(depth(), 0);
    }
}
