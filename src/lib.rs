//! # Tracked Signals
//!
//! A synchronous reactive engine: observable cells, derived computeds that
//! discover their own dependencies at read time, and a named-event
//! publish/subscribe primitive underneath both.
//!
//! ## Features
//!
//! - **Handles, not owners**: `Subscribable`, `Observable` and `Computed` are plain keys into a thread-local arena and can be moved into closures freely
//! - **Automatic tracking**: Computeds subscribe to exactly the nodes their last evaluation read
//! - **Dynamic rewiring**: Edges are rebuilt on every evaluation, so conditional reads stay precise
//! - **Synchronous cascade**: A write propagates depth-first through the graph before returning
//! - **Checked access**: Values and behavior are stored type-erased and every downcast reports `TypeMismatch` on failure
//! - **Bounded edge lists**: Dead subscriptions are pruned as new ones arrive, so quiet sources do not grow
//!
//! ## Example
//!
//! ```rust,no_run
//! use tracked_signals::prelude::*;
//!
//! let first = observable(String::from("Ada"));
//! let last = observable(String::from("Lovelace"));
//! let full = computed(move || Ok(format!("{} {}", first.get()?, last.get()?)))?;
//!
//! full.subscribe(|name| println!("renamed to {name}"))?;
//! first.set(String::from("Augusta"))?;
//! assert_eq!(full.get()?, "Augusta Lovelace");
//! # Ok::<(), tracked_signals::Error>(())
//! ```
//!
//! All state is thread-local. Handles are only meaningful on the thread that
//! created them.
//!
//! Propagation recurses once per link of a computed chain, costing a handful
//! of stack frames per link. Chains of a few hundred links fit the default
//! 2 MiB test-thread stack in debug builds; deeper chains need a larger stack
//! or a release build.

mod computed;
mod context;
mod error;
mod observable;
mod predicates;
mod storage;
mod subscribable;

pub use computed::{Computed, ComputedOptions};
pub use context::{ignore_dependencies, ComputedContext};
pub use error::{Error, Result};
pub use observable::{never_equal, Comparer, Extension, NotifyMode, Observable, Owner, Reactive};
pub use predicates::{
    is_computed, is_observable, is_subscribable, is_writeable_observable, AsNode, NodeRef,
};
pub use storage::{NodeId, NodeKind};
pub use subscribable::{Subscribable, Subscription, BEFORE_CHANGE, CHANGE};

/// Create a standalone event source.
pub fn subscribable<T: 'static>() -> Subscribable<T> {
    Subscribable::new()
}

/// Create an observable seeded with `initial`.
pub fn observable<T: Clone + PartialEq + 'static>(initial: T) -> Observable<T> {
    Observable::new(initial)
}

/// Create an eagerly evaluated, read-only computed.
pub fn computed<T: Clone + PartialEq + 'static>(
    evaluator: impl Fn() -> Result<T> + 'static,
) -> Result<Computed<T>> {
    Computed::new(evaluator)
}

/// Create a computed from options.
pub fn computed_with<T: Clone + 'static>(options: ComputedOptions<T>) -> Result<Computed<T>> {
    Computed::with_options(options)
}

/// Older name for [`computed`].
pub fn dependent_observable<T: Clone + PartialEq + 'static>(
    evaluator: impl Fn() -> Result<T> + 'static,
) -> Result<Computed<T>> {
    Computed::new(evaluator)
}

/// Constructors, handle types and the `Reactive` trait in one import.
pub mod prelude {
    pub use crate::{
        computed, computed_with, dependent_observable, ignore_dependencies, observable,
        subscribable, Computed, ComputedContext, ComputedOptions, Error, Extension, NotifyMode,
        Observable, Owner, Reactive, Result, Subscribable, Subscription, BEFORE_CHANGE, CHANGE,
    };
}
