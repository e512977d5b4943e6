//! The document capabilities the lifecycle engine is built on.
//!
//! Selector matching, structural change notification and deferred execution all belong to the host document.
//! [`AutoCreate`](`crate::AutoCreate`) only ever talks to them through [`Host`].

use crate::error::Result;
use core::{fmt::Debug, hash::Hash};
use std::rc::Rc;

/// A structural change under an observed root, as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<E> {
	/// `E` (and with it its whole subtree) was inserted.
	Added(E),
	/// `E` (and with it its whole subtree) was detached from its parent.
	Removed(E),
}

/// Receives each batch of [`Mutation`]s, in the order the host recorded them.
pub type MutationListener<E> = Rc<dyn Fn(Vec<Mutation<E>>) -> Result<()>>;

/// A one-shot deferred task.
pub type Task = Box<dyn FnOnce() -> Result<()>>;

/// A host document.
///
/// # Contract
///
/// - [`Host::observe`] and [`Host::schedule`] must not call back synchronously.
/// - Listeners and tasks run one at a time and are never interleaved with each other.
/// - All mutations made during one synchronous host operation arrive in one batch.
pub trait Host: 'static {
	type Element: Clone + Debug + 'static;

	/// Stable identity of an element, used to key the context side-table.
	type Key: Copy + Eq + Hash + Debug + 'static;

	/// Live subtree subscription. Dropping it stops delivery and discards undelivered records.
	type Subscription: 'static;

	/// Pending deferred task. Dropping it cancels the task unless it already ran.
	type Timer: 'static;

	fn key(&self, element: &Self::Element) -> Self::Key;

	/// The element every attached element descends from.
	fn document_element(&self) -> Self::Element;

	fn matches(&self, element: &Self::Element, selector: &str) -> bool;

	/// Descendants of `root` (not `root` itself) that match `selector`, in document order.
	fn query_all(&self, root: &Self::Element, selector: &str) -> Vec<Self::Element>;

	/// All descendant elements of `root` (not `root` itself), in document order.
	fn descendants(&self, root: &Self::Element) -> Vec<Self::Element>;

	/// Whether the ancestor chain of `element` reaches [`Host::document_element`].
	fn is_connected(&self, element: &Self::Element) -> bool;

	/// Whether `ancestor` is `element` or one of its ancestors.
	fn contains(&self, ancestor: &Self::Element, element: &Self::Element) -> bool;

	/// Rejects selectors the host can't evaluate.
	///
	/// # Errors
	///
	/// Iff `selector` is malformed, with a human-readable reason.
	fn validate_selector(&self, selector: &str) -> core::result::Result<(), String> {
		let _ = selector;
		Ok(())
	}

	/// Starts delivering child list changes anywhere in the subtree of `root` to `listener`.
	fn observe(&self, root: &Self::Element, listener: MutationListener<Self::Element>) -> Self::Subscription;

	/// Runs `task` once, later.
	fn schedule(&self, task: Task) -> Self::Timer;
}
