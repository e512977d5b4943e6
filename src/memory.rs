//! A headless [`Host`] for tests and non-browser embedders.
//!
//! [`MemoryDocument`] keeps a plain element tree and imitates the parts of the DOM the engine relies on:
//!
//! - Child list changes are recorded for every subscription whose root is an inclusive ancestor of the changed parent
//!   **at the time of the change**, like a subtree `MutationObserver`.
//! - Records are only delivered by [`MemoryDocument::flush`], which stands in for a microtask checkpoint.
//! - Scheduled tasks only run in [`MemoryDocument::run_timers`].
//!
//! Supported selectors are type (`li`), universal (`*`), `#id` and `.class` selectors, compounds of those (`li.item#first`)
//! and comma-separated lists of compounds. Combinators, attribute selectors and pseudo-classes are rejected.

use crate::{
	error::{FirstError, Result},
	host::{Host, Mutation, MutationListener, Task},
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
	mem,
};
use std::{
	collections::BTreeMap,
	rc::{Rc, Weak},
};
use tracing::trace;

/// An element of a [`MemoryDocument`]. Only meaningful together with the document that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node {
	tag: String,
	id: Option<String>,
	classes: Vec<String>,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

struct Subscriber {
	root: NodeId,
	listener: MutationListener<NodeId>,
	pending: Vec<Mutation<NodeId>>,
}

#[derive(Default)]
struct Tree {
	nodes: Vec<Node>,
	subscribers: BTreeMap<u64, Subscriber>,
	timers: BTreeMap<u64, Task>,
	scheduled: usize,
	next_handle: u64,
}
impl Tree {
	fn node(&self, id: NodeId) -> &Node {
		&self.nodes[id.0]
	}

	fn node_mut(&mut self, id: NodeId) -> &mut Node {
		&mut self.nodes[id.0]
	}

	fn handle(&mut self) -> u64 {
		let handle = self.next_handle;
		self.next_handle += 1;
		handle
	}

	fn ancestors_inclusive(&self, mut id: NodeId) -> Vec<NodeId> {
		let mut ancestors = vec![id];
		while let Some(parent) = self.node(id).parent {
			ancestors.push(parent);
			id = parent;
		}
		ancestors
	}

	fn record(&mut self, parent: NodeId, mutation: &Mutation<NodeId>) {
		let ancestors = self.ancestors_inclusive(parent);
		for subscriber in self.subscribers.values_mut() {
			if ancestors.contains(&subscriber.root) {
				subscriber.pending.push(mutation.clone());
			}
		}
	}

	fn detach(&mut self, child: NodeId) {
		if let Some(parent) = self.node_mut(child).parent.take() {
			self.node_mut(parent).children.retain(|&sibling| sibling != child);
			self.record(parent, &Mutation::Removed(child));
		}
	}

	fn descendants(&self, root: NodeId) -> Vec<NodeId> {
		let mut descendants = Vec::new();
		let mut stack: Vec<NodeId> = self.node(root).children.iter().rev().copied().collect();
		while let Some(next) = stack.pop() {
			descendants.push(next);
			stack.extend(self.node(next).children.iter().rev().copied());
		}
		descendants
	}

	fn matches(&self, id: NodeId, selector: &str) -> bool {
		match parse_selector(selector) {
			Ok(compounds) => compounds.iter().any(|compound| compound.matches(self.node(id))),
			Err(_) => false,
		}
	}
}

/// An in-memory element tree with deferred change notification.
///
/// Cloning yields another handle to the same document.
#[derive(Clone)]
pub struct MemoryDocument(Rc<RefCell<Tree>>);

impl Default for MemoryDocument {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for MemoryDocument {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let tree = self.0.borrow();
		f.debug_struct("MemoryDocument")
			.field("nodes", &tree.nodes.len())
			.field("subscribers", &tree.subscribers.len())
			.field("timers", &tree.timers.len())
			.finish()
	}
}

impl MemoryDocument {
	/// Creates a document that consists of only its `<html>` document element.
	#[must_use]
	pub fn new() -> Self {
		let document = Self(Rc::default());
		let html = document.create_element("html");
		debug_assert_eq!(html, document.document_element());
		document
	}

	/// Creates a detached element. Tag names are case-insensitive.
	#[must_use]
	pub fn create_element(&self, tag: &str) -> NodeId {
		let mut tree = self.0.borrow_mut();
		let id = NodeId(tree.nodes.len());
		tree.nodes.push(Node {
			tag: tag.to_ascii_lowercase(),
			id: None,
			classes: Vec::new(),
			parent: None,
			children: Vec::new(),
		});
		id
	}

	pub fn set_id(&self, element: NodeId, id: &str) {
		self.0.borrow_mut().node_mut(element).id = Some(id.to_owned());
	}

	pub fn add_class(&self, element: NodeId, class: &str) {
		let mut tree = self.0.borrow_mut();
		let classes = &mut tree.node_mut(element).classes;
		if !classes.iter().any(|existing| existing == class) {
			classes.push(class.to_owned());
		}
	}

	/// Moves `child` to the end of `parent`'s children.
	///
	/// # Panics
	///
	/// Iff `child` is an inclusive ancestor of `parent`.
	pub fn append_child(&self, parent: NodeId, child: NodeId) {
		self.insert_before(parent, child, None);
	}

	/// Moves `child` into `parent`, before `reference` or at the end.
	///
	/// Like in the DOM, moving an attached element records a removal from its old parent followed by an insertion.
	///
	/// # Panics
	///
	/// Iff `child` is an inclusive ancestor of `parent`, or `reference` is not a child of `parent`.
	pub fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
		let mut tree = self.0.borrow_mut();
		assert!(!tree.ancestors_inclusive(parent).contains(&child), "Hierarchy request error: {:?} would contain itself.", child);

		tree.detach(child);
		let siblings = &mut tree.node_mut(parent).children;
		let index = match reference {
			Some(reference) => siblings.iter().position(|&sibling| sibling == reference).unwrap_or_else(|| panic!("{:?} is not a child of {:?}.", reference, parent)),
			None => siblings.len(),
		};
		siblings.insert(index, child);
		tree.node_mut(child).parent = Some(parent);
		tree.record(parent, &Mutation::Added(child));
	}

	/// Detaches `element` (with its subtree) from its parent, if it has one.
	pub fn remove(&self, element: NodeId) {
		self.0.borrow_mut().detach(element);
	}

	#[must_use]
	pub fn parent(&self, element: NodeId) -> Option<NodeId> {
		self.0.borrow().node(element).parent
	}

	#[must_use]
	pub fn children(&self, element: NodeId) -> Vec<NodeId> {
		self.0.borrow().node(element).children.clone()
	}

	#[must_use]
	pub fn tag(&self, element: NodeId) -> String {
		self.0.borrow().node(element).tag.clone()
	}

	/// Whether there are undelivered change records.
	#[must_use]
	pub fn has_pending_records(&self) -> bool {
		self.0.borrow().subscribers.values().any(|subscriber| !subscriber.pending.is_empty())
	}

	#[must_use]
	pub fn pending_timers(&self) -> usize {
		self.0.borrow().timers.len()
	}

	/// How many tasks were scheduled so far, including cancelled and finished ones.
	#[must_use]
	pub fn scheduled_total(&self) -> usize {
		self.0.borrow().scheduled
	}

	/// Delivers all pending change records, one batch per subscription, until none are left.
	///
	/// Records caused by listeners are delivered in a later round of the same call.
	///
	/// # Errors
	///
	/// The first error a listener returned. Delivery continues regardless.
	pub fn flush(&self) -> Result<()> {
		let mut first_error = FirstError::new();
		loop {
			let next = {
				let mut tree = self.0.borrow_mut();
				let next = tree
					.subscribers
					.iter_mut()
					.find(|(_, subscriber)| !subscriber.pending.is_empty())
					.map(|(&handle, subscriber)| (handle, Rc::clone(&subscriber.listener), mem::take(&mut subscriber.pending)));
				next
			};
			match next {
				Some((handle, listener, batch)) => {
					trace!(handle, len = batch.len(), "Delivering change records.");
					first_error.record(listener(batch));
				}
				None => break,
			}
		}
		first_error.into_result()
	}

	/// Runs the tasks that were scheduled before this call, in scheduling order.
	///
	/// # Errors
	///
	/// The first error a task returned. The remaining tasks run regardless.
	pub fn run_timers(&self) -> Result<()> {
		let due: Vec<u64> = self.0.borrow().timers.keys().copied().collect();
		let mut first_error = FirstError::new();
		for handle in due {
			let task = self.0.borrow_mut().timers.remove(&handle);
			if let Some(task) = task {
				trace!(handle, "Running task.");
				first_error.record(task());
			}
		}
		first_error.into_result()
	}

	/// Alternates [`MemoryDocument::flush`] and [`MemoryDocument::run_timers`] until neither has anything left to do.
	///
	/// # Errors
	///
	/// The first error any listener or task returned.
	pub fn settle(&self) -> Result<()> {
		let mut first_error = FirstError::new();
		loop {
			first_error.record(self.flush());
			if self.pending_timers() == 0 {
				break;
			}
			first_error.record(self.run_timers());
		}
		first_error.into_result()
	}
}

/// Dropping it unsubscribes and discards undelivered records.
#[derive(Debug)]
pub struct MemorySubscription {
	tree: Weak<RefCell<Tree>>,
	handle: u64,
}
impl Drop for MemorySubscription {
	fn drop(&mut self) {
		if let Some(tree) = self.tree.upgrade() {
			let removed = tree.borrow_mut().subscribers.remove(&self.handle);
			drop(removed);
		}
	}
}

/// Dropping it cancels the task if it hasn't run yet.
#[derive(Debug)]
pub struct MemoryTimer {
	tree: Weak<RefCell<Tree>>,
	handle: u64,
}
impl Drop for MemoryTimer {
	fn drop(&mut self) {
		if let Some(tree) = self.tree.upgrade() {
			let removed = tree.borrow_mut().timers.remove(&self.handle);
			drop(removed);
		}
	}
}

impl Host for MemoryDocument {
	type Element = NodeId;
	type Key = NodeId;
	type Subscription = MemorySubscription;
	type Timer = MemoryTimer;

	fn key(&self, element: &NodeId) -> NodeId {
		*element
	}

	fn document_element(&self) -> NodeId {
		NodeId(0)
	}

	fn matches(&self, element: &NodeId, selector: &str) -> bool {
		self.0.borrow().matches(*element, selector)
	}

	fn query_all(&self, root: &NodeId, selector: &str) -> Vec<NodeId> {
		let tree = self.0.borrow();
		tree.descendants(*root).into_iter().filter(|&descendant| tree.matches(descendant, selector)).collect()
	}

	fn descendants(&self, root: &NodeId) -> Vec<NodeId> {
		self.0.borrow().descendants(*root)
	}

	fn is_connected(&self, element: &NodeId) -> bool {
		self.0.borrow().ancestors_inclusive(*element).last() == Some(&self.document_element())
	}

	fn contains(&self, ancestor: &NodeId, element: &NodeId) -> bool {
		self.0.borrow().ancestors_inclusive(*element).contains(ancestor)
	}

	fn validate_selector(&self, selector: &str) -> core::result::Result<(), String> {
		parse_selector(selector).map(drop)
	}

	fn observe(&self, root: &NodeId, listener: MutationListener<NodeId>) -> MemorySubscription {
		let mut tree = self.0.borrow_mut();
		let handle = tree.handle();
		tree.subscribers.insert(
			handle,
			Subscriber {
				root: *root,
				listener,
				pending: Vec::new(),
			},
		);
		MemorySubscription {
			tree: Rc::downgrade(&self.0),
			handle,
		}
	}

	fn schedule(&self, task: Task) -> MemoryTimer {
		let mut tree = self.0.borrow_mut();
		let handle = tree.handle();
		tree.timers.insert(handle, task);
		tree.scheduled += 1;
		MemoryTimer {
			tree: Rc::downgrade(&self.0),
			handle,
		}
	}
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Compound<'a> {
	tag: Option<&'a str>,
	ids: Vec<&'a str>,
	classes: Vec<&'a str>,
}
impl Compound<'_> {
	fn matches(&self, node: &Node) -> bool {
		self.tag.map_or(true, |tag| tag.eq_ignore_ascii_case(&node.tag))
			&& self.ids.iter().all(|&id| node.id.as_deref() == Some(id))
			&& self.classes.iter().all(|&class| node.classes.iter().any(|existing| existing == class))
	}
}

fn is_identifier(name: &str) -> bool {
	!name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn split_marker(source: &str) -> (&str, &str) {
	source.split_at(source.find(|c: char| c == '.' || c == '#').unwrap_or_else(|| source.len()))
}

fn parse_compound(source: &str) -> core::result::Result<Compound<'_>, String> {
	let (head, mut rest) = split_marker(source);
	let mut compound = Compound::default();
	match head {
		"" if rest.is_empty() => return Err("Empty compound selector".to_owned()),
		"" | "*" => (),
		tag if is_identifier(tag) => compound.tag = Some(tag),
		other => return Err(format!("Unsupported selector syntax: {:?}", other)),
	}

	while let Some(marker) = rest.chars().next() {
		let (name, remaining) = split_marker(&rest[marker.len_utf8()..]);
		if !is_identifier(name) {
			return Err(format!("Unsupported selector syntax: {:?}", &rest[..marker.len_utf8() + name.len()]));
		}
		match marker {
			'.' => compound.classes.push(name),
			_ => compound.ids.push(name),
		}
		rest = remaining;
	}
	Ok(compound)
}

fn parse_selector(selector: &str) -> core::result::Result<Vec<Compound<'_>>, String> {
	selector.split(',').map(|compound| parse_compound(compound.trim())).collect()
}

#[cfg(test)]
mod tests {
	use super::{parse_selector, Compound, MemoryDocument};
	use crate::{
		error::Result,
		host::{Host, Mutation},
	};
	use std::{cell::RefCell, rc::Rc};

	#[test]
	fn parses_compounds_and_lists() {
		assert_eq!(
			parse_selector("li.item#first, .other").unwrap(),
			vec![
				Compound {
					tag: Some("li"),
					ids: vec!["first"],
					classes: vec!["item"],
				},
				Compound {
					tag: None,
					ids: vec![],
					classes: vec!["other"],
				},
			]
		);
		assert_eq!(parse_selector("*").unwrap(), vec![Compound::default()]);
	}

	#[test]
	fn rejects_unsupported_syntax() {
		for selector in &["", "ul li", "ul > li", "[data-x]", "a:hover", ".", "#", "li,", "li..x"] {
			assert!(parse_selector(selector).is_err(), "{:?} should be rejected", selector);
		}
	}

	#[test]
	fn matching_and_queries() {
		let document = MemoryDocument::new();
		let list = document.create_element("UL");
		let first = document.create_element("li");
		let second = document.create_element("li");
		document.add_class(first, "item");
		document.set_id(second, "second");
		document.append_child(document.document_element(), list);
		document.append_child(list, first);
		document.append_child(list, second);

		assert!(document.matches(&list, "ul"));
		assert!(document.matches(&first, "li.item"));
		assert!(!document.matches(&second, ".item"));
		assert!(document.matches(&second, ".item, #second"));
		assert_eq!(document.query_all(&list, "li"), vec![first, second]);
		assert_eq!(document.query_all(&document.document_element(), "*"), vec![list, first, second]);
		assert!(document.query_all(&first, "li").is_empty());
	}

	#[test]
	fn connectedness_follows_the_parent_chain() {
		let document = MemoryDocument::new();
		let outer = document.create_element("div");
		let inner = document.create_element("span");
		document.append_child(outer, inner);
		assert!(!document.is_connected(&inner));

		document.append_child(document.document_element(), outer);
		assert!(document.is_connected(&inner));
		assert!(document.is_connected(&document.document_element()));

		document.remove(outer);
		assert!(!document.is_connected(&inner));
		assert_eq!(document.parent(inner), Some(outer));
		assert!(document.contains(&outer, &inner));
		assert!(document.contains(&inner, &inner));
		assert!(!document.contains(&inner, &outer));
	}

	#[test]
	fn records_are_batched_per_subscription() {
		let document = MemoryDocument::new();
		let html = document.document_element();
		let list = document.create_element("ul");
		document.append_child(html, list);

		let batches = Rc::new(RefCell::new(Vec::new()));
		let subscription = document.observe(&list, {
			let batches = Rc::clone(&batches);
			Rc::new(move |batch: Vec<Mutation<_>>| -> Result<()> {
				batches.borrow_mut().push(batch);
				Ok(())
			})
		});

		let item = document.create_element("li");
		document.append_child(list, item);
		document.remove(item);
		// Not under the observed root:
		document.append_child(html, document.create_element("p"));
		assert!(batches.borrow().is_empty());

		document.flush().unwrap();
		assert_eq!(*batches.borrow(), vec![vec![Mutation::Added(item), Mutation::Removed(item)]]);

		document.append_child(list, item);
		drop(subscription);
		assert!(!document.has_pending_records());
		document.flush().unwrap();
		assert_eq!(batches.borrow().len(), 1);
	}

	#[test]
	fn dropped_timers_never_run() {
		let document = MemoryDocument::new();
		let runs = Rc::new(RefCell::new(0));

		let kept = document.schedule({
			let runs = Rc::clone(&runs);
			Box::new(move || -> Result<()> {
				*runs.borrow_mut() += 1;
				Ok(())
			})
		});
		let cancelled = document.schedule({
			let runs = Rc::clone(&runs);
			Box::new(move || -> Result<()> {
				*runs.borrow_mut() += 10;
				Ok(())
			})
		});
		drop(cancelled);
		assert_eq!(document.pending_timers(), 1);

		document.run_timers().unwrap();
		assert_eq!(*runs.borrow(), 1);
		assert_eq!(document.pending_timers(), 0);
		drop(kept);
	}
}
