//! The element context side-table.

use crate::{host::Host, module::Binding, module::ModuleId, observer::ObserverContext};
use core::fmt::{self, Debug, Display, Formatter};
use hashbrown::HashMap;
use std::{collections::BTreeMap, rc::Rc};

/// Identifies a [`Context`]. Never reused within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);
impl Display for ContextId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "ctx{}", self.0)
	}
}

/// Bookkeeping for one element: which modules are instantiated on it, and whether it's a watched root.
pub(crate) struct Context<H: Host> {
	id: ContextId,
	element: H::Element,
	pub(crate) modules: BTreeMap<ModuleId, Rc<dyn Binding<H>>>,
	pub(crate) observer: Option<ObserverContext<H>>,
}
impl<H: Host> Context<H> {
	pub(crate) fn id(&self) -> ContextId {
		self.id
	}

	pub(crate) fn element(&self) -> &H::Element {
		&self.element
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.modules.is_empty() && self.observer.is_none()
	}
}
impl<H: Host> Debug for Context<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Context")
			.field("id", &self.id)
			.field("modules", &self.modules.keys().collect::<Vec<_>>())
			.field("observer", &self.observer)
			.finish()
	}
}

/// At most one [`Context`] per element key.
pub(crate) struct ContextStore<H: Host> {
	contexts: HashMap<H::Key, Context<H>>,
	next_id: u64,
}
impl<H: Host> ContextStore<H> {
	pub(crate) fn new() -> Self {
		Self {
			contexts: HashMap::new(),
			next_id: 0,
		}
	}

	pub(crate) fn get(&self, key: &H::Key) -> Option<&Context<H>> {
		self.contexts.get(key)
	}

	pub(crate) fn get_mut(&mut self, key: &H::Key) -> Option<&mut Context<H>> {
		self.contexts.get_mut(key)
	}

	pub(crate) fn get_or_create(&mut self, key: H::Key, element: &H::Element) -> &mut Context<H> {
		let next_id = &mut self.next_id;
		self.contexts.entry(key).or_insert_with(|| {
			let id = ContextId(*next_id);
			*next_id += 1;
			tracing::trace!(context = %id, ?key, "Allocated context.");
			Context {
				id,
				element: element.clone(),
				modules: BTreeMap::new(),
				observer: None,
			}
		})
	}

	/// Drops the context for `key` if it no longer tracks anything.
	///
	/// Returns whether a context was removed.
	pub(crate) fn remove_if_empty(&mut self, key: &H::Key) -> bool {
		if !self.contexts.get(key).map_or(false, Context::is_empty) {
			return false;
		}
		let removed = self.contexts.remove(key);
		tracing::trace!(context = ?removed.map(|context| context.id), ?key, "Released context.");
		true
	}

	pub(crate) fn len(&self) -> usize {
		self.contexts.len()
	}

	pub(crate) fn contains(&self, key: &H::Key) -> bool {
		self.contexts.contains_key(key)
	}

	pub(crate) fn elements(&self) -> impl Iterator<Item = &H::Element> {
		self.contexts.values().map(Context::element)
	}
}
impl<H: Host> Debug for ContextStore<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ContextStore")
			.field("len", &self.contexts.len())
			.field("next_id", &self.next_id)
			.finish()
	}
}
