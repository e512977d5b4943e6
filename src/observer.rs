//! Per-root state: the modules bound to a watched root and its subtree subscription.

use crate::{
	host::{Host, MutationListener},
	module::{Binding, ModuleId},
	store::ContextStore,
};
use core::fmt::{self, Debug, Formatter};
use std::{collections::BTreeMap, rc::Rc};
use tracing::{debug, trace, warn};

/// Exists exactly while at least one module is bound to its root, so that the subscription does too.
pub(crate) struct ObserverContext<H: Host> {
	modules: BTreeMap<ModuleId, Rc<dyn Binding<H>>>,
	subscription: H::Subscription,
}
impl<H: Host> ObserverContext<H> {
	fn new(subscription: H::Subscription) -> Self {
		Self {
			modules: BTreeMap::new(),
			subscription,
		}
	}

	/// In registration order.
	pub(crate) fn modules(&self) -> impl Iterator<Item = &Rc<dyn Binding<H>>> {
		self.modules.values()
	}
}
impl<H: Host> Debug for ObserverContext<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ObserverContext")
			.field("modules", &self.modules.keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}

impl<H: Host> ContextStore<H> {
	/// Binds `module` to `root`, subscribing to `root` first if nothing was bound to it yet.
	///
	/// Returns whether a new subscription was started.
	pub(crate) fn bind_root(&mut self, host: &H, root: &H::Element, module: Rc<dyn Binding<H>>, listener: impl FnOnce() -> MutationListener<H::Element>) -> bool {
		let key = host.key(root);
		let context = self.get_or_create(key, root);
		let id = context.id();
		let subscribed = context.observer.is_none();
		let observer = context.observer.get_or_insert_with(|| ObserverContext::new(host.observe(root, listener())));
		if observer.modules.insert(module.id(), module).is_some() {
			warn!(context = %id, "Module was already bound to this root.");
		}
		if subscribed {
			debug!(context = %id, ?key, "Observing root.");
		}
		subscribed
	}

	/// Unbinds `module` from `root`.
	///
	/// If that was the last bound module, the root's subscription is returned so the caller can drop it outside any borrow.
	/// The context itself is kept while it still carries instances.
	pub(crate) fn unbind_root(&mut self, host: &H, root: &H::Element, module: ModuleId) -> Option<H::Subscription> {
		let key = host.key(root);
		let context = self.get_mut(&key)?;
		let id = context.id();
		let observer = context.observer.as_mut()?;
		if observer.modules.remove(&module).is_none() {
			trace!(context = %id, %module, "Module wasn't bound to this root.");
			return None;
		}
		if !observer.modules.is_empty() {
			return None;
		}

		let subscription = context.observer.take().map(|observer| observer.subscription);
		debug!(context = %id, ?key, "Stopped observing root.");
		self.remove_if_empty(&key);
		subscription
	}

	/// Snapshot of the modules currently bound to the root with `key`.
	pub(crate) fn bound_modules(&self, key: &H::Key) -> Vec<Rc<dyn Binding<H>>> {
		self.get(key)
			.and_then(|context| context.observer.as_ref())
			.map(|observer| observer.modules().cloned().collect())
			.unwrap_or_default()
	}

	pub(crate) fn is_observed(&self, key: &H::Key) -> bool {
		self.get(key).map_or(false, |context| context.observer.is_some())
	}
}
