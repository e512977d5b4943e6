use crate::{
	delayed_queue::DelayedDestroyQueue,
	error::{Error, FirstError, Result},
	host::{Host, Mutation, MutationListener, Task},
	module::{Binding, Module, ModuleHandle, ModuleId},
	options::ModuleOptions,
	store::{ContextId, ContextStore},
};
use core::{
	cell::{Ref, RefCell, RefMut},
	fmt::{self, Debug, Formatter},
	iter,
};
use hashbrown::HashSet;
use std::{
	collections::BTreeMap,
	rc::{Rc, Weak},
};
use tracing::{debug, instrument, trace, trace_span};

/// The lifecycle engine: owns the element context store and drives modules from host notifications.
///
/// Cloning is cheap and yields a handle to the same engine.
/// Independent engines never share state, even over the same document.
///
/// # Reentrancy
///
/// `create` and `destroy` callbacks may register and dispose modules and edit the document.
/// No internal borrow is held while a callback runs.
pub struct AutoCreate<H: Host> {
	inner: Rc<Inner<H>>,
}

struct Inner<H: Host> {
	host: H,
	state: RefCell<State<H>>,
}

struct State<H: Host> {
	store: ContextStore<H>,
	modules: BTreeMap<ModuleId, Rc<dyn Binding<H>>>,
	next_module_id: u64,
	delayed: DelayedDestroyQueue<H::Key, H::Element>,
	reconciliation: Option<H::Timer>,
}

impl<H: Host> Clone for AutoCreate<H> {
	fn clone(&self) -> Self {
		Self { inner: Rc::clone(&self.inner) }
	}
}

impl<H: Host> Debug for AutoCreate<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let state = self.state();
		f.debug_struct("AutoCreate")
			.field("store", &state.store)
			.field("modules", &state.modules.keys().collect::<Vec<_>>())
			.field("delayed", &state.delayed.len())
			.field("reconciliation_scheduled", &state.reconciliation.is_some())
			.finish()
	}
}

#[cfg(feature = "dangerous-logging")]
fn describe<E: Debug>(element: &E) -> &dyn Debug {
	element
}

#[cfg(not(feature = "dangerous-logging"))]
fn describe<E: Debug>(_: &E) -> &dyn Debug {
	&"<element>"
}

impl<H: Host> AutoCreate<H> {
	#[must_use]
	pub fn new(host: H) -> Self {
		Self {
			inner: Rc::new(Inner {
				host,
				state: RefCell::new(State {
					store: ContextStore::new(),
					modules: BTreeMap::new(),
					next_module_id: 0,
					delayed: DelayedDestroyQueue::new(),
					reconciliation: None,
				}),
			}),
		}
	}

	#[must_use]
	pub fn host(&self) -> &H {
		&self.inner.host
	}

	fn state(&self) -> Ref<'_, State<H>> {
		self.inner.state.borrow()
	}

	fn state_mut(&self) -> RefMut<'_, State<H>> {
		self.inner.state.borrow_mut()
	}

	/// Registers a module and instantiates it on every element under its roots that matches `selector` already.
	///
	/// Roots default to the document element. A root that matches `selector` is instantiated on too.
	///
	/// # Errors
	///
	/// - [`Error::InvalidConfiguration`] if `selector` is empty or rejected by the host. Nothing is registered in that case.
	/// - [`Error::Callback`] if a `create` callback fails during the initial scan.
	///   The module stays registered and the scan runs to completion. Use [`AutoCreate::dispose`] with the error's module id to undo it,
	///   or [`AutoCreate::register_partial`] to keep the handle.
	pub fn register<T: Default + 'static>(&self, selector: &str, options: ModuleOptions<H::Element, T>) -> Result<ModuleHandle<H, T>> {
		let (handle, scanned) = self.register_partial(selector, options)?;
		scanned.map(|()| handle)
	}

	/// Like [`AutoCreate::register`], but hands out the module's handle even if the initial scan failed.
	///
	/// The inner result is the initial scan's.
	///
	/// # Errors
	///
	/// [`Error::InvalidConfiguration`] if `selector` is empty or rejected by the host. Nothing is registered in that case.
	#[instrument(skip(self, options))]
	pub fn register_partial<T: Default + 'static>(&self, selector: &str, options: ModuleOptions<H::Element, T>) -> Result<(ModuleHandle<H, T>, Result<()>)> {
		let host = &self.inner.host;
		if selector.trim().is_empty() {
			return Err(Error::InvalidConfiguration {
				selector: selector.to_owned(),
				reason: "Selector cannot be empty".to_owned(),
			});
		}
		host.validate_selector(selector).map_err(|reason| Error::InvalidConfiguration {
			selector: selector.to_owned(),
			reason,
		})?;

		let ModuleOptions {
			roots,
			create,
			destroy,
			destroy_delayed,
		} = options;
		let roots = self.normalize_roots(roots);

		let id = {
			let mut state = self.state_mut();
			let id = ModuleId(state.next_module_id);
			state.next_module_id += 1;
			id
		};
		let module = Rc::new(Module::<H, T>::new(id, selector.to_owned(), roots, destroy_delayed, create, destroy));
		let binding: Rc<dyn Binding<H>> = module.clone();

		{
			let mut state = self.state_mut();
			state.modules.insert(id, Rc::clone(&binding));
			for root in binding.roots() {
				let key = host.key(root);
				state.store.bind_root(host, root, Rc::clone(&binding), || self.listener(key));
			}
		}
		debug!(module = %id, roots = binding.roots().len(), destroy_delayed, "Registered module.");

		let mut first_error = FirstError::new();
		for root in binding.roots() {
			first_error.record(self.scan(root, &binding));
		}
		Ok((ModuleHandle::new(self.clone(), module), first_error.into_result()))
	}

	/// Unbinds the module with `id` from its roots and destroys all of its instances.
	///
	/// Unknown or already disposed ids are ignored.
	///
	/// # Errors
	///
	/// [`Error::Callback`] with the first `destroy` failure. The remaining instances are still destroyed.
	#[instrument(skip(self))]
	pub fn dispose(&self, id: ModuleId) -> Result<()> {
		let host = &self.inner.host;
		let removed = self.state_mut().modules.remove(&id);
		let module = match removed {
			Some(module) => module,
			None => {
				trace!("Not registered.");
				return Ok(());
			}
		};
		module.set_disposed();

		let subscriptions = {
			let mut state = self.state_mut();
			let subscriptions: Vec<_> = module.roots().iter().filter_map(|root| state.store.unbind_root(host, root, id)).collect();
			subscriptions
		};
		debug!(module = %id, unobserved = subscriptions.len(), "Unbound module.");
		drop(subscriptions);

		let mut first_error = FirstError::new();
		for element in module.instances() {
			first_error.record(self.destroy(&element, id));
		}
		first_error.into_result()
	}

	fn normalize_roots(&self, roots: Vec<H::Element>) -> Vec<H::Element> {
		let host = &self.inner.host;
		if roots.is_empty() {
			return vec![host.document_element()];
		}
		let mut seen = HashSet::new();
		roots.into_iter().filter(|root| seen.insert(host.key(root))).collect()
	}

	fn listener(&self, root: H::Key) -> MutationListener<H::Element> {
		let inner = Rc::downgrade(&self.inner);
		Rc::new(move |batch: Vec<Mutation<H::Element>>| match Weak::upgrade(&inner) {
			Some(inner) => AutoCreate { inner }.handle_batch(root, batch),
			None => Ok(()),
		})
	}

	fn reconciliation_task(&self) -> Task {
		let inner = Rc::downgrade(&self.inner);
		Box::new(move || match Weak::upgrade(&inner) {
			Some(inner) => AutoCreate { inner }.reconcile(),
			None => Ok(()),
		})
	}

	/// Instantiates `module` on `root` (if it matches) and on each matching descendant.
	fn scan(&self, root: &H::Element, module: &Rc<dyn Binding<H>>) -> Result<()> {
		let host = &self.inner.host;
		let span = trace_span!("scan", module = %module.id(), root = ?describe(root));
		let _enter = span.enter();

		let mut first_error = FirstError::new();
		let root_matches = host.matches(root, module.selector());
		let matches = iter::once(root.clone()).filter(|_| root_matches).chain(host.query_all(root, module.selector()));
		for element in matches {
			first_error.record(self.instantiate(&element, module));
		}
		first_error.into_result()
	}

	/// Creates an instance of `module` on `element` unless there is one already.
	fn instantiate(&self, element: &H::Element, module: &Rc<dyn Binding<H>>) -> Result<()> {
		if module.is_disposed() {
			return Ok(());
		}
		let key = self.inner.host.key(element);
		let context = {
			let mut state = self.state_mut();
			let context = state.store.get_or_create(key, element);
			if context.modules.contains_key(&module.id()) {
				trace!(module = %module.id(), context = %context.id(), "Already instantiated.");
				return Ok(());
			}
			context.modules.insert(module.id(), Rc::clone(module));
			context.id()
		};
		debug!(module = %module.id(), %context, ?key, element = ?describe(element), "Creating instance.");
		module.create(context, element)
	}

	/// Tears down the instance of module `id` on `element`, if there is one.
	fn destroy(&self, element: &H::Element, id: ModuleId) -> Result<()> {
		let key = self.inner.host.key(element);
		let (context, module) = {
			let mut state = self.state_mut();
			let context = match state.store.get_mut(&key) {
				Some(context) => context,
				None => return Ok(()),
			};
			let module = match context.modules.remove(&id) {
				Some(module) => module,
				None => return Ok(()),
			};
			let context_id = context.id();
			state.store.remove_if_empty(&key);
			(context_id, module)
		};
		debug!(module = %id, %context, ?key, element = ?describe(element), "Destroying instance.");
		module.destroy(context)
	}

	#[instrument(skip(self, batch), fields(len = batch.len()))]
	fn handle_batch(&self, root: H::Key, batch: Vec<Mutation<H::Element>>) -> Result<()> {
		let mut first_error = FirstError::new();
		let mut deferred = Vec::new();
		for mutation in batch {
			match mutation {
				Mutation::Added(node) => {
					// Re-read per record, since callbacks may have (un)bound modules in the meantime.
					let modules = self.state().store.bound_modules(&root);
					for module in &modules {
						first_error.record(self.scan(&node, module));
					}
				}
				Mutation::Removed(node) => first_error.record(self.remove_subtree(root, &node, &mut deferred)),
			}
		}
		if !deferred.is_empty() {
			self.defer_destroy(deferred);
		}
		first_error.into_result()
	}

	/// Whether `element` is in the document below (or at) one of `module`'s roots.
	fn in_scope(&self, element: &H::Element, module: &Rc<dyn Binding<H>>) -> bool {
		let host = &self.inner.host;
		host.is_connected(element) && module.roots().iter().any(|module_root| host.contains(module_root, element))
	}

	/// Handles the removal of `node` as reported by the subscription on `root`.
	///
	/// Immediate-mode instances are destroyed. Those on elements that were moved within the reach of `root`'s modules are recreated right away,
	/// since each root reports its own records and the matching insertion may have been handled already.
	/// Delayed-mode instances are left to the next reconciliation pass, via `deferred`.
	fn remove_subtree(&self, root: H::Key, node: &H::Element, deferred: &mut Vec<(H::Key, H::Element)>) -> Result<()> {
		let host = &self.inner.host;
		let span = trace_span!("remove_subtree", node = ?describe(node));
		let _enter = span.enter();

		let mut first_error = FirstError::new();
		for element in iter::once(node.clone()).chain(host.descendants(node)) {
			let key = host.key(&element);
			let modules = match self.state().store.get(&key) {
				Some(context) => context.modules.values().cloned().collect::<Vec<_>>(),
				None => continue,
			};

			let mut delayed = false;
			for module in modules {
				if module.destroy_delayed() {
					delayed = true;
				} else if !self.in_scope(&element, &module) {
					first_error.record(self.destroy(&element, module.id()));
				} else if module.roots().iter().any(|module_root| host.key(module_root) == root) {
					trace!(module = %module.id(), ?key, "Moved, recreating.");
					first_error.record(self.destroy(&element, module.id()));
					if host.matches(&element, module.selector()) {
						first_error.record(self.instantiate(&element, &module));
					}
				} else {
					trace!(module = %module.id(), ?key, "Moved under one of the module's own roots, which report it themselves.");
				}
			}
			if delayed {
				deferred.push((key, element));
			}
		}
		first_error.into_result()
	}

	/// Queues `elements` and (re)schedules the reconciliation pass, replacing any pending one.
	fn defer_destroy(&self, elements: Vec<(H::Key, H::Element)>) {
		let timer = self.inner.host.schedule(self.reconciliation_task());
		let replaced = {
			let mut state = self.state_mut();
			for (key, element) in elements {
				if state.delayed.push(key, element) {
					trace!(?key, "Queued for delayed destroy.");
				}
			}
			state.reconciliation.replace(timer)
		};
		drop(replaced);
	}

	/// Destroys delayed-mode instances of queued elements that are no longer in the document.
	///
	/// Elements that were reattached in the meantime keep their instances.
	#[instrument(skip(self))]
	fn reconcile(&self) -> Result<()> {
		let host = &self.inner.host;
		let (pending, fired) = {
			let mut state = self.state_mut();
			(state.delayed.take(), state.reconciliation.take())
		};
		drop(fired);
		debug!(pending = pending.len(), "Reconciling delayed destroys.");

		let mut first_error = FirstError::new();
		for element in pending {
			let key = host.key(&element);
			if host.is_connected(&element) {
				trace!(?key, element = ?describe(&element), "Still in the document, keeping instances.");
				continue;
			}

			let delayed = match self.state().store.get(&key) {
				Some(context) => context.modules.values().filter(|module| module.destroy_delayed()).map(|module| module.id()).collect::<Vec<_>>(),
				None => continue,
			};
			for id in delayed {
				first_error.record(self.destroy(&element, id));
			}
		}
		first_error.into_result()
	}

	pub(crate) fn context_id(&self, element: &H::Element) -> Option<ContextId> {
		let key = self.inner.host.key(element);
		self.state().store.get(&key).map(|context| context.id())
	}

	/// How many elements currently carry a context (instantiated elements and watched roots).
	#[must_use]
	pub fn context_count(&self) -> usize {
		self.state().store.len()
	}

	/// Whether `element` currently carries a context.
	#[must_use]
	pub fn is_tracked(&self, element: &H::Element) -> bool {
		let key = self.inner.host.key(element);
		self.state().store.contains(&key)
	}

	/// Every element that currently carries a context, in no particular order.
	#[must_use]
	pub fn tracked_elements(&self) -> Vec<H::Element> {
		self.state().store.elements().cloned().collect()
	}

	/// Whether `root` currently has an active subtree subscription.
	#[must_use]
	pub fn is_observed(&self, root: &H::Element) -> bool {
		let key = self.inner.host.key(root);
		self.state().store.is_observed(&key)
	}

	/// How many elements wait for the next reconciliation pass.
	#[must_use]
	pub fn pending_delayed(&self) -> usize {
		self.state().delayed.len()
	}

	#[must_use]
	pub fn module_count(&self) -> usize {
		self.state().modules.len()
	}
}
