use crate::{
	coordinator::AutoCreate,
	error::{Error, Phase, Result},
	host::Host,
	options::Callback,
	store::ContextId,
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Display, Formatter},
};
use std::{collections::BTreeMap, rc::Rc};

/// Identifies a registered module within its [`AutoCreate`] engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub(crate) u64);
impl Display for ModuleId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// The type-erased face of a [`Module`], as stored in element and root contexts.
pub(crate) trait Binding<H: Host> {
	fn id(&self) -> ModuleId;
	fn selector(&self) -> &str;
	fn roots(&self) -> &[H::Element];
	fn destroy_delayed(&self) -> bool;
	fn is_disposed(&self) -> bool;
	fn set_disposed(&self);

	/// Records the instance, then runs the `create` callback.
	fn create(&self, context: ContextId, element: &H::Element) -> Result<()>;

	/// Forgets the instance, then runs the `destroy` callback. No-op if there is no such instance.
	fn destroy(&self, context: ContextId) -> Result<()>;

	/// Elements with a live instance, in instantiation order.
	fn instances(&self) -> Vec<H::Element>;
}

struct Instance<E, T> {
	element: E,
	user_context: Rc<RefCell<T>>,
}

pub(crate) struct Module<H: Host, T> {
	id: ModuleId,
	selector: String,
	roots: Vec<H::Element>,
	destroy_delayed: bool,
	create: Option<Callback<H::Element, T>>,
	destroy: Option<Callback<H::Element, T>>,
	instances: RefCell<BTreeMap<ContextId, Instance<H::Element, T>>>,
	disposed: Cell<bool>,
}
impl<H: Host, T> Module<H, T> {
	pub(crate) fn new(
		id: ModuleId,
		selector: String,
		roots: Vec<H::Element>,
		destroy_delayed: bool,
		create: Option<Callback<H::Element, T>>,
		destroy: Option<Callback<H::Element, T>>,
	) -> Self {
		Self {
			id,
			selector,
			roots,
			destroy_delayed,
			create,
			destroy,
			instances: RefCell::default(),
			disposed: Cell::new(false),
		}
	}

	fn user_context(&self, context: ContextId) -> Option<Rc<RefCell<T>>> {
		self.instances.borrow().get(&context).map(|instance| Rc::clone(&instance.user_context))
	}

	fn run(&self, phase: Phase, callback: Option<&Callback<H::Element, T>>, element: &H::Element, user_context: &RefCell<T>) -> Result<()> {
		let callback = match callback {
			Some(callback) => callback,
			None => return Ok(()),
		};
		let mut user_context = user_context.try_borrow_mut().map_err(|_| Error::ContextBusy { module: self.id })?;
		callback(element, &mut *user_context).map_err(|source| Error::Callback { module: self.id, phase, source })
	}
}
impl<H: Host, T: Default + 'static> Binding<H> for Module<H, T> {
	fn id(&self) -> ModuleId {
		self.id
	}

	fn selector(&self) -> &str {
		&self.selector
	}

	fn roots(&self) -> &[H::Element] {
		&self.roots
	}

	fn destroy_delayed(&self) -> bool {
		self.destroy_delayed
	}

	fn is_disposed(&self) -> bool {
		self.disposed.get()
	}

	fn set_disposed(&self) {
		self.disposed.set(true)
	}

	fn create(&self, context: ContextId, element: &H::Element) -> Result<()> {
		let user_context = Rc::new(RefCell::new(T::default()));
		self.instances.borrow_mut().insert(
			context,
			Instance {
				element: element.clone(),
				user_context: Rc::clone(&user_context),
			},
		);
		self.run(Phase::Create, self.create.as_ref(), element, &user_context)
	}

	fn destroy(&self, context: ContextId) -> Result<()> {
		let removed = self.instances.borrow_mut().remove(&context);
		match removed {
			Some(Instance { element, user_context }) => self.run(Phase::Destroy, self.destroy.as_ref(), &element, &user_context),
			None => Ok(()),
		}
	}

	fn instances(&self) -> Vec<H::Element> {
		self.instances.borrow().values().map(|instance| instance.element.clone()).collect()
	}
}
impl<H: Host, T> Debug for Module<H, T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Module")
			.field("id", &self.id)
			.field("selector", &self.selector)
			.field("roots", &self.roots)
			.field("destroy_delayed", &self.destroy_delayed)
			.field("instances", &self.instances.borrow().len())
			.field("disposed", &self.disposed.get())
			.finish()
	}
}

/// The caller's handle to a registered module.
///
/// Dropping the handle does **not** dispose the module. Call [`ModuleHandle::dispose`] for that.
pub struct ModuleHandle<H: Host, T> {
	engine: AutoCreate<H>,
	module: Rc<Module<H, T>>,
}
impl<H: Host, T: Default + 'static> ModuleHandle<H, T> {
	pub(crate) fn new(engine: AutoCreate<H>, module: Rc<Module<H, T>>) -> Self {
		Self { engine, module }
	}

	#[must_use]
	pub fn id(&self) -> ModuleId {
		self.module.id
	}

	#[must_use]
	pub fn selector(&self) -> &str {
		&self.module.selector
	}

	#[must_use]
	pub fn is_disposed(&self) -> bool {
		self.module.is_disposed()
	}

	/// The user context of this module's instance on `element`, if there is one.
	///
	/// The returned cell is the one `create` and `destroy` receive. Borrowing it while one of them runs on the same instance panics.
	#[must_use]
	pub fn context_of(&self, element: &H::Element) -> Option<Rc<RefCell<T>>> {
		self.module.user_context(self.engine.context_id(element)?)
	}

	/// Elements this module currently has an instance on, in instantiation order.
	#[must_use]
	pub fn instances(&self) -> Vec<H::Element> {
		Binding::instances(&*self.module)
	}

	/// Unbinds the module from all its roots, then destroys each remaining instance.
	///
	/// Disposing twice is a no-op.
	///
	/// # Errors
	///
	/// If a `destroy` callback fails. All instances are destroyed regardless.
	pub fn dispose(&self) -> Result<()> {
		self.engine.dispose(self.module.id)
	}
}
impl<H: Host, T> Debug for ModuleHandle<H, T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ModuleHandle").field(&self.module).finish()
	}
}
