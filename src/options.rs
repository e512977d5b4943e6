use crate::error::CallbackError;
use core::fmt::{self, Debug, Formatter};

/// A `create` or `destroy` callback.
///
/// It receives the element and the per-instance user context. Both halves of a pair see the same user context.
pub type Callback<E, T> = Box<dyn Fn(&E, &mut T) -> Result<(), CallbackError>>;

/// Everything about a module apart from its selector.
///
/// `T` is the user context type. A fresh [`T::default()`](`Default::default`) is created for each instance.
pub struct ModuleOptions<E, T = ()> {
	pub(crate) roots: Vec<E>,
	pub(crate) create: Option<Callback<E, T>>,
	pub(crate) destroy: Option<Callback<E, T>>,
	pub(crate) destroy_delayed: bool,
}
impl<E, T> Default for ModuleOptions<E, T> {
	fn default() -> Self {
		Self::new()
	}
}
impl<E, T> ModuleOptions<E, T> {
	/// Watches the document element and does nothing on create or destroy.
	#[must_use]
	pub fn new() -> Self {
		Self {
			roots: Vec::new(),
			create: None,
			destroy: None,
			destroy_delayed: false,
		}
	}

	/// Adds a root to watch. Duplicates are ignored at registration.
	#[must_use]
	pub fn root(mut self, root: E) -> Self {
		self.roots.push(root);
		self
	}

	#[must_use]
	pub fn roots(mut self, roots: impl IntoIterator<Item = E>) -> Self {
		self.roots.extend(roots);
		self
	}

	#[must_use]
	pub fn on_create(mut self, create: impl Fn(&E, &mut T) -> Result<(), CallbackError> + 'static) -> Self {
		self.create = Some(Box::new(create));
		self
	}

	#[must_use]
	pub fn on_destroy(mut self, destroy: impl Fn(&E, &mut T) -> Result<(), CallbackError> + 'static) -> Self {
		self.destroy = Some(Box::new(destroy));
		self
	}

	/// Defers destruction until the next reconciliation pass, and skips it if the element was only moved.
	#[must_use]
	pub fn destroy_delayed(mut self, destroy_delayed: bool) -> Self {
		self.destroy_delayed = destroy_delayed;
		self
	}

	pub(crate) fn has_roots(&self) -> bool {
		!self.roots.is_empty()
	}
}
impl<E: Debug, T> Debug for ModuleOptions<E, T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModuleOptions")
			.field("roots", &self.roots)
			.field("create", &self.create.is_some())
			.field("destroy", &self.destroy.is_some())
			.field("destroy_delayed", &self.destroy_delayed)
			.finish()
	}
}
