use crate::{coordinator::AutoCreate, error::Result, host::Host, module::ModuleHandle, options::ModuleOptions};

/// Registration as a method on a collection of elements.
///
/// The collection becomes the module's roots unless `options` names its own.
pub trait AutoCreateCollection<E> {
	/// See [`AutoCreate::register`].
	///
	/// # Errors
	///
	/// Like [`AutoCreate::register`].
	fn autocreate<H, T>(&self, engine: &AutoCreate<H>, selector: &str, options: ModuleOptions<E, T>) -> Result<ModuleHandle<H, T>>
	where
		H: Host<Element = E>,
		T: Default + 'static;
}
impl<E: Clone> AutoCreateCollection<E> for [E] {
	fn autocreate<H, T>(&self, engine: &AutoCreate<H>, selector: &str, options: ModuleOptions<E, T>) -> Result<ModuleHandle<H, T>>
	where
		H: Host<Element = E>,
		T: Default + 'static,
	{
		let options = if options.has_roots() { options } else { options.roots(self.iter().cloned()) };
		engine.register(selector, options)
	}
}
