//! The browser [`Host`], backed by [`web_sys`].
//!
//! Elements are keyed through a [`js_sys::WeakMap`], so the DOM itself is never annotated and keys don't keep elements alive.

use crate::host::{Host, Mutation, MutationListener, Task};
use core::{cell::Cell, convert::TryFrom, time::Duration};
use js_sys::{Array, Function, Object, WeakMap};
use tracing::{error, trace, warn};
use wasm_bindgen::{closure::Closure, JsCast, JsValue, UnwrapThrowExt};
use web_sys::{Document, Element, MutationObserver, MutationObserverInit, MutationRecord, Node, NodeList, Window};

/// A [`Host`] over a live [`web_sys::Document`].
#[derive(Debug)]
pub struct WebHost {
	window: Window,
	document: Document,
	keys: WeakMap,
	next_key: Cell<u64>,
	destroy_delay: i32,
}
impl WebHost {
	/// The current window's document, if there is one.
	#[must_use]
	pub fn from_window() -> Option<Self> {
		let window = web_sys::window()?;
		let document = window.document()?;
		Some(Self::new(window, document))
	}

	#[must_use]
	pub fn new(window: Window, document: Document) -> Self {
		Self {
			window,
			document,
			keys: WeakMap::new(),
			next_key: Cell::new(0),
			destroy_delay: 0,
		}
	}

	/// How long delayed destroys wait before the reconciliation pass. Defaults to zero, i.e. the next macrotask.
	#[must_use]
	pub fn with_destroy_delay(mut self, delay: Duration) -> Self {
		self.destroy_delay = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
		self
	}

	#[must_use]
	pub fn document(&self) -> &Document {
		&self.document
	}
}

/// Keys are stored as JS numbers, which stay exact up to here.
const MAX_KEY: u64 = (1 << 53) - 1;

fn allocate_key(next_key: &Cell<u64>) -> Option<u64> {
	let key = next_key.get();
	if key > MAX_KEY {
		return None;
	}
	next_key.set(key + 1);
	Some(key)
}

fn elements(node_list: &NodeList) -> Vec<Element> {
	(0..node_list.length())
		.filter_map(|i| node_list.get(i))
		.filter_map(|node| node.dyn_into::<Element>().ok())
		.collect()
}

/// Disconnects its [`MutationObserver`] when dropped.
#[derive(Debug)]
pub struct WebSubscription {
	observer: MutationObserver,
	_callback: Closure<dyn FnMut(Array, MutationObserver)>,
}
impl Drop for WebSubscription {
	fn drop(&mut self) {
		self.observer.disconnect();
		trace!("Disconnected MutationObserver.");
	}
}

/// Clears its timeout when dropped.
#[derive(Debug)]
pub struct WebTimer {
	window: Window,
	handle: Option<i32>,
	_callback: Closure<dyn FnMut()>,
}
impl Drop for WebTimer {
	fn drop(&mut self) {
		if let Some(handle) = self.handle {
			self.window.clear_timeout_with_handle(handle);
		}
	}
}

impl Host for WebHost {
	type Element = Element;
	type Key = u64;
	type Subscription = WebSubscription;
	type Timer = WebTimer;

	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
	fn key(&self, element: &Element) -> u64 {
		let object: &Object = element.as_ref();
		if let Some(key) = self.keys.get(object).as_f64() {
			return key as u64;
		}
		let key = allocate_key(&self.next_key).expect_throw("autocreate-dom: Ran out of element keys.");
		self.keys.set(object, &JsValue::from_f64(key as f64));
		key
	}

	fn document_element(&self) -> Element {
		self.document.document_element().expect_throw("autocreate-dom: The document has no document element.")
	}

	fn matches(&self, element: &Element, selector: &str) -> bool {
		element.matches(selector).unwrap_or_else(|error| {
			warn!("`Element.matches` threw: {:?}", error);
			false
		})
	}

	fn query_all(&self, root: &Element, selector: &str) -> Vec<Element> {
		match root.query_selector_all(selector) {
			Ok(node_list) => elements(&node_list),
			Err(error) => {
				warn!("`Element.querySelectorAll` threw: {:?}", error);
				Vec::new()
			}
		}
	}

	fn descendants(&self, root: &Element) -> Vec<Element> {
		self.query_all(root, "*")
	}

	fn is_connected(&self, element: &Element) -> bool {
		let node: &Node = element.as_ref();
		self.document_element().contains(Some(node))
	}

	fn contains(&self, ancestor: &Element, element: &Element) -> bool {
		let node: &Node = element.as_ref();
		ancestor.contains(Some(node))
	}

	fn validate_selector(&self, selector: &str) -> Result<(), String> {
		self.document.query_selector(selector).map(drop).map_err(|error| {
			error
				.dyn_ref::<js_sys::Error>()
				.map_or_else(|| format!("{:?}", error), |error| String::from(error.message()))
		})
	}

	fn observe(&self, root: &Element, listener: MutationListener<Element>) -> WebSubscription {
		let callback = Closure::wrap(Box::new(move |records: Array, _: MutationObserver| {
			let mut batch = Vec::new();
			for record in records.iter() {
				let record = match record.dyn_into::<MutationRecord>() {
					Ok(record) => record,
					Err(record) => {
						error!("Expected `MutationRecord` but received {:?}.", record);
						continue;
					}
				};
				batch.extend(elements(&record.removed_nodes()).into_iter().map(Mutation::Removed));
				batch.extend(elements(&record.added_nodes()).into_iter().map(Mutation::Added));
			}
			if !batch.is_empty() {
				if let Err(error) = listener(batch) {
					error!("Handling DOM mutations failed: {}", error);
				}
			}
		}) as Box<dyn FnMut(Array, MutationObserver)>);

		let observer = MutationObserver::new(callback.as_ref().unchecked_ref::<Function>()).expect_throw("autocreate-dom: Failed to create `MutationObserver`.");
		let mut options = MutationObserverInit::new();
		options.child_list(true).subtree(true);
		if let Err(error) = observer.observe_with_options(root, &options) {
			error!("`MutationObserver.observe` threw: {:?}", error);
		}

		WebSubscription { observer, _callback: callback }
	}

	fn schedule(&self, task: Task) -> WebTimer {
		let mut task = Some(task);
		let callback = Closure::wrap(Box::new(move || {
			if let Some(task) = task.take() {
				if let Err(error) = task() {
					error!("Delayed destroy pass failed: {}", error);
				}
			}
		}) as Box<dyn FnMut()>);

		let handle = match self
			.window
			.set_timeout_with_callback_and_timeout_and_arguments_0(callback.as_ref().unchecked_ref::<Function>(), self.destroy_delay)
		{
			Ok(handle) => Some(handle),
			Err(error) => {
				error!("`setTimeout` threw: {:?}", error);
				None
			}
		};

		WebTimer {
			window: self.window.clone(),
			handle,
			_callback: callback,
		}
	}
}
