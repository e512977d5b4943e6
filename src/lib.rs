#![doc(html_root_url = "https://docs.rs/autocreate-dom/0.0.1")]
#![warn(clippy::pedantic)]

//! Automatically creates and destroys per-element state for elements matching a selector,
//! as they are added to or removed from watched subtrees of a document.
//!
//! See [`AutoCreate`] for the engine, [`Host`] for what a document has to provide,
//! and [`memory::MemoryDocument`] for a headless document.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

mod collection;
mod coordinator;
mod delayed_queue;
mod error;
mod host;
pub mod memory;
mod module;
mod observer;
mod options;
mod store;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use crate::{
	collection::AutoCreateCollection,
	coordinator::AutoCreate,
	error::{CallbackError, Error, Phase, Result},
	host::{Host, Mutation, MutationListener, Task},
	module::{ModuleHandle, ModuleId},
	options::{Callback, ModuleOptions},
};
