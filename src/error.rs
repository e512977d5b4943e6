use crate::module::ModuleId;
use core::fmt::{self, Display, Formatter};
use thiserror::Error;

/// What a user callback returns when it fails.
pub type CallbackError = Box<dyn std::error::Error + 'static>;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Which half of a module's callback pair failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Create,
	Destroy,
}
impl Display for Phase {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Phase::Create => "create",
			Phase::Destroy => "destroy",
		})
	}
}

#[derive(Debug, Error)]
pub enum Error {
	/// Registration was rejected before any state was created.
	#[error("Invalid module configuration for selector {selector:?}: {reason}")]
	InvalidConfiguration { selector: String, reason: String },

	/// A user callback failed. The bookkeeping change that triggered it is kept.
	#[error("{phase} callback of module {module} failed: {source}")]
	Callback {
		module: ModuleId,
		phase: Phase,
		#[source]
		source: CallbackError,
	},

	/// A callback asked for a user context that is currently lent out to another callback.
	#[error("User context of module {module} is already borrowed by a running callback")]
	ContextBusy { module: ModuleId },
}

/// Keeps the first error of a multi-element operation and logs the rest.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Option<Error>);
impl FirstError {
	pub(crate) fn new() -> Self {
		Self(None)
	}

	pub(crate) fn record(&mut self, result: Result<()>) {
		if let Err(error) = result {
			if self.0.is_some() {
				tracing::error!("Additional failure after the first reported one: {}", error);
			} else {
				self.0 = Some(error);
			}
		}
	}

	pub(crate) fn into_result(self) -> Result<()> {
		self.0.map_or(Ok(()), Err)
	}
}
