use core::hash::Hash;
use hashbrown::HashSet;

/// Elements waiting for the next reconciliation pass.
///
/// [`DelayedDestroyQueue::take`] swaps the pending elements out before any of them are processed,
/// so pushes made while a pass is running (by `destroy` callbacks, for example) land in the next pass.
#[derive(Debug)]
pub(crate) struct DelayedDestroyQueue<K: Hash + Eq, E> {
	pending: Vec<E>,
	keys: HashSet<K>,
}
impl<K: Hash + Eq, E> DelayedDestroyQueue<K, E> {
	pub(crate) fn new() -> Self {
		Self {
			pending: Vec::new(),
			keys: HashSet::new(),
		}
	}

	/// Appends `element` unless it's already pending.
	///
	/// Returns whether it was appended.
	pub(crate) fn push(&mut self, key: K, element: E) -> bool {
		let fresh = self.keys.insert(key);
		if fresh {
			self.pending.push(element)
		}
		fresh
	}

	/// Empties the queue, returning its previous contents in push order.
	pub(crate) fn take(&mut self) -> Vec<E> {
		self.keys.clear();
		core::mem::take(&mut self.pending)
	}

	pub(crate) fn len(&self) -> usize {
		self.pending.len()
	}
}

#[cfg(test)]
mod tests {
	use super::DelayedDestroyQueue;

	#[test]
	fn deduplicates_until_taken() {
		let mut queue = DelayedDestroyQueue::new();
		assert!(queue.push(1, "a"));
		assert!(queue.push(2, "b"));
		assert!(!queue.push(1, "a"));
		assert_eq!(queue.len(), 2);

		assert_eq!(queue.take(), vec!["a", "b"]);
		assert_eq!(queue.len(), 0);
		assert!(queue.push(1, "a"));
	}

	#[test]
	fn refill_after_take_is_kept_apart() {
		let mut queue = DelayedDestroyQueue::new();
		queue.push(1, "a");
		let snapshot = queue.take();

		// As if a callback removed another element while `snapshot` is processed.
		queue.push(2, "b");

		assert_eq!(snapshot, vec!["a"]);
		assert_eq!(queue.take(), vec!["b"]);
	}
}
