use autocreate_dom::{memory::MemoryDocument, AutoCreate, Host, ModuleOptions};
use std::{cell::Cell, rc::Rc};

use memory_fixture_::{drain, element, init_logging, log, logging_options, Event};

#[test]
fn moves_within_one_batch_keep_the_instance() {
	init_logging();
	let document = MemoryDocument::new();
	let html = document.document_element();
	let from = element(&document, html, "ul", &[]);
	let to = element(&document, html, "ul", &[]);
	let item = element(&document, from, "li", &["item"]);

	let log = log();
	let engine = AutoCreate::new(document.clone());
	let items = engine.register(".item", logging_options(&log).destroy_delayed(true)).unwrap();
	assert_eq!(drain(&log), vec![Event::Create(item)]);

	document.append_child(to, item);
	document.flush().unwrap();
	assert_eq!(engine.pending_delayed(), 1);
	assert_eq!(document.pending_timers(), 1);

	document.run_timers().unwrap();
	assert!(drain(&log).is_empty());
	assert!(items.context_of(&item).is_some());
	assert_eq!(engine.pending_delayed(), 0);
	assert_eq!(document.pending_timers(), 0);
}

#[test]
fn reattachment_before_reconciliation_keeps_the_instance() {
	let document = MemoryDocument::new();
	let html = document.document_element();
	let list = element(&document, html, "ul", &[]);
	let item = element(&document, list, "li", &["item"]);

	let log = log();
	let engine = AutoCreate::new(document.clone());
	let items = engine.register(".item", logging_options(&log).root(list).destroy_delayed(true)).unwrap();
	drain(&log);

	document.remove(item);
	document.flush().unwrap();

	// Anywhere in the document counts, even outside the module's root.
	document.append_child(html, item);
	document.flush().unwrap();

	document.run_timers().unwrap();
	assert!(drain(&log).is_empty());
	assert_eq!(items.instances(), vec![item]);
}

#[test]
fn true_removal_destroys_exactly_once() {
	let document = MemoryDocument::new();
	let html = document.document_element();
	let item = element(&document, html, "p", &["item"]);

	let log = log();
	let engine = AutoCreate::new(document.clone());
	let items = engine.register(".item", logging_options(&log).destroy_delayed(true)).unwrap();
	drain(&log);

	document.remove(item);
	document.flush().unwrap();
	assert!(drain(&log).is_empty(), "Destroyed before reconciliation.");
	assert!(items.context_of(&item).is_some());

	document.settle().unwrap();
	assert_eq!(drain(&log), vec![Event::Destroy(item)]);
	assert!(!engine.is_tracked(&item));

	document.settle().unwrap();
	assert!(drain(&log).is_empty());
}

#[test]
fn removal_batches_coalesce_into_one_pass() {
	let document = MemoryDocument::new();
	let html = document.document_element();
	let first = element(&document, html, "p", &["item"]);
	let second = element(&document, html, "p", &["item"]);

	let log = log();
	let engine = AutoCreate::new(document.clone());
	let _items = engine.register(".item", logging_options(&log).destroy_delayed(true)).unwrap();
	drain(&log);

	document.remove(first);
	document.flush().unwrap();
	document.remove(second);
	document.flush().unwrap();
	assert_eq!(engine.pending_delayed(), 2);
	assert_eq!(document.pending_timers(), 1, "The first pass should have been replaced.");

	document.run_timers().unwrap();
	assert_eq!(drain(&log), vec![Event::Destroy(first), Event::Destroy(second)]);
	assert_eq!(document.pending_timers(), 0);
}

#[test]
fn immediate_and_delayed_modules_on_one_element() {
	let document = MemoryDocument::new();
	let html = document.document_element();
	let item = element(&document, html, "p", &["item"]);

	let (immediate, delayed) = (log(), log());
	let engine = AutoCreate::new(document.clone());
	let _immediate = engine.register(".item", logging_options(&immediate)).unwrap();
	let _delayed = engine.register(".item", logging_options(&delayed).destroy_delayed(true)).unwrap();
	drain(&immediate);
	drain(&delayed);

	document.remove(item);
	document.flush().unwrap();
	assert_eq!(drain(&immediate), vec![Event::Destroy(item)]);
	assert!(drain(&delayed).is_empty());
	assert!(engine.is_tracked(&item));

	document.run_timers().unwrap();
	assert_eq!(drain(&delayed), vec![Event::Destroy(item)]);
	assert!(!engine.is_tracked(&item));
}

#[test]
fn disposal_before_reconciliation_destroys_once() {
	let document = MemoryDocument::new();
	let html = document.document_element();
	let item = element(&document, html, "p", &["item"]);

	let log = log();
	let engine = AutoCreate::new(document.clone());
	let items = engine.register(".item", logging_options(&log).destroy_delayed(true)).unwrap();
	drain(&log);

	document.remove(item);
	document.flush().unwrap();
	items.dispose().unwrap();
	assert_eq!(drain(&log), vec![Event::Destroy(item)]);

	// The pass that was already scheduled still runs, but has nothing left to do.
	assert_eq!(document.pending_timers(), 1);
	document.run_timers().unwrap();
	assert!(drain(&log).is_empty());
	assert_eq!(engine.context_count(), 0);
}

#[test]
fn destroy_callbacks_can_queue_the_next_pass() {
	init_logging();
	let document = MemoryDocument::new();
	let html = document.document_element();
	let owner = element(&document, html, "div", &["owner"]);
	let dependent = element(&document, html, "div", &["dependent"]);

	let (owners, dependents) = (log(), log());
	let engine = AutoCreate::new(document.clone());
	let _owners = engine
		.register(
			".owner",
			logging_options(&owners).destroy_delayed(true).on_destroy({
				let document = document.clone();
				let owners = Rc::clone(&owners);
				move |&owner, _: &mut ()| {
					owners.borrow_mut().push(Event::Destroy(owner));
					// Its own removal lands in a new queue.
					document.remove(dependent);
					Ok(())
				}
			}),
		)
		.unwrap();
	let _dependents = engine.register(".dependent", logging_options(&dependents).destroy_delayed(true)).unwrap();
	drain(&owners);
	drain(&dependents);

	document.remove(owner);
	document.flush().unwrap();
	document.run_timers().unwrap();
	assert_eq!(drain(&owners), vec![Event::Destroy(owner)]);
	assert!(drain(&dependents).is_empty());

	document.flush().unwrap();
	assert_eq!(engine.pending_delayed(), 1);
	document.run_timers().unwrap();
	assert_eq!(drain(&dependents), vec![Event::Destroy(dependent)]);
	assert!(drain(&owners).is_empty());
	assert_eq!(engine.tracked_elements(), vec![html]);
}

#[test]
fn moved_subtree_keeps_descendant_instances() {
	let document = MemoryDocument::new();
	let html = document.document_element();
	let from = element(&document, html, "section", &[]);
	let to = element(&document, html, "section", &[]);
	let card = element(&document, from, "div", &["card"]);
	let button = element(&document, card, "button", &["button"]);

	let destroyed = Rc::new(Cell::new(0));
	let engine = AutoCreate::new(document.clone());
	let options = || {
		let destroyed = Rc::clone(&destroyed);
		ModuleOptions::<_, ()>::new().destroy_delayed(true).on_destroy(move |_, _| {
			destroyed.set(destroyed.get() + 1);
			Ok(())
		})
	};
	let cards = engine.register(".card", options()).unwrap();
	let buttons = engine.register(".button", options()).unwrap();

	document.append_child(to, card);
	document.settle().unwrap();
	assert_eq!(destroyed.get(), 0);
	assert!(cards.context_of(&card).is_some());
	assert!(buttons.context_of(&button).is_some());

	document.remove(card);
	document.settle().unwrap();
	assert_eq!(destroyed.get(), 2);
}

#[test]
fn one_pass_is_scheduled_per_batch() {
	let document = MemoryDocument::new();
	let html = document.document_element();
	let list = element(&document, html, "ul", &[]);
	let items: Vec<_> = (0..3).map(|_| element(&document, list, "li", &["item"])).collect();
	let loose = element(&document, html, "p", &["item"]);

	let log = log();
	let engine = AutoCreate::new(document.clone());
	let _items = engine.register(".item", logging_options(&log).destroy_delayed(true)).unwrap();
	drain(&log);

	let scheduled = document.scheduled_total();
	document.remove(list);
	document.remove(loose);
	document.flush().unwrap();
	assert_eq!(engine.pending_delayed(), 4);
	assert_eq!(document.scheduled_total(), scheduled + 1);

	document.run_timers().unwrap();
	let mut expected: Vec<_> = items.into_iter().map(Event::Destroy).collect();
	expected.push(Event::Destroy(loose));
	assert_eq!(drain(&log), expected);
}
