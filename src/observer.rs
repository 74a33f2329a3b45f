//! Side-channel notifications for value writes and computation re-runs.
//!
//! Nodes are never modified: every instrumented node has an entry in an
//! indirection table, and the runtime hooks route through it. Several
//! subsystems observe the same node under different tags.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::addr::WeakAddr;
use crate::runtime::{Node, Owner, OwnerBody};

/// Identifies one observing subsystem.
pub type Tag = &'static str;

pub type ValueCallback = Rc<dyn Fn(&dyn Any, Option<&dyn Any>)>;
pub type RerunCallback = Rc<dyn Fn()>;

/// Per-node callbacks keyed by tag.
struct Callbacks<C> {
	by_tag: SmallVec<[(Tag, C); 2]>,
}

impl<C: Clone> Callbacks<C> {
	fn new() -> Self {
		Callbacks {
			by_tag: SmallVec::new(),
		}
	}

	fn insert(&mut self, tag: Tag, callback: C) {
		match self.by_tag.iter_mut().find(|(t, _)| *t == tag) {
			Some(entry) => entry.1 = callback,
			None => self.by_tag.push((tag, callback)),
		}
	}

	fn remove(&mut self, tag: Tag) {
		self.by_tag.retain(|(t, _)| *t != tag);
	}

	fn snapshot(&self) -> SmallVec<[C; 2]> {
		self.by_tag.iter().map(|(_, c)| c.clone()).collect()
	}
}

#[derive(Default)]
pub struct Observers {
	values: RefCell<BTreeMap<WeakAddr<dyn Node>, Callbacks<ValueCallback>>>,
	reruns: RefCell<BTreeMap<WeakAddr<OwnerBody>, Callbacks<RerunCallback>>>,
}

impl Observers {
	pub fn new() -> Self {
		Self::default()
	}

	/// Calls `callback` with the new and previous value before every
	/// committed write of `node`. The node is instrumented on the first
	/// registration and stays instrumented.
	pub fn observe_value_change(
		&self,
		node: &Rc<dyn Node>,
		tag: Tag,
		callback: impl Fn(&dyn Any, Option<&dyn Any>) + 'static,
	) {
		let mut values = self.values.borrow_mut();
		values
			.entry(WeakAddr::new(Rc::downgrade(node)))
			.or_insert_with(|| {
				node.instrument();
				Callbacks::new()
			})
			.insert(tag, Rc::new(callback));
	}

	pub fn unobserve_value_change(&self, node: &Rc<dyn Node>, tag: Tag) {
		let key = WeakAddr::new(Rc::downgrade(node));
		if let Some(callbacks) = self.values.borrow_mut().get_mut(&key) {
			callbacks.remove(tag);
		}
	}

	/// Calls `callback` after every re-run of the computation in `scope`.
	pub fn observe_computation_rerun(&self, scope: &Owner, tag: Tag, callback: impl Fn() + 'static) {
		self.reruns
			.borrow_mut()
			.entry(WeakAddr::new(Rc::downgrade(scope.rc())))
			.or_insert_with(Callbacks::new)
			.insert(tag, Rc::new(callback));
	}

	pub fn unobserve_computation_rerun(&self, scope: &Owner, tag: Tag) {
		let key = WeakAddr::new(Rc::downgrade(scope.rc()));
		if let Some(callbacks) = self.reruns.borrow_mut().get_mut(&key) {
			callbacks.remove(tag);
		}
	}

	pub fn is_observing_value(&self, node: &Rc<dyn Node>, tag: Tag) -> bool {
		let key = WeakAddr::new(Rc::downgrade(node));
		self.values
			.borrow()
			.get(&key)
			.map_or(false, |c| c.by_tag.iter().any(|(t, _)| *t == tag))
	}

	pub fn is_observing_rerun(&self, scope: &Owner, tag: Tag) -> bool {
		let key = WeakAddr::new(Rc::downgrade(scope.rc()));
		self.reruns
			.borrow()
			.get(&key)
			.map_or(false, |c| c.by_tag.iter().any(|(t, _)| *t == tag))
	}

	/// Fans a write out to the callbacks registered at call time. Callbacks
	/// may register or remove observers while running.
	pub(crate) fn value_written(&self, node: &Rc<dyn Node>, value: &dyn Any, prev: Option<&dyn Any>) {
		let key = WeakAddr::new(Rc::downgrade(node));
		let callbacks = match self.values.borrow().get(&key) {
			Some(callbacks) => callbacks.snapshot(),
			None => return,
		};

		for callback in callbacks {
			callback(value, prev);
		}
	}

	pub(crate) fn computation_rerun(&self, scope: &Owner) {
		let key = WeakAddr::new(Rc::downgrade(scope.rc()));
		let callbacks = match self.reruns.borrow().get(&key) {
			Some(callbacks) => callbacks.snapshot(),
			None => return,
		};

		for callback in callbacks {
			callback();
		}
	}

	/// Removes every callback registered under `tag`.
	pub fn unobserve_all(&self, tag: Tag) {
		for callbacks in self.values.borrow_mut().values_mut() {
			callbacks.remove(tag);
		}
		for callbacks in self.reruns.borrow_mut().values_mut() {
			callbacks.remove(tag);
		}
	}

	/// Forgets nodes that no longer exist and scopes that were disposed.
	/// Entries of live nodes stay even without callbacks: those nodes remain
	/// instrumented.
	pub fn sweep(&self) {
		self.values.borrow_mut().retain(|key, _| key.is_alive());
		self.reruns.borrow_mut().retain(|key, _| match key.upgrade() {
			Some(scope) => !Owner::from_rc(scope).is_disposed(),
			None => false,
		});
	}

	/// Number of nodes and scopes with an entry.
	pub fn len(&self) -> usize {
		self.values.borrow().len() + self.reruns.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.values.borrow_mut().clear();
		self.reruns.borrow_mut().clear();
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;
	use crate::runtime::{Role, Var};

	#[test]
	fn tags_observe_independently() {
		let observers = Observers::new();
		let var = Var::new(1);
		let node = var.node();

		let first = Rc::new(Cell::new(0));
		let second = Rc::new(Cell::new(0));

		observers.observe_value_change(&node, "first", {
			let first = first.clone();
			move |_, _| first.set(first.get() + 1)
		});
		observers.observe_value_change(&node, "second", {
			let second = second.clone();
			move |_, _| second.set(second.get() + 1)
		});

		observers.value_written(&node, &2, Some(&1));
		observers.unobserve_value_change(&node, "first");
		observers.unobserve_value_change(&node, "never-registered");
		observers.value_written(&node, &3, Some(&2));

		assert_eq!(first.get(), 1);
		assert_eq!(second.get(), 2);
		assert!(observers.is_observing_value(&node, "second"));
		assert!(!observers.is_observing_value(&node, "first"));
	}

	#[test]
	fn callbacks_receive_new_and_previous_values() {
		let observers = Observers::new();
		let node = Var::new(0u32).node();
		let seen = Rc::new(RefCell::new(Vec::new()));

		observers.observe_value_change(&node, "values", {
			let seen = seen.clone();
			move |value, prev| {
				let value = value.downcast_ref::<u32>().copied();
				let prev = prev.and_then(|p| p.downcast_ref::<u32>()).copied();
				seen.borrow_mut().push((value, prev));
			}
		});

		observers.value_written(&node, &5u32, Some(&0u32));
		observers.value_written(&node, &6u32, None);

		assert_eq!(*seen.borrow(), vec![(Some(5), Some(0)), (Some(6), None)]);
	}

	#[test]
	fn reruns_are_reported_per_scope() {
		let observers = Observers::new();
		let scope = Owner::new(Role::Computation, None);
		let other = Owner::new(Role::Computation, None);
		let runs = Rc::new(Cell::new(0));

		observers.observe_computation_rerun(&scope, "runs", {
			let runs = runs.clone();
			move || runs.set(runs.get() + 1)
		});

		observers.computation_rerun(&scope);
		observers.computation_rerun(&other);
		assert_eq!(runs.get(), 1);

		observers.unobserve_all("runs");
		observers.computation_rerun(&scope);
		assert_eq!(runs.get(), 1);
		assert!(!observers.is_observing_rerun(&scope, "runs"));

		let kept = Owner::new(Role::Computation, None);
		observers.observe_computation_rerun(&kept, "runs", || {});
		observers.observe_computation_rerun(&other, "runs", || {});
		other.dispose();

		drop(scope);
		observers.sweep();
		assert_eq!(observers.len(), 1);
		assert!(observers.is_observing_rerun(&kept, "runs"));
	}

	#[test]
	fn fan_out_uses_a_snapshot() {
		let observers = Rc::new(Observers::new());
		let node = Var::new(0).node();
		let calls = Rc::new(Cell::new(0));

		observers.observe_value_change(&node, "self-removing", {
			let observers = Rc::downgrade(&observers);
			let node = Rc::downgrade(&node);
			let calls = calls.clone();
			move |_, _| {
				calls.set(calls.get() + 1);
				if let (Some(observers), Some(node)) = (observers.upgrade(), node.upgrade()) {
					observers.unobserve_value_change(&node, "self-removing");
					observers.observe_value_change(&node, "late", |_, _| {});
				}
			}
		});

		observers.value_written(&node, &1, None);
		observers.value_written(&node, &2, None);

		assert_eq!(calls.get(), 1);
		assert!(observers.is_observing_value(&node, "late"));
	}
}
