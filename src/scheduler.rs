//! Coalescing of node-level notifications into one batch per tick.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use fxhash::FxHashSet;

use crate::registry::NodeId;
use crate::task::{self, TimerId};

/// When a scheduled flush runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
	/// At the end of the current turn.
	Microtask,
	/// Once the interval has passed.
	After(Duration),
}

impl Deadline {
	/// Zero means "end of turn".
	pub fn from_millis(millis: u64) -> Self {
		match millis {
			0 => Deadline::Microtask,
			millis => Deadline::After(Duration::from_millis(millis)),
		}
	}
}

/// One delivery. Carries no ordering contract across ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
	pub updates: Vec<(NodeId, T)>,
	pub toggled: Vec<(NodeId, bool)>,
}

pub struct Scheduler<T: 'static> {
	inner: Rc<SchedulerInner<T>>,
}

struct SchedulerInner<T: 'static> {
	deadline: Deadline,
	queue: RefCell<Vec<(NodeId, T)>>,
	toggles: RefCell<Vec<(NodeId, bool)>>,
	/// Generation of the flush currently scheduled.
	scheduled: Cell<Option<u64>>,
	generation: Cell<u64>,
	timer: Cell<Option<TimerId>>,
	consumer: Box<dyn Fn(Batch<T>)>,
}

impl<T: 'static> Scheduler<T> {
	pub fn new(deadline: Deadline, consumer: impl Fn(Batch<T>) + 'static) -> Self {
		Scheduler {
			inner: Rc::new(SchedulerInner {
				deadline,
				queue: RefCell::new(Vec::new()),
				toggles: RefCell::new(Vec::new()),
				scheduled: Cell::new(None),
				generation: Cell::new(0),
				timer: Cell::new(None),
				consumer: Box::new(consumer),
			}),
		}
	}

	pub fn push(&self, id: NodeId, payload: T) {
		self.inner.queue.borrow_mut().push((id, payload));
		self.schedule();
	}

	/// Records an on/off notification. A pending notification for the same
	/// id with the opposite state cancels out with this one.
	pub fn toggle(&self, id: NodeId, on: bool) {
		{
			let mut toggles = self.inner.toggles.borrow_mut();
			match toggles.iter().position(|(pending, _)| *pending == id) {
				Some(pos) if toggles[pos].1 != on => {
					toggles.remove(pos);
				}
				Some(_) => {}
				None => toggles.push((id, on)),
			}
		}
		self.schedule();
	}

	/// Drops queued notifications and the scheduled flush without
	/// delivering anything.
	pub fn clear(&self) {
		self.inner.queue.borrow_mut().clear();
		self.inner.toggles.borrow_mut().clear();
		self.inner.cancel();
	}

	/// Delivers whatever is queued right now.
	pub fn flush(&self) {
		self.inner.flush();
	}

	pub fn is_scheduled(&self) -> bool {
		self.inner.scheduled.get().is_some()
	}

	pub fn len(&self) -> usize {
		self.inner.queue.borrow().len() + self.inner.toggles.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn schedule(&self) {
		let inner = &self.inner;
		if inner.scheduled.get().is_some() {
			return;
		}

		let generation = inner.generation.get();
		inner.scheduled.set(Some(generation));

		let this = Rc::downgrade(inner);
		let run = move || SchedulerInner::run_scheduled(&this, generation);
		match inner.deadline {
			Deadline::Microtask => task::queue_microtask(run),
			Deadline::After(delay) => inner.timer.set(Some(task::set_timeout(delay, run))),
		}
	}
}

impl<T: 'static> SchedulerInner<T> {
	fn run_scheduled(this: &Weak<Self>, generation: u64) {
		if let Some(inner) = this.upgrade() {
			// A cleared scheduler may still see its old microtask.
			if inner.scheduled.get() == Some(generation) {
				inner.flush();
			}
		}
	}

	fn cancel(&self) {
		self.scheduled.set(None);
		self.generation.set(self.generation.get() + 1);
		if let Some(timer) = self.timer.take() {
			task::clear_timeout(timer);
		}
	}

	fn flush(&self) {
		self.cancel();

		let queue = std::mem::take(&mut *self.queue.borrow_mut());
		let toggled = std::mem::take(&mut *self.toggles.borrow_mut());
		if queue.is_empty() && toggled.is_empty() {
			return;
		}

		let mut seen = FxHashSet::default();
		let mut updates: Vec<_> = queue
			.into_iter()
			.rev()
			.filter(|(id, _)| seen.insert(*id))
			.collect();
		updates.reverse();

		tracing::trace!(updates = updates.len(), toggled = toggled.len(), "flush");
		(self.consumer)(Batch { updates, toggled });
	}
}

impl<T: 'static> Drop for Scheduler<T> {
	fn drop(&mut self) {
		self.inner.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn recording<T: Clone + 'static>(deadline: Deadline) -> (Scheduler<T>, Rc<RefCell<Vec<Batch<T>>>>) {
		let batches = Rc::new(RefCell::new(Vec::new()));
		let scheduler = Scheduler::new(deadline, {
			let batches = batches.clone();
			move |batch| batches.borrow_mut().push(batch)
		});
		(scheduler, batches)
	}

	fn id(raw: u64) -> NodeId {
		NodeId::from_raw(raw)
	}

	#[test]
	fn newest_payload_wins() {
		let (scheduler, batches) = recording(Deadline::Microtask);

		scheduler.push(id(1), "a");
		scheduler.push(id(2), "x");
		scheduler.push(id(1), "b");
		assert!(batches.borrow().is_empty());

		task::run_microtasks();

		let batches = batches.borrow();
		assert_eq!(batches.len(), 1);
		assert_eq!(batches[0].updates, vec![(id(2), "x"), (id(1), "b")]);
	}

	#[test]
	fn one_flush_per_tick() {
		let (scheduler, batches) = recording(Deadline::After(Duration::from_millis(300)));

		for raw in 0..50 {
			scheduler.push(id(raw % 5), ());
		}

		task::advance(Duration::from_millis(299));
		assert!(batches.borrow().is_empty());

		task::advance(Duration::from_millis(1));
		assert_eq!(batches.borrow().len(), 1);
		assert_eq!(batches.borrow()[0].updates.len(), 5);
		assert!(!scheduler.is_scheduled());
	}

	#[test]
	fn clear_cancels_the_pending_flush() {
		let (scheduler, batches) = recording(Deadline::Microtask);

		scheduler.push(id(1), 1);
		scheduler.clear();
		scheduler.clear();
		task::run_microtasks();
		assert!(batches.borrow().is_empty());

		scheduler.push(id(1), 2);
		task::run_microtasks();
		assert_eq!(batches.borrow().len(), 1);
		assert_eq!(batches.borrow()[0].updates, vec![(id(1), 2)]);
	}

	#[test]
	fn opposite_toggles_cancel_out() {
		let (scheduler, batches) = recording::<()>(Deadline::Microtask);

		scheduler.toggle(id(1), true);
		scheduler.toggle(id(1), false);
		scheduler.toggle(id(2), true);
		scheduler.toggle(id(2), true);
		task::run_microtasks();

		assert_eq!(batches.borrow()[0].toggled, vec![(id(2), true)]);

		scheduler.toggle(id(3), true);
		scheduler.toggle(id(3), false);
		task::run_microtasks();
		assert_eq!(batches.borrow().len(), 1);
	}
}
