//! Host task queue: microtasks and a virtual-clock timer list.
//!
//! Nothing runs on its own. The host loop calls [`run_microtasks`] at the
//! end of every turn and [`advance`] to move the clock forward. On `wasm32`
//! microtasks are handed to the JavaScript microtask queue instead, but
//! timers stay on the virtual clock on every target: a browser host has to
//! call [`advance`] from its own frame or interval callback, otherwise
//! throttled flushes never fire.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

type Task = Box<dyn FnOnce()>;

/// Handle of a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Default)]
struct Queue {
	microtasks: VecDeque<Task>,
	timers: BTreeMap<(Duration, u64), Task>,
	now: Duration,
	next_timer: u64,
}

thread_local! {
	static QUEUE: RefCell<Queue> = RefCell::new(Queue::default());
}

#[cfg(not(target_arch = "wasm32"))]
pub fn queue_microtask(func: impl FnOnce() + 'static) {
	QUEUE.with(|queue| queue.borrow_mut().microtasks.push_back(Box::new(func)));
}

#[cfg(target_arch = "wasm32")]
pub fn queue_microtask(func: impl FnOnce() + 'static) {
	crate::microtask::queue(func);
}

/// Runs queued microtasks, including the ones they queue, until the queue
/// is empty. Returns how many ran.
pub fn run_microtasks() -> usize {
	let mut count = 0;
	loop {
		let task = QUEUE.with(|queue| queue.borrow_mut().microtasks.pop_front());
		match task {
			Some(task) => {
				task();
				count += 1;
			}
			None => return count,
		}
	}
}

/// Runs `func` once the clock has moved `delay` past the current time.
pub fn set_timeout(delay: Duration, func: impl FnOnce() + 'static) -> TimerId {
	QUEUE.with(|queue| {
		let mut queue = queue.borrow_mut();
		let id = queue.next_timer;
		queue.next_timer += 1;
		let at = queue.now + delay;
		queue.timers.insert((at, id), Box::new(func));
		TimerId(id)
	})
}

/// Cancels a pending timer. Returns `false` if it already ran or was
/// cancelled before.
pub fn clear_timeout(id: TimerId) -> bool {
	let task = QUEUE.with(|queue| {
		let mut queue = queue.borrow_mut();
		let key = queue.timers.keys().find(|(_, seq)| *seq == id.0).copied();
		key.and_then(|key| queue.timers.remove(&key))
	});
	// Dropped outside of the borrow: a task may own things that schedule.
	task.is_some()
}

/// Moves the clock forward by `by`, firing due timers in deadline order.
/// Microtasks are drained before the first timer and after every timer.
pub fn advance(by: Duration) {
	let target = QUEUE.with(|queue| queue.borrow().now + by);

	loop {
		run_microtasks();

		let due = QUEUE.with(|queue| {
			let mut queue = queue.borrow_mut();
			let key = queue.timers.keys().next().copied().filter(|(at, _)| *at <= target)?;
			queue.now = key.0;
			queue.timers.remove(&key)
		});

		match due {
			Some(task) => task(),
			None => break,
		}
	}

	QUEUE.with(|queue| queue.borrow_mut().now = target);
	run_microtasks();
}

/// Current virtual time.
pub fn now() -> Duration {
	QUEUE.with(|queue| queue.borrow().now)
}

/// Number of timers that have not fired yet.
pub fn pending_timers() -> usize {
	QUEUE.with(|queue| queue.borrow().timers.len())
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;

	use super::*;

	#[test]
	fn timers_fire_in_deadline_order() {
		let log = Rc::new(RefCell::new(Vec::new()));

		let push = |label: &'static str| {
			let log = log.clone();
			move || log.borrow_mut().push(label)
		};

		set_timeout(Duration::from_millis(20), push("late"));
		set_timeout(Duration::from_millis(10), push("early"));
		let cancelled = set_timeout(Duration::from_millis(15), push("cancelled"));
		queue_microtask(push("micro"));

		assert!(clear_timeout(cancelled));
		assert!(!clear_timeout(cancelled));

		advance(Duration::from_millis(10));
		assert_eq!(*log.borrow(), vec!["micro", "early"]);
		assert_eq!(now(), Duration::from_millis(10));

		advance(Duration::from_millis(100));
		assert_eq!(*log.borrow(), vec!["micro", "early", "late"]);
		assert_eq!(pending_timers(), 0);
	}

	#[test]
	fn microtasks_queued_by_microtasks_run_in_the_same_drain() {
		let count = Rc::new(RefCell::new(0));
		let inner = count.clone();
		queue_microtask(move || {
			*inner.borrow_mut() += 1;
			queue_microtask(move || *inner.borrow_mut() += 1);
		});

		assert_eq!(run_microtasks(), 2);
		assert_eq!(*count.borrow(), 2);
	}
}
