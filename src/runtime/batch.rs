use std::cell::{Cell, RefCell};
use std::rc::Weak;

use crate::runtime::reaction::Reactive;

thread_local! {
	static STARTED: Cell<bool> = Cell::new(false);
	static CHANGED: RefCell<Vec<Weak<dyn Reactive>>> = RefCell::new(Vec::new());
}

pub fn in_batch() -> bool {
	STARTED.with(|s| s.get())
}

/// Runs `func` with reaction re-runs deferred until the outermost batch
/// finishes.
pub fn batch<R>(func: impl FnOnce() -> R) -> R {
	let is_root = batch_start();
	let result = func();
	if is_root {
		batch_stop();
		batch_run();
	}
	result
}

pub(crate) fn schedule(reaction: Weak<dyn Reactive>) {
	CHANGED.with(|changed| changed.borrow_mut().push(reaction));
}

fn batch_start() -> bool {
	STARTED.with(|s| !s.replace(true))
}

fn batch_stop() {
	STARTED.with(|s| s.set(false));
}

fn batch_run() {
	loop {
		let changed = CHANGED.with(|changed| std::mem::take(&mut *changed.borrow_mut()));

		if changed.is_empty() {
			break;
		}

		for reaction in changed {
			if let Some(reactive) = reaction.upgrade() {
				reactive.update();
			}
		}
	}
}
