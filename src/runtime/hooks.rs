//! Extension points a debugger installs into the runtime.
//!
//! One hook set per thread. Hooks are invoked synchronously from inside
//! the runtime and must not re-enter the node that reported them.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::{Node, Owner};

pub type ScopeHook = Box<dyn Fn(&Owner)>;
pub type WriteHook = Box<dyn Fn(&Rc<dyn Node>, &dyn Any, Option<&dyn Any>)>;

#[derive(Default)]
pub struct Hooks {
	/// After a scope was created and attached to its parent.
	pub on_create: Option<ScopeHook>,
	/// After any computation finished re-running, instrumented or not.
	pub on_rerun: Option<ScopeHook>,
	/// After a scope and its subtree were disposed.
	pub on_dispose: Option<ScopeHook>,
	/// Before an instrumented node commits a new value. The previous value
	/// is absent when the write mutated in place.
	pub on_write: Option<WriteHook>,
}

thread_local! {
	static HOOKS: RefCell<Option<Rc<Hooks>>> = RefCell::new(None);
}

/// Installs `hooks`. Returns `false` and leaves the current set in place
/// when hooks are already installed.
pub fn install(hooks: Hooks) -> bool {
	HOOKS.with(|slot| {
		let mut slot = slot.borrow_mut();
		if slot.is_some() {
			return false;
		}
		*slot = Some(Rc::new(hooks));
		true
	})
}

pub fn uninstall() {
	let hooks = HOOKS.with(|slot| slot.borrow_mut().take());
	drop(hooks);
}

pub fn is_installed() -> bool {
	HOOKS.with(|slot| slot.borrow().is_some())
}

fn current() -> Option<Rc<Hooks>> {
	HOOKS.with(|slot| slot.borrow().clone())
}

pub(crate) fn after_create(owner: &Owner) {
	if let Some(hooks) = current() {
		if let Some(hook) = &hooks.on_create {
			hook(owner);
		}
	}
}

pub(crate) fn after_rerun(owner: &Owner) {
	if let Some(hooks) = current() {
		if let Some(hook) = &hooks.on_rerun {
			hook(owner);
		}
	}
}

pub(crate) fn after_dispose(owner: &Owner) {
	if let Some(hooks) = current() {
		if let Some(hook) = &hooks.on_dispose {
			hook(owner);
		}
	}
}

pub(crate) fn before_write(node: &Rc<dyn Node>, value: &dyn Any, prev: Option<&dyn Any>) {
	if let Some(hooks) = current() {
		if let Some(hook) = &hooks.on_write {
			hook(node, value, prev);
		}
	}
}
