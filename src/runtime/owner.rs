use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::runtime::element::View;
use crate::runtime::{hooks, Node, Role};

/// Internal shape of a control-flow component, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
	/// A condition memo followed by a value memo.
	Show,
	/// A single memo mapping a collection.
	For,
}

/// A computation scope.
#[derive(Clone)]
pub struct Owner {
	body: Rc<OwnerBody>,
}

pub(crate) struct OwnerBody {
	role: Role,
	name: Option<String>,
	flow: Option<ControlFlow>,
	parent: Option<Weak<OwnerBody>>,
	disposed: Cell<bool>,
	inner: RefCell<OwnerInner>,
}

#[derive(Default)]
struct OwnerInner {
	owned: Vec<Owner>,
	sub_roots: Vec<Owner>,
	node: Option<Rc<dyn Node>>,
	rendered: View,
	context: Option<Rc<dyn Any>>,
	cleanups: Vec<Box<dyn FnOnce()>>,
}

thread_local! {
	static CURRENT: RefCell<Option<Owner>> = RefCell::new(None);
	static ROOTS: RefCell<Vec<Owner>> = RefCell::new(Vec::new());
}

impl Owner {
	pub(crate) fn new(role: Role, name: Option<String>) -> Owner {
		Owner::with_flow(role, name, None)
	}

	/// Creates a scope under the current one. Roots created inside another
	/// scope become its sub-roots; roots created outside any scope join
	/// the live root list.
	pub(crate) fn with_flow(role: Role, name: Option<String>, flow: Option<ControlFlow>) -> Owner {
		let parent = Owner::current();
		let owner = Owner {
			body: Rc::new(OwnerBody {
				role,
				name,
				flow,
				parent: parent.as_ref().map(|p| Rc::downgrade(&p.body)),
				disposed: Cell::new(false),
				inner: RefCell::new(OwnerInner::default()),
			}),
		};

		match (&parent, role) {
			(None, Role::Root) => ROOTS.with(|roots| roots.borrow_mut().push(owner.clone())),
			(Some(parent), Role::Root) => parent.body.inner.borrow_mut().sub_roots.push(owner.clone()),
			(Some(parent), _) => parent.body.inner.borrow_mut().owned.push(owner.clone()),
			(None, _) => {}
		}

		hooks::after_create(&owner);
		owner
	}

	pub(crate) fn from_rc(body: Rc<OwnerBody>) -> Owner {
		Owner { body }
	}

	pub(crate) fn rc(&self) -> &Rc<OwnerBody> {
		&self.body
	}

	/// Scope the caller currently runs in.
	pub fn current() -> Option<Owner> {
		CURRENT.with(|current| current.borrow().clone())
	}

	/// Live top-level roots.
	pub fn roots() -> Vec<Owner> {
		ROOTS.with(|roots| roots.borrow().clone())
	}

	/// Runs `func` with this scope as the current one.
	pub fn run<R>(&self, func: impl FnOnce() -> R) -> R {
		let prev = CURRENT.with(|current| current.replace(Some(self.clone())));
		let result = func();
		CURRENT.with(|current| *current.borrow_mut() = prev);
		result
	}

	pub fn role(&self) -> Role {
		self.body.role
	}

	pub fn name(&self) -> Option<&str> {
		self.body.name.as_deref()
	}

	pub fn control_flow(&self) -> Option<ControlFlow> {
		self.body.flow
	}

	pub fn parent(&self) -> Option<Owner> {
		self.body
			.parent
			.as_ref()
			.and_then(Weak::upgrade)
			.map(Owner::from_rc)
	}

	/// Whether this is a top-level root, i.e. not a sub-root.
	pub fn is_top_level(&self) -> bool {
		self.body.role == Role::Root && self.body.parent.is_none()
	}

	/// Top-level root this scope belongs to, following sub-root attachments.
	pub fn top(&self) -> Owner {
		let mut top = self.clone();
		while let Some(parent) = top.parent() {
			top = parent;
		}
		top
	}

	pub fn owned(&self) -> Vec<Owner> {
		self.body.inner.borrow().owned.clone()
	}

	pub fn sub_roots(&self) -> Vec<Owner> {
		self.body.inner.borrow().sub_roots.clone()
	}

	/// Owned children followed by attached sub-roots.
	pub fn children(&self) -> Vec<Owner> {
		let inner = self.body.inner.borrow();
		inner.owned.iter().chain(&inner.sub_roots).cloned().collect()
	}

	pub fn is_leaf(&self) -> bool {
		let inner = self.body.inner.borrow();
		inner.owned.is_empty() && inner.sub_roots.is_empty()
	}

	pub fn is_disposed(&self) -> bool {
		self.body.disposed.get()
	}

	/// The computation evaluating in this scope, if any.
	pub fn node(&self) -> Option<Rc<dyn Node>> {
		self.body.inner.try_borrow().ok()?.node.clone()
	}

	pub(crate) fn set_node(&self, node: Rc<dyn Node>) {
		self.body.inner.borrow_mut().node = Some(node);
	}

	/// Elements produced by the last run of a component.
	pub fn rendered(&self) -> View {
		self.body.inner.borrow().rendered.clone()
	}

	pub(crate) fn set_rendered(&self, view: View) {
		self.body.inner.borrow_mut().rendered = view;
	}

	fn context(&self) -> Option<Rc<dyn Any>> {
		self.body.inner.borrow().context.clone()
	}

	pub fn ptr_eq(&self, other: &Owner) -> bool {
		Rc::ptr_eq(&self.body, &other.body)
	}

	pub fn on_cleanup(&self, func: impl FnOnce() + 'static) {
		self.body.inner.borrow_mut().cleanups.push(Box::new(func));
	}

	/// Disposes children and runs cleanups ahead of a re-run.
	pub(crate) fn reset(&self) {
		self.dispose_children();
		let cleanups = std::mem::take(&mut self.body.inner.borrow_mut().cleanups);
		for cleanup in cleanups.into_iter().rev() {
			cleanup();
		}
	}

	fn dispose_children(&self) {
		let (owned, sub_roots) = {
			let mut inner = self.body.inner.borrow_mut();
			(
				std::mem::take(&mut inner.owned),
				std::mem::take(&mut inner.sub_roots),
			)
		};

		for child in owned.iter().chain(&sub_roots) {
			child.dispose();
		}
	}

	/// Disposes the scope with its whole subtree and detaches it from its
	/// parent. Disposing twice is a no-op.
	pub fn dispose(&self) {
		if self.body.disposed.replace(true) {
			return;
		}

		self.reset();
		let node = self.body.inner.borrow_mut().node.take();
		drop(node);

		match self.parent() {
			Some(parent) => {
				let mut inner = parent.body.inner.borrow_mut();
				inner.owned.retain(|child| !child.ptr_eq(self));
				inner.sub_roots.retain(|child| !child.ptr_eq(self));
			}
			None => ROOTS.with(|roots| roots.borrow_mut().retain(|root| !root.ptr_eq(self))),
		}

		tracing::trace!(role = %self.role(), name = ?self.name(), "scope disposed");
		hooks::after_dispose(self);
	}
}

impl std::fmt::Debug for Owner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Owner")
			.field("role", &self.body.role)
			.field("name", &self.body.name)
			.field("disposed", &self.body.disposed.get())
			.finish()
	}
}

/// Creates a root scope and runs `func` in it.
pub fn create_root<R>(name: &str, func: impl FnOnce(&Owner) -> R) -> R {
	let owner = Owner::new(Role::Root, Some(name.to_owned()));
	owner.run(|| func(&owner))
}

/// Runs a component body untracked in its own scope and records its view.
pub fn component(name: &str, func: impl FnOnce() -> View) -> View {
	render_component(name, None, func)
}

pub(crate) fn render_component(
	name: &str,
	flow: Option<ControlFlow>,
	func: impl FnOnce() -> View,
) -> View {
	let owner = Owner::with_flow(Role::Component, Some(name.to_owned()), flow);
	let view = owner.run(func);
	owner.set_rendered(view.clone());
	view
}

/// A component whose body lives behind a hot-reload boundary.
pub fn hot_component(name: &str, func: impl FnOnce() -> View) -> View {
	component(name, || {
		let refresh = Owner::new(Role::Refresh, Some(name.to_owned()));
		refresh.run(func)
	})
}

pub fn provide_context<T: 'static, R>(value: T, func: impl FnOnce() -> R) -> R {
	let name = std::any::type_name::<T>().rsplit("::").next().map(str::to_owned);
	let owner = Owner::new(Role::Context, name);
	owner.body.inner.borrow_mut().context = Some(Rc::new(value));
	owner.run(func)
}

pub fn use_context<T: Clone + 'static>() -> Option<T> {
	let mut cursor = Owner::current();
	while let Some(owner) = cursor {
		if let Some(value) = owner.context().and_then(|c| c.downcast_ref::<T>().cloned()) {
			return Some(value);
		}
		cursor = owner.parent();
	}
	None
}

/// Registers `func` to run when the current scope re-runs or is disposed.
pub fn on_cleanup(func: impl FnOnce() + 'static) {
	if let Some(owner) = Owner::current() {
		owner.on_cleanup(func);
	}
}
