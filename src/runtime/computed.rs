use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use crate::addr::WeakAddr;
use crate::runtime::batch::{batch, in_batch, schedule};
use crate::runtime::dependencies::Dependencies;
use crate::runtime::hashed::Hashed;
use crate::runtime::owner::OwnerBody;
use crate::runtime::reaction::Reactive;
use crate::runtime::{hooks, Derived, Evaluation, Invalid, Node, Observable, Owner, Role, State, Version};

/// A derived computation: a scope whose runs produce an observable value.
pub struct Computed<T>
where
	T: Hash + 'static,
{
	body: Rc<ComputedBody<T>>,
	owner: Owner,
}

impl<T> Clone for Computed<T>
where
	T: Hash,
{
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
			owner: self.owner.clone(),
		}
	}
}

pub struct ComputedBody<T>
where
	T: Hash + 'static,
{
	value: RefCell<Option<Hashed<T>>>,
	inner: RefCell<ComputedInner<T>>,
	scope: Weak<OwnerBody>,
	transparent: bool,
	instrumented: Cell<bool>,
}

pub struct ComputedInner<T>
where
	T: Hash + 'static,
{
	func: Box<dyn Fn(&Evaluation) -> T>,
	state: State,
	used_by: BTreeSet<WeakAddr<dyn Derived>>,
	dependencies: Dependencies,
	this: Weak<ComputedBody<T>>,
}

impl<T> Drop for ComputedInner<T>
where
	T: Hash + 'static,
{
	fn drop(&mut self) {
		let refr = self.this.clone() as Weak<dyn Derived>;
		self.dependencies.drop(&refr);
	}
}

impl<T> Computed<T>
where
	T: Hash + 'static,
{
	pub fn new(func: Box<dyn Fn(&Evaluation) -> T>) -> Self {
		Self::create(None, false, func)
	}

	pub fn named(name: &str, func: Box<dyn Fn(&Evaluation) -> T>) -> Self {
		Self::create(Some(name.to_owned()), false, func)
	}

	/// An internal wrapper memo. Dependency graphs leave it out together
	/// with everything it reads, and structure trees hoist its children.
	pub fn new_transparent(func: Box<dyn Fn(&Evaluation) -> T>) -> Self {
		Self::create(None, true, func)
	}

	fn create(name: Option<String>, transparent: bool, func: Box<dyn Fn(&Evaluation) -> T>) -> Self {
		let owner = Owner::new(Role::Memo, name);
		let body = Rc::new_cyclic(|this| ComputedBody {
			value: RefCell::new(None),
			inner: RefCell::new(ComputedInner {
				func,
				state: State::Invalid(Invalid::Definitely),
				used_by: BTreeSet::new(),
				dependencies: Dependencies::new(),
				this: this.clone(),
			}),
			scope: Rc::downgrade(owner.rc()),
			transparent,
			instrumented: Cell::new(false),
		});

		owner.set_node(body.clone());
		body.refresh();

		Computed { body, owner }
	}

	#[inline]
	pub fn get_once(&self) -> Ref<'_, T> {
		self.body.get_once()
	}

	#[inline]
	pub fn get<'a>(&'a self, cx: &'a impl AsRef<Evaluation>) -> Ref<'a, T> {
		self.body.get(cx.as_ref())
	}

	pub fn owner(&self) -> &Owner {
		&self.owner
	}

	pub fn node(&self) -> Rc<dyn Node> {
		self.body.clone()
	}
}

impl<T> ComputedBody<T>
where
	T: Hash + 'static,
{
	pub fn get_once(&self) -> Ref<'_, T> {
		self.refresh();
		self.value_ref()
	}

	pub fn get<'a>(&'a self, eval: &'_ Evaluation) -> Ref<'a, T> {
		self.refresh();
		{
			let mut self_mut = self.inner.borrow_mut();
			if let Some(this) = self_mut.this.upgrade() {
				eval.based_on(this, self.version());
			}
			self_mut.used_by(eval.parent());
		}
		self.value_ref()
	}

	fn value_ref(&self) -> Ref<'_, T> {
		Ref::map(self.value.borrow(), |s| {
			&s.as_ref()
				.expect("memo is evaluated when it is created")
				.value
		})
	}

	pub(crate) fn used_by(&self, observable: Weak<dyn Derived>) {
		self.inner.borrow_mut().used_by(observable);
	}

	fn not_used_by(&self, derived: &Weak<dyn Derived>) {
		self.inner.borrow_mut().not_used_by(derived);
	}

	/// Brings the value up to date, re-running only when a dependency
	/// actually changed.
	fn refresh(&self) {
		let must_run = {
			let mut inner_mut = self.inner.borrow_mut();
			match inner_mut.state {
				State::Valid => false,
				State::Invalid(Invalid::Definitely) => true,
				State::Invalid(Invalid::Maybe) => {
					let is_valid = inner_mut.dependencies.are_valid();
					if is_valid {
						inner_mut.state = State::Valid;
					}
					!is_valid
				}
			}
		};

		if must_run {
			self.run();
		}
	}

	fn run(&self) {
		let scope = match self.scope.upgrade().map(Owner::from_rc) {
			Some(scope) if !scope.is_disposed() => scope,
			_ => return,
		};

		scope.reset();

		let value = {
			let mut inner_mut = self.inner.borrow_mut();
			let this = inner_mut.this.clone() as Weak<dyn Derived>;
			let evaluation = Evaluation::new(this.clone());
			let value = scope.run(|| (inner_mut.func)(&evaluation));
			inner_mut.state = State::Valid;
			inner_mut.dependencies.swap(evaluation.take(), &this);
			Hashed::new(value)
		};

		if self.instrumented.get() {
			let this = self.inner.borrow().this.upgrade();
			if let Some(this) = this {
				let node: Rc<dyn Node> = this;
				let prev = self.value.borrow();
				let prev = prev.as_ref().map(|prev| &prev.value as &dyn Any);
				hooks::before_write(&node, &value.value, prev);
			}
		}

		*self.value.borrow_mut() = Some(value);
		hooks::after_rerun(&scope);
	}
}

impl<T> ComputedInner<T>
where
	T: Hash + 'static,
{
	pub(crate) fn used_by(&mut self, observable: Weak<dyn Derived>) {
		self.used_by.insert(WeakAddr::new(observable));
	}

	fn not_used_by(&mut self, derived: &Weak<dyn Derived>) {
		self.used_by.remove(&WeakAddr::new(derived.clone()));
	}
}

impl<T> Observable for ComputedBody<T>
where
	T: Hash + 'static,
{
	fn update(&self) -> Version {
		self.refresh();
		self.version()
	}

	fn version(&self) -> Version {
		self.value
			.borrow()
			.as_ref()
			.map_or(Version::Hash(0), Hashed::version)
	}

	fn used_by(&self, derived: Weak<dyn Derived>) {
		ComputedBody::used_by(self, derived)
	}

	fn not_used_by(&self, derived: &Weak<dyn Derived>) {
		ComputedBody::not_used_by(self, derived)
	}

	fn as_node(self: Rc<Self>) -> Rc<dyn Node> {
		self
	}
}

impl<T> Reactive for ComputedBody<T>
where
	T: Hash + 'static,
{
	fn update(&self) {
		self.refresh();
	}
}

impl<T> Derived for ComputedBody<T>
where
	T: Hash + 'static,
{
	fn invalidate(self: Rc<Self>, invalid: Invalid) {
		let used_by: Vec<_> = {
			let mut self_mut = self.inner.borrow_mut();
			if !matches!(self_mut.state, State::Valid) {
				return;
			}
			self_mut.state = State::Invalid(invalid);
			self_mut.used_by.retain(|item| item.is_alive());
			self_mut.used_by.iter().filter_map(|item| item.upgrade()).collect()
		};

		// Nobody will read it, so it refreshes itself when the batch ends.
		if used_by.is_empty() {
			let this = Rc::downgrade(&self) as Weak<dyn Reactive>;
			if in_batch() {
				schedule(this);
			} else {
				batch(|| schedule(this));
			}
			return;
		}

		for item in used_by {
			item.invalidate(Invalid::Maybe);
		}
	}

	fn as_node(self: Rc<Self>) -> Rc<dyn Node> {
		self
	}
}

impl<T> Node for ComputedBody<T>
where
	T: Hash + 'static,
{
	fn role(&self) -> Role {
		Role::Memo
	}

	fn name(&self) -> Option<String> {
		self.scope()?.name().map(str::to_owned)
	}

	fn owner(&self) -> Option<Owner> {
		self.scope()?.parent()
	}

	fn scope(&self) -> Option<Owner> {
		self.scope.upgrade().map(Owner::from_rc)
	}

	fn sources(&self) -> Vec<Rc<dyn Node>> {
		self.inner
			.try_borrow()
			.map(|inner| inner.dependencies.nodes())
			.unwrap_or_default()
	}

	fn observers(&self) -> Vec<Rc<dyn Node>> {
		match self.inner.try_borrow() {
			Ok(inner) => inner
				.used_by
				.iter()
				.filter_map(|item| item.upgrade())
				.map(|item| item.as_node())
				.collect(),
			Err(_) => Vec::new(),
		}
	}

	fn is_transparent(&self) -> bool {
		self.transparent
	}

	fn instrument(&self) {
		self.instrumented.set(true);
	}
}

impl<T> Debug for Computed<T>
where
	T: Hash + Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.get_once().fmt(f)
	}
}
