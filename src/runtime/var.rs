use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use crate::addr::WeakAddr;
use crate::runtime::hashed::Hashed;
use crate::runtime::owner::OwnerBody;
use crate::runtime::{batch, hooks, Computed, Derived, Evaluation, Invalid, Node, Observable, Owner, Role, Version};

/// An observable cell.
pub struct Var<T> {
	body: Rc<VarBody<T>>,
}

pub struct VarBody<T> {
	value: RefCell<Hashed<T>>,
	inner: RefCell<VarInner<T>>,
	name: Option<String>,
	owner: Option<Weak<OwnerBody>>,
	instrumented: Cell<bool>,
}

struct VarInner<T> {
	used_by: BTreeSet<WeakAddr<dyn Derived>>,
	this: Weak<VarBody<T>>,
}

impl<T> Clone for Var<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Default for Var<T>
where
	T: Default + Hash + 'static,
{
	fn default() -> Self {
		Var::new(Default::default())
	}
}

pub trait Toggle {
	fn toggle(&mut self);
}

impl Toggle for bool {
	fn toggle(&mut self) {
		*self = !*self
	}
}

impl<T> Var<T>
where
	T: 'static,
{
	pub fn new(value: T) -> Self
	where
		T: Hash,
	{
		Var::with_name(None, value)
	}

	pub fn named(name: &str, value: T) -> Self
	where
		T: Hash,
	{
		Var::with_name(Some(name.to_owned()), value)
	}

	fn with_name(name: Option<String>, value: T) -> Self
	where
		T: Hash,
	{
		let owner = Owner::current().map(|owner| Rc::downgrade(owner.rc()));
		Var {
			body: Rc::new_cyclic(|this| VarBody {
				value: RefCell::new(Hashed::new(value)),
				inner: RefCell::new(VarInner {
					used_by: BTreeSet::new(),
					this: this.clone(),
				}),
				name,
				owner,
				instrumented: Cell::new(false),
			}),
		}
	}

	pub fn map<F, R>(&self, func: F) -> Computed<R>
	where
		F: Fn(&T) -> R + 'static,
		R: Hash + 'static,
	{
		let this = self.body.clone();
		Computed::new(Box::new(move |ev| {
			let value = this.get(ev);
			func(&*value)
		}))
	}

	/// Introspection handle of this cell.
	pub fn node(&self) -> Rc<dyn Node> {
		self.body.clone()
	}

	#[inline]
	pub fn get(&self, eval: &impl AsRef<Evaluation>) -> Ref<'_, T> {
		self.body.get(eval.as_ref())
	}

	#[inline]
	pub fn get_once(&self) -> Ref<'_, T> {
		self.body.get_once()
	}

	#[inline]
	pub fn set(&self, value: T)
	where
		T: Hash,
	{
		self.body.set(value)
	}

	#[inline]
	pub fn toggle(&self)
	where
		T: Toggle + Hash,
	{
		self.update(T::toggle)
	}

	#[inline]
	pub fn replace(&self, value: T) -> T
	where
		T: Hash,
	{
		self.body.replace(value)
	}

	#[inline]
	pub fn update(&self, func: impl FnOnce(&mut T))
	where
		T: Hash,
	{
		self.body.update(func)
	}
}

impl<T: 'static> VarBody<T> {
	pub fn get_once(&self) -> Ref<'_, T> {
		Ref::map(self.value.borrow(), |s| &s.value)
	}

	pub fn get<'a>(&'a self, eval: &'_ Evaluation) -> Ref<'a, T> {
		let value = self.value.borrow();

		{
			let mut self_mut = self.inner.borrow_mut();
			if let Some(this) = self_mut.this.upgrade() {
				eval.based_on(this, value.version());
			}
			self_mut.used_by(eval.parent());
		}

		Ref::map(value, |v| &v.value)
	}

	pub fn update(&self, func: impl FnOnce(&mut T))
	where
		T: Hash,
	{
		let changed = {
			let mut value = self.value.borrow_mut();
			func(&mut value.value);
			let hash = fxhash::hash64(&value.value);
			std::mem::replace(&mut value.hash, hash) != hash
		};

		if changed {
			self.before_write(&self.value.borrow().value, None);
			self.invalidate()
		}
	}

	pub fn replace(&self, value: T) -> T
	where
		T: Hash,
	{
		let new = Hashed::new(value);
		let changed = self.value.borrow().hash != new.hash;

		if changed {
			let current = self.value.borrow();
			self.before_write(&new.value, Some(&current.value));
		}

		let old = std::mem::replace(&mut *self.value.borrow_mut(), new);
		if changed {
			self.invalidate();
		}

		old.value
	}

	pub fn set(&self, value: T)
	where
		T: Hash,
	{
		let _ = self.replace(value);
	}

	fn before_write(&self, value: &T, prev: Option<&T>) {
		if !self.instrumented.get() {
			return;
		}

		let this = self.inner.borrow().this.upgrade();
		if let Some(this) = this {
			let node: Rc<dyn Node> = this;
			hooks::before_write(&node, value, prev.map(|prev| prev as &dyn Any));
		}
	}

	fn invalidate(&self) {
		let used_by: Vec<_> = {
			let mut self_mut = self.inner.borrow_mut();
			self_mut.used_by.retain(|item| item.is_alive());
			self_mut.used_by.iter().filter_map(|item| item.upgrade()).collect()
		};

		batch(|| {
			for item in used_by {
				item.invalidate(Invalid::Definitely)
			}
		});
	}

	fn used_by(&self, derived: Weak<dyn Derived>) {
		self.inner.borrow_mut().used_by(derived);
	}

	fn not_used_by(&self, derived: &Weak<dyn Derived>) {
		self.inner.borrow_mut().not_used_by(derived);
	}
}

impl<T> VarInner<T> {
	pub fn used_by(&mut self, derived: Weak<dyn Derived>) {
		self.used_by.insert(WeakAddr::new(derived));
	}

	pub fn not_used_by(&mut self, derived: &Weak<dyn Derived>) {
		self.used_by.remove(&WeakAddr::new(derived.clone()));
	}
}

impl<T: 'static> Observable for VarBody<T> {
	fn version(&self) -> Version {
		self.value.borrow().version()
	}

	fn update(&self) -> Version {
		self.version()
	}

	fn used_by(&self, derived: Weak<dyn Derived>) {
		VarBody::used_by(self, derived)
	}

	fn not_used_by(&self, derived: &Weak<dyn Derived>) {
		VarBody::not_used_by(self, derived)
	}

	fn as_node(self: Rc<Self>) -> Rc<dyn Node> {
		self
	}
}

impl<T: 'static> Node for VarBody<T> {
	fn role(&self) -> Role {
		Role::Signal
	}

	fn name(&self) -> Option<String> {
		self.name.clone()
	}

	fn owner(&self) -> Option<Owner> {
		self.owner
			.as_ref()
			.and_then(Weak::upgrade)
			.map(Owner::from_rc)
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

	fn instrument(&self) {
		self.instrumented.set(true);
	}
}

impl<T> Hash for Var<T>
where
	T: Hash,
{
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		state.write_u64(self.body.value.borrow().hash);
	}
}

impl<T> Debug for Var<T>
where
	T: 'static + Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.get_once().fmt(f)
	}
}
