use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::runtime::batch::{batch, in_batch, schedule};
use crate::runtime::dependencies::Dependencies;
use crate::runtime::owner::OwnerBody;
use crate::runtime::{hooks, Derived, Evaluation, Invalid, Node, Owner, Role, State};

pub trait Reactive {
	fn update(&self);
}

/// A plain computation or effect. Runs on [`Reaction::update`] and re-runs
/// at the end of a batch whenever something it read has changed.
#[derive(Clone)]
pub struct Reaction {
	pub(crate) body: Rc<ReactionBody>,
	owner: Owner,
}

pub struct ReactionBody {
	pub(crate) inner: RefCell<ReactionInner>,
	role: Role,
	scope: Weak<OwnerBody>,
}

pub struct ReactionInner {
	state: State,
	func: Box<dyn Fn(&Evaluation)>,
	dependencies: Dependencies,
	this: Weak<ReactionBody>,
}

impl Drop for ReactionInner {
	fn drop(&mut self) {
		let refr = self.this.clone() as Weak<dyn Derived>;
		self.dependencies.drop(&refr)
	}
}

impl Reaction {
	#[must_use]
	pub fn new(func: Box<dyn Fn(&Evaluation)>) -> Self {
		Self::create(Role::Computation, None, func)
	}

	#[must_use]
	pub fn new_with_name(name: &str, func: Box<dyn Fn(&Evaluation)>) -> Self {
		Self::create(Role::Computation, Some(name.to_owned()), func)
	}

	#[must_use]
	pub fn effect(name: &str, func: Box<dyn Fn(&Evaluation)>) -> Self {
		Self::create(Role::Effect, Some(name.to_owned()), func)
	}

	fn create(role: Role, name: Option<String>, func: Box<dyn Fn(&Evaluation)>) -> Self {
		let owner = Owner::new(role, name);
		let body = Rc::new_cyclic(|this| ReactionBody {
			inner: RefCell::new(ReactionInner {
				func,
				state: State::Invalid(Invalid::Definitely),
				dependencies: Dependencies::new(),
				this: this.clone(),
			}),
			role,
			scope: Rc::downgrade(owner.rc()),
		});
		owner.set_node(body.clone());

		Reaction { body, owner }
	}

	pub fn update(&self) {
		Reactive::update(&*self.body);
	}

	pub fn owner(&self) -> &Owner {
		&self.owner
	}

	pub fn node(&self) -> Rc<dyn Node> {
		self.body.clone()
	}

	pub fn dispose(&self) {
		self.owner.dispose();
	}
}

impl ReactionBody {
	fn run(&self) {
		let scope = match self.scope.upgrade().map(Owner::from_rc) {
			Some(scope) if !scope.is_disposed() => scope,
			_ => return,
		};

		scope.reset();

		{
			let mut self_mut = self.inner.borrow_mut();
			let this = self_mut.this.clone() as Weak<dyn Derived>;
			let tracker = Evaluation::new(this.clone());
			scope.run(|| (self_mut.func)(&tracker));

			self_mut.dependencies.swap(tracker.take(), &this);
			self_mut.state = State::Valid;
		}

		hooks::after_rerun(&scope);
	}
}

impl Reactive for ReactionBody {
	fn update(&self) {
		let is_valid = {
			let mut self_mut = self.inner.borrow_mut();
			let is_valid = match self_mut.state {
				State::Valid => true,
				State::Invalid(Invalid::Definitely) => false,
				State::Invalid(Invalid::Maybe) => self_mut.dependencies.are_valid(),
			};
			if is_valid {
				self_mut.state = State::Valid;
			}
			is_valid
		};

		if !is_valid {
			self.run();
		}
	}
}

impl Derived for ReactionBody {
	fn invalidate(self: Rc<Self>, invalid: Invalid) {
		{
			let mut self_mut = self.inner.borrow_mut();
			if !matches!(self_mut.state, State::Valid) {
				return;
			}
			self_mut.state = State::Invalid(invalid);
		}

		let this = Rc::downgrade(&self) as Weak<dyn Reactive>;
		if in_batch() {
			schedule(this);
		} else {
			batch(|| schedule(this));
		}
	}

	fn as_node(self: Rc<Self>) -> Rc<dyn Node> {
		self
	}
}

impl Node for ReactionBody {
	fn role(&self) -> Role {
		self.role
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

	// Reactions hold no value, so there is no write to report.
	fn instrument(&self) {}
}

impl std::fmt::Debug for Reaction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Reaction")
			.field("role", &self.body.role)
			.field("name", &self.owner.name())
			.finish()
	}
}
