//! Single-threaded reactive runtime the devtools engine instruments.
//!
//! Observable cells ([`Var`]), derived computations ([`Computed`]) and
//! plain computations ([`Reaction`]) live inside a tree of scopes
//! ([`Owner`]). Every node exposes itself through the type-erased [`Node`]
//! trait, and the runtime reports creation, re-runs, disposal and writes
//! through [`hooks`].

mod batch;
mod computed;
mod dependencies;
mod element;
mod evaluation;
mod flow;
mod hashed;
pub mod hooks;
mod owner;
mod reaction;
mod var;

use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

pub use batch::{batch, in_batch};
pub use computed::Computed;
pub use dependencies::Dependencies;
pub use element::{Element, View};
pub use evaluation::Evaluation;
pub use flow::{each, show};
pub use owner::{
	component, create_root, hot_component, on_cleanup, provide_context, use_context, ControlFlow,
	Owner,
};
pub(crate) use owner::OwnerBody;
pub use reaction::Reaction;
pub use var::{Toggle, Var};

pub trait Derived: 'static {
	fn invalidate(self: Rc<Self>, invalid: Invalid);

	/// Type-erased introspection handle of this derived node.
	fn as_node(self: Rc<Self>) -> Rc<dyn Node>;
}

pub trait Observable: 'static {
	/// This function is called when we want
	/// this observable to recompute itself.
	fn update(&self) -> Version;

	/// This function should return the current
	/// computed version.
	fn version(&self) -> Version;

	/// Notify this observable that `derived` started
	/// to listen.
	fn used_by(&self, derived: Weak<dyn Derived>);

	/// Notify this observable that `derived` stopped
	/// to listen.
	fn not_used_by(&self, derived: &Weak<dyn Derived>);

	fn as_node(self: Rc<Self>) -> Rc<dyn Node>;
}

/// Introspection surface of a graph node.
///
/// Roles are fixed when the node is created; nothing here re-derives them
/// from the node's shape.
pub trait Node: 'static {
	fn role(&self) -> Role;

	fn name(&self) -> Option<String>;

	/// Scope the node was created in.
	fn owner(&self) -> Option<Owner>;

	/// Scope the node evaluates in. Only computations have one.
	fn scope(&self) -> Option<Owner> {
		None
	}

	/// Dependency edges, in read order.
	fn sources(&self) -> Vec<Rc<dyn Node>> {
		Vec::new()
	}

	/// Dependent edges.
	fn observers(&self) -> Vec<Rc<dyn Node>> {
		Vec::new()
	}

	/// Internal wrapper nodes have no meaningful identity for an observer.
	fn is_transparent(&self) -> bool {
		false
	}

	/// Start reporting writes of this node to [`hooks::Hooks::on_write`].
	/// There is no way back.
	fn instrument(&self);
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
	Root,
	Component,
	Memo,
	Computation,
	Effect,
	Context,
	Refresh,
	Signal,
	Element,
}

impl Role {
	/// Scopes that re-run when their dependencies change.
	pub fn is_computation(self) -> bool {
		matches!(self, Role::Memo | Role::Computation | Role::Effect)
	}

	/// Roles without dependency semantics.
	pub fn is_structural(self) -> bool {
		matches!(
			self,
			Role::Root | Role::Component | Role::Context | Role::Refresh | Role::Element
		)
	}
}

impl std::fmt::Display for Role {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let label = match self {
			Role::Root => "root",
			Role::Component => "component",
			Role::Memo => "memo",
			Role::Computation => "computation",
			Role::Effect => "effect",
			Role::Context => "context",
			Role::Refresh => "refresh",
			Role::Signal => "signal",
			Role::Element => "element",
		};
		f.write_str(label)
	}
}

#[derive(PartialEq, Eq, Clone, Copy)]
pub enum State {
	Valid,
	Invalid(Invalid),
}

#[derive(PartialEq, Eq, Clone, Copy)]
pub enum Invalid {
	Maybe,
	Definitely,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Version {
	Hash(u64),
}
