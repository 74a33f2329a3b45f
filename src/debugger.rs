//! Observer session wiring the runtime hooks to the structure tracker and
//! the dependency graph collector.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::{Collection, Collector, DependencyGraph};
use crate::observer::Observers;
use crate::registry::{Kind, NodeId, Registry};
use crate::runtime::hooks::{self, Hooks};
use crate::runtime::{Node, Owner, OwnerBody};
use crate::scheduler::{Batch, Deadline, Scheduler};
use crate::structure::{Structure, StructureChange, StructureUpdates};
use crate::task;
use crate::walker::{ComputationUpdate, TreeNode, TreeWalkerMode, Walker, STRUCTURE_TAG};

/// Highlight state of a node changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hover {
	pub id: NodeId,
	pub hovered: bool,
}

/// Everything a session hands to its sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum Event {
	StructureUpdates(StructureUpdates),
	/// Computations that re-ran without changing the structure.
	ComputationUpdates(Vec<ComputationUpdate>),
	DependencyGraph(DependencyGraph),
	/// Nodes of the focused graph that changed since the last batch.
	NodeUpdates(Vec<NodeId>),
	HoveredNodes(Vec<Hover>),
}

/// A debugging session attached to the current thread's runtime.
///
/// At most one session exists per thread. Dropping the session detaches
/// it.
pub struct Debugger {
	session: Rc<Session>,
}

struct Focus {
	id: NodeId,
	node: Weak<dyn Node>,
	collection: Collection,
}

struct Session {
	config: Config,
	mode: Cell<TreeWalkerMode>,
	registry: Rc<Registry>,
	observers: Rc<Observers>,
	sink: Box<dyn Fn(Event)>,
	this: Weak<Session>,

	structure: RefCell<Option<Structure>>,
	structure_updates: Scheduler<StructureChange>,
	computation_updates: Scheduler<ComputationUpdate>,

	focus: RefCell<Option<Focus>>,
	refocus_scheduled: Cell<bool>,
	node_updates: Scheduler<()>,
	hovered: Scheduler<()>,
}

impl Debugger {
	/// Attaches to the runtime of the current thread. Fails if another
	/// session is attached.
	pub fn attach(config: Config, sink: impl Fn(Event) + 'static) -> Result<Debugger> {
		if hooks::is_installed() {
			return Err(Error::AlreadyAttached);
		}

		let session = Rc::new_cyclic(|this: &Weak<Session>| {
			let structure_deadline = Deadline::from_millis(config.structure_throttle_ms);
			let node_deadline = Deadline::from_millis(config.node_update_throttle_ms);

			Session {
				mode: Cell::new(config.mode),
				registry: Rc::new(Registry::new()),
				observers: Rc::new(Observers::new()),
				sink: Box::new(sink),
				this: this.clone(),
				structure: RefCell::new(None),
				structure_updates: Scheduler::new(structure_deadline, {
					let this = this.clone();
					move |batch| with_session(&this, |session| session.flush_structure(batch))
				}),
				computation_updates: Scheduler::new(node_deadline, {
					let this = this.clone();
					move |batch: Batch<ComputationUpdate>| {
						with_session(&this, |session| {
							let updates = batch.updates.into_iter().map(|(_, update)| update).collect();
							session.emit(Event::ComputationUpdates(updates));
						})
					}
				}),
				focus: RefCell::new(None),
				refocus_scheduled: Cell::new(false),
				node_updates: Scheduler::new(node_deadline, {
					let this = this.clone();
					move |batch: Batch<()>| {
						with_session(&this, |session| {
							let ids = batch.updates.into_iter().map(|(id, _)| id).collect();
							session.emit(Event::NodeUpdates(ids));
						})
					}
				}),
				hovered: Scheduler::new(Deadline::Microtask, {
					let this = this.clone();
					move |batch: Batch<()>| {
						with_session(&this, |session| {
							let changes = batch
								.toggled
								.into_iter()
								.map(|(id, hovered)| Hover { id, hovered })
								.collect();
							session.emit(Event::HoveredNodes(changes));
						})
					}
				}),
				config,
			}
		});

		if !hooks::install(session.hooks()) {
			return Err(Error::AlreadyAttached);
		}

		tracing::debug!(config = ?session.config, "debugger attached");
		Ok(Debugger { session })
	}

	pub fn config(&self) -> &Config {
		&self.session.config
	}

	pub fn mode(&self) -> TreeWalkerMode {
		self.session.mode.get()
	}

	/// Walks every live root, emits the full structure and keeps it up to
	/// date from now on.
	pub fn enable_structure(&self) {
		let session = &self.session;
		let updates = {
			let mut structure = session.structure.borrow_mut();
			let structure = structure.get_or_insert_with(|| session.new_structure());
			structure.rebuild()
		};
		session.emit(Event::StructureUpdates(updates));
	}

	/// Stops tracking the structure and drops the cached trees.
	pub fn disable_structure(&self) {
		self.session.disable_structure();
	}

	pub fn is_structure_enabled(&self) -> bool {
		self.session.structure.borrow().is_some()
	}

	/// Switches the walker mode, rebuilding the structure if it is tracked.
	pub fn set_mode(&self, mode: TreeWalkerMode) {
		let session = &self.session;
		if session.mode.replace(mode) == mode {
			return;
		}

		let updates = {
			let mut structure = session.structure.borrow_mut();
			match structure.as_mut() {
				Some(structure) => {
					session.observers.unobserve_all(STRUCTURE_TAG);
					session.structure_updates.clear();
					session.computation_updates.clear();
					structure.set_mode(mode);
					Some(structure.rebuild())
				}
				None => None,
			}
		};

		if let Some(updates) = updates {
			session.emit(Event::StructureUpdates(updates));
		}
	}

	/// Cached tree of a top-level root.
	pub fn tree(&self, root_id: NodeId) -> Option<TreeNode> {
		let structure = self.session.structure.borrow();
		structure.as_ref()?.tree(root_id).cloned()
	}

	/// Collects and emits the dependency graph of the node behind `id`,
	/// replacing the previous focus. Stale ids give an empty graph.
	pub fn focus(&self, id: NodeId) -> Result<DependencyGraph> {
		self.session.focus(id)
	}

	pub fn blur(&self) {
		self.session.blur();
	}

	pub fn focused(&self) -> Option<NodeId> {
		self.session.focus.borrow().as_ref().map(|focus| focus.id)
	}

	/// Reports a node as highlighted or not. Opposite changes within one
	/// turn cancel out.
	pub fn hover(&self, id: NodeId, hovered: bool) {
		self.session.hovered.toggle(id, hovered);
	}

	/// Id of a scope.
	pub fn scope_id(&self, owner: &Owner) -> NodeId {
		self.session.registry.identify(owner.rc(), Kind::Owner)
	}

	/// Id of a graph node, as used in dependency graphs.
	pub fn node_id(&self, node: &Rc<dyn Node>) -> Option<NodeId> {
		self.session.collector().id_of(node)
	}

	pub fn registry(&self) -> &Registry {
		&self.session.registry
	}

	pub fn observers(&self) -> &Observers {
		&self.session.observers
	}

	/// Detaches the session. Equivalent to dropping it.
	pub fn detach(self) {}
}

impl Drop for Debugger {
	fn drop(&mut self) {
		let session = &self.session;
		hooks::uninstall();
		session.blur();
		session.disable_structure();
		session.hovered.clear();
		session.observers.clear();
		session.registry.sweep();
		tracing::debug!("debugger detached");
	}
}

fn with_session(this: &Weak<Session>, func: impl FnOnce(&Session)) {
	if let Some(session) = this.upgrade() {
		func(&session);
	}
}

impl Session {
	fn hooks(&self) -> Hooks {
		let on_rerun = {
			let observers = Rc::downgrade(&self.observers);
			move |owner: &Owner| {
				if let Some(observers) = observers.upgrade() {
					observers.computation_rerun(owner);
				}
			}
		};
		let on_write = {
			let observers = Rc::downgrade(&self.observers);
			move |node: &Rc<dyn Node>, value: &dyn std::any::Any, prev: Option<&dyn std::any::Any>| {
				if let Some(observers) = observers.upgrade() {
					observers.value_written(node, value, prev);
				}
			}
		};
		let on_create = {
			let this = self.this.clone();
			move |owner: &Owner| with_session(&this, |session| session.scope_created(owner))
		};
		let on_dispose = {
			let this = self.this.clone();
			move |owner: &Owner| with_session(&this, |session| session.scope_disposed(owner))
		};

		Hooks {
			on_create: Some(Box::new(on_create)),
			on_rerun: Some(Box::new(on_rerun)),
			on_dispose: Some(Box::new(on_dispose)),
			on_write: Some(Box::new(on_write)),
		}
	}

	fn emit(&self, event: Event) {
		(self.sink)(event);
	}

	fn collector(&self) -> Collector {
		Collector::new(self.registry.clone(), self.observers.clone())
			.prune_frozen_memos(self.config.prune_frozen_memos)
	}

	fn new_structure(&self) -> Structure {
		let this = self.this.clone();
		let walker = Walker::new(self.registry.clone(), self.observers.clone(), move |update| {
			with_session(&this, |session| session.computation_updated(update))
		})
		.with_mode(self.mode.get())
		.mark_frozen(self.config.mark_frozen)
		.rendered_reruns_restructure(self.config.rendered_reruns_restructure);

		Structure::new(walker, self.registry.clone())
	}

	fn is_tracking_structure(&self) -> bool {
		// Hooks may fire while the structure is being walked.
		match self.structure.try_borrow() {
			Ok(structure) => structure.is_some(),
			Err(_) => true,
		}
	}

	fn scope_created(&self, owner: &Owner) {
		if !self.is_tracking_structure() {
			return;
		}

		let target = match owner.parent() {
			Some(parent) => parent,
			None if owner.is_top_level() => owner.clone(),
			None => return,
		};
		let id = self.registry.identify(target.rc(), Kind::Owner);
		self.structure_updates.push(id, StructureChange::Update);
	}

	fn scope_disposed(&self, owner: &Owner) {
		if !self.is_tracking_structure() {
			return;
		}

		if owner.is_top_level() {
			let id = self.registry.identify(owner.rc(), Kind::Owner);
			self.structure_updates.push(id, StructureChange::RemoveRoot);
		} else if let Some(parent) = owner.parent() {
			let id = self.registry.identify(parent.rc(), Kind::Owner);
			self.structure_updates.push(id, StructureChange::Update);
		}
	}

	fn computation_updated(&self, update: ComputationUpdate) {
		if update.changed_structure {
			self.structure_updates.push(update.id, StructureChange::Update);
		} else {
			self.computation_updates.push(update.id, update);
		}
	}

	fn flush_structure(&self, batch: Batch<StructureChange>) {
		let updates = {
			let mut structure = self.structure.borrow_mut();
			match structure.as_mut() {
				Some(structure) => structure.update(batch.updates),
				None => return,
			}
		};
		// Walks only add observers; drop the ones of scopes disposed since.
		self.observers.sweep();

		if !updates.is_empty() {
			self.emit(Event::StructureUpdates(updates));
		}
	}

	fn disable_structure(&self) {
		self.structure_updates.clear();
		self.computation_updates.clear();
		self.observers.unobserve_all(STRUCTURE_TAG);
		self.structure.borrow_mut().take();
	}

	fn focus(&self, id: NodeId) -> Result<DependencyGraph> {
		self.blur();

		if self.registry.contains(&id, Kind::Element) {
			return Err(Error::InvalidFocus {
				id,
				role: crate::runtime::Role::Element,
			});
		}

		let node = match self
			.registry
			.resolve::<OwnerBody>(&id, Kind::Owner)
			.map(Owner::from_rc)
		{
			Some(owner) if !owner.role().is_computation() => {
				return Err(Error::InvalidFocus {
					id,
					role: owner.role(),
				});
			}
			Some(owner) => owner.node(),
			None => self.registry.resolve::<dyn Node>(&id, Kind::Signal),
		};

		let node = match node {
			Some(node) => node,
			None => {
				tracing::debug!(%id, "focused a node that no longer exists");
				let graph = DependencyGraph::new();
				self.emit(Event::DependencyGraph(graph.clone()));
				return Ok(graph);
			}
		};

		let collection = self.collect(&node);
		let graph = collection.graph.clone();
		tracing::debug!(%id, nodes = graph.len(), "focused");

		*self.focus.borrow_mut() = Some(Focus {
			id,
			node: Rc::downgrade(&node),
			collection,
		});
		self.emit(Event::DependencyGraph(graph.clone()));
		Ok(graph)
	}

	fn collect(&self, node: &Rc<dyn Node>) -> Collection {
		let this = self.this.clone();
		self.collector().collect(node, move |id| {
			with_session(&this, |session| session.node_changed(id))
		})
	}

	fn blur(&self) {
		let focus = self.focus.borrow_mut().take();
		if let Some(focus) = focus {
			focus.collection.release();
			self.observers.sweep();
		}
		self.node_updates.clear();
	}

	fn node_changed(&self, id: NodeId) {
		self.node_updates.push(id, ());

		let reran = match self.focus.try_borrow() {
			Ok(focus) => focus
				.as_ref()
				.and_then(|focus| focus.collection.graph.get(&id))
				.map_or(false, |node| node.role.is_computation()),
			Err(_) => false,
		};

		if reran && !self.refocus_scheduled.replace(true) {
			let this = self.this.clone();
			task::queue_microtask(move || with_session(&this, Session::refocus));
		}
	}

	/// Collects the focused graph again after a computation in it re-ran,
	/// emitting it when its shape changed.
	fn refocus(&self) {
		self.refocus_scheduled.set(false);

		let (id, node) = match self.focus.borrow().as_ref() {
			Some(focus) => (focus.id, focus.node.upgrade()),
			None => return,
		};

		let previous = self.focus.borrow_mut().take();
		let previous = match previous {
			Some(previous) => {
				previous.collection.release();
				previous.collection.graph.clone()
			}
			None => return,
		};

		let node = match node {
			Some(node) => node,
			None => {
				self.emit(Event::DependencyGraph(DependencyGraph::new()));
				return;
			}
		};

		let collection = self.collect(&node);
		let changed = collection.graph != previous;
		let graph = changed.then(|| collection.graph.clone());
		*self.focus.borrow_mut() = Some(Focus {
			id,
			node: Rc::downgrade(&node),
			collection,
		});

		if let Some(graph) = graph {
			tracing::debug!(%id, nodes = graph.len(), "focused graph changed");
			self.emit(Event::DependencyGraph(graph));
		}
	}
}
