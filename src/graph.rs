//! Dependency neighborhood of a focused node.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::addr::thin;
use crate::observer::Observers;
use crate::registry::{Kind, NodeId, Registry};
use crate::runtime::{Node, Owner, OwnerBody, Role};
use crate::walker::UNNAMED;

pub const GRAPH_TAG: &str = "dependency-graph";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
	pub name: String,
	#[serde(rename = "type")]
	pub role: Role,
	/// Scope-nesting distance from the nearest root.
	pub depth: u32,
	/// Nodes this one read, in read order. Only computations have them.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sources: Option<Vec<NodeId>>,
	/// Nodes reading this one. Only cells and memos have them.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dependents: Option<Vec<NodeId>>,
	/// Scope the node was created in.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub owner: Option<NodeId>,
}

pub type DependencyGraph = BTreeMap<NodeId, GraphNode>;

enum Installed {
	Value(Weak<dyn Node>),
	Rerun(Weak<OwnerBody>),
}

/// A collected graph together with the observers keeping it live.
pub struct Collection {
	pub graph: DependencyGraph,
	observers: Weak<Observers>,
	installed: RefCell<Vec<Installed>>,
}

impl Collection {
	fn empty(observers: &Rc<Observers>) -> Self {
		Collection {
			graph: DependencyGraph::new(),
			observers: Rc::downgrade(observers),
			installed: RefCell::new(Vec::new()),
		}
	}

	/// Removes every observer installed by the collection. Nodes the runtime
	/// disposed in the meantime are skipped. Safe to call more than once.
	pub fn release(&self) {
		let installed = std::mem::take(&mut *self.installed.borrow_mut());
		let observers = match self.observers.upgrade() {
			Some(observers) => observers,
			None => return,
		};

		for entry in installed {
			match entry {
				Installed::Value(node) => {
					if let Some(node) = node.upgrade() {
						observers.unobserve_value_change(&node, GRAPH_TAG);
					}
				}
				Installed::Rerun(scope) => {
					if let Some(scope) = scope.upgrade() {
						observers.unobserve_computation_rerun(&Owner::from_rc(scope), GRAPH_TAG);
					}
				}
			}
		}
	}

	pub fn is_released(&self) -> bool {
		self.installed.borrow().is_empty()
	}
}

impl Drop for Collection {
	fn drop(&mut self) {
		self.release();
	}
}

pub struct Collector {
	registry: Rc<Registry>,
	observers: Rc<Observers>,
	prune_frozen_memos: bool,
}

impl Collector {
	pub fn new(registry: Rc<Registry>, observers: Rc<Observers>) -> Self {
		Collector {
			registry,
			observers,
			prune_frozen_memos: true,
		}
	}

	/// Leave memos without dependencies out of the graph.
	pub fn prune_frozen_memos(mut self, enabled: bool) -> Self {
		self.prune_frozen_memos = enabled;
		self
	}

	/// Id of a graph node: computations are identified by their scope,
	/// cells by themselves.
	pub fn id_of(&self, node: &Rc<dyn Node>) -> Option<NodeId> {
		match node.scope() {
			Some(scope) => Some(self.registry.identify(scope.rc(), Kind::Owner)),
			None if node.role().is_computation() => None,
			None => Some(self.registry.identify(node, Kind::Signal)),
		}
	}

	/// Collects the transitive sources and dependents of `focused` and
	/// observes all of them, reporting the id of every node that changes.
	/// Structural nodes have no dependency semantics and yield an empty
	/// graph.
	pub fn collect(&self, focused: &Rc<dyn Node>, on_update: impl Fn(NodeId) + 'static) -> Collection {
		let mut collection = Collection::empty(&self.observers);
		if focused.role().is_structural() {
			return collection;
		}

		let mut collect = Collect {
			collector: self,
			on_update: Rc::new(on_update),
			visited: FxHashMap::default(),
			depths: FxHashMap::default(),
			members: Vec::new(),
			installed: Vec::new(),
			graph: DependencyGraph::new(),
		};

		if collect.add(focused) {
			collect.upstream(focused);
			collect.downstream(focused);
		}
		collect.link();

		collection.graph = collect.graph;
		*collection.installed.get_mut() = collect.installed;
		collection
	}
}

/// State of one collection. Dropped when `collect` returns.
struct Collect<'c> {
	collector: &'c Collector,
	on_update: Rc<dyn Fn(NodeId)>,
	visited: FxHashMap<usize, NodeId>,
	depths: FxHashMap<usize, u32>,
	members: Vec<(NodeId, Rc<dyn Node>)>,
	installed: Vec<Installed>,
	graph: DependencyGraph,
}

fn addr(node: &Rc<dyn Node>) -> usize {
	thin(Rc::as_ptr(node))
}

impl<'c> Collect<'c> {
	fn upstream(&mut self, node: &Rc<dyn Node>) {
		for source in node.sources() {
			if source.is_transparent() || self.visited.contains_key(&addr(&source)) {
				continue;
			}
			let frozen = source.role() == Role::Memo && source.sources().is_empty();
			if frozen && self.collector.prune_frozen_memos {
				continue;
			}
			if self.add(&source) {
				self.upstream(&source);
			}
		}
	}

	fn downstream(&mut self, node: &Rc<dyn Node>) {
		for observer in node.observers() {
			if observer.is_transparent() || self.visited.contains_key(&addr(&observer)) {
				continue;
			}
			if self.add(&observer) {
				self.downstream(&observer);
			}
		}
	}

	/// Adds `node` to the graph and observes it. Returns `false` for nodes
	/// that can not be identified any more.
	fn add(&mut self, node: &Rc<dyn Node>) -> bool {
		let id = match self.collector.id_of(node) {
			Some(id) => id,
			None => return false,
		};
		self.visited.insert(addr(node), id);

		let owner = node.owner();
		let depth = match node.scope() {
			Some(scope) => self.depth(&scope),
			None => owner.as_ref().map_or(0, |owner| self.depth(owner) + 1),
		};

		self.graph.insert(
			id,
			GraphNode {
				name: node.name().unwrap_or_else(|| UNNAMED.to_owned()),
				role: node.role(),
				depth,
				sources: None,
				dependents: None,
				owner: owner.map(|owner| self.collector.registry.identify(owner.rc(), Kind::Owner)),
			},
		);

		self.observe(id, node);
		self.members.push((id, node.clone()));
		true
	}

	fn depth(&mut self, owner: &Owner) -> u32 {
		let key = thin(Rc::as_ptr(owner.rc()));
		if let Some(depth) = self.depths.get(&key) {
			return *depth;
		}

		let depth = match (owner.role(), owner.parent()) {
			(Role::Root, _) | (_, None) => 0,
			(_, Some(parent)) => self.depth(&parent) + 1,
		};
		self.depths.insert(key, depth);
		depth
	}

	fn observe(&mut self, id: NodeId, node: &Rc<dyn Node>) {
		let observers = &self.collector.observers;
		let on_update = self.on_update.clone();

		match node.scope() {
			Some(scope) => {
				observers.observe_computation_rerun(&scope, GRAPH_TAG, move || on_update(id));
				self.installed.push(Installed::Rerun(Rc::downgrade(scope.rc())));
			}
			None => {
				observers.observe_value_change(node, GRAPH_TAG, move |_, _| on_update(id));
				self.installed.push(Installed::Value(Rc::downgrade(node)));
			}
		}
	}

	/// Fills in edges between graph members.
	fn link(&mut self) {
		let members = std::mem::take(&mut self.members);
		for (id, node) in members {
			let role = node.role();
			let sources = role
				.is_computation()
				.then(|| self.member_ids(node.sources()));
			let dependents = matches!(role, Role::Signal | Role::Memo)
				.then(|| self.member_ids(node.observers()));

			if let Some(entry) = self.graph.get_mut(&id) {
				entry.sources = sources;
				entry.dependents = dependents;
			}
		}
	}

	fn member_ids(&self, nodes: Vec<Rc<dyn Node>>) -> Vec<NodeId> {
		nodes
			.iter()
			.filter_map(|node| self.visited.get(&addr(node)).copied())
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::runtime::{create_root, Computed, Reaction, Var};

	fn collector() -> Collector {
		Collector::new(Rc::new(Registry::new()), Rc::new(Observers::new()))
	}

	#[test]
	fn frozen_memos_are_pruned() {
		let collector = collector();
		let a = Var::named("a", 1);

		let (constant, sum) = create_root("app", |_| {
			let constant = Computed::named("constant", Box::new(|_| 10));
			let sum = Computed::named("sum", {
				let a = a.clone();
				let constant = constant.clone();
				Box::new(move |cx| *a.get(cx) + *constant.get(cx))
			});
			(constant, sum)
		});

		let collection = collector.collect(&sum.node(), |_| {});
		let sum_id = collector.id_of(&sum.node()).unwrap();
		let constant_id = collector.id_of(&constant.node()).unwrap();
		let a_id = collector.id_of(&a.node()).unwrap();

		assert_eq!(collection.graph.len(), 2);
		assert!(!collection.graph.contains_key(&constant_id));
		assert_eq!(collection.graph[&sum_id].sources, Some(vec![a_id]));
		assert_eq!(collection.graph[&a_id].dependents, Some(vec![sum_id]));
		assert_eq!(collection.graph[&a_id].sources, None);

		let unpruned = Collector::new(Rc::new(Registry::new()), Rc::new(Observers::new()))
			.prune_frozen_memos(false)
			.collect(&sum.node(), |_| {});
		assert_eq!(unpruned.graph.len(), 3);
	}

	#[test]
	fn transparent_wrappers_are_left_out() {
		let collector = collector();
		let a = Var::named("a", 1u64);

		let (wrapper, w) = create_root("app", |_| {
			let wrapper = Computed::new_transparent({
				let a = a.clone();
				Box::new(move |cx| *a.get(cx) * 2)
			});
			let w = Reaction::new_with_name("w", {
				let wrapper = wrapper.clone();
				Box::new(move |cx| {
					let _ = *wrapper.get(cx);
				})
			});
			w.update();
			(wrapper, w)
		});

		let collection = collector.collect(&w.node(), |_| {});
		let w_id = collector.id_of(&w.node()).unwrap();
		let wrapper_id = collector.id_of(&wrapper.node()).unwrap();
		let a_id = collector.id_of(&a.node()).unwrap();

		assert_eq!(collection.graph.keys().copied().collect::<Vec<_>>(), vec![w_id]);
		assert!(!collection.graph.contains_key(&wrapper_id));
		assert!(!collection.graph.contains_key(&a_id));
		assert_eq!(collection.graph[&w_id].sources, Some(vec![]));
		assert!(!collector.observers.is_observing_value(&a.node(), GRAPH_TAG));
	}

	#[test]
	fn depth_counts_from_the_nearest_root() {
		let collector = collector();

		let (cell, memo) = create_root("app", |_| {
			let cell = Var::named("cell", 0);
			let memo = Computed::named("memo", {
				let cell = cell.clone();
				Box::new(move |cx| *cell.get(cx))
			});
			(cell, memo)
		});

		let collection = collector.collect(&memo.node(), |_| {});
		let memo_id = collector.id_of(&memo.node()).unwrap();
		let cell_id = collector.id_of(&cell.node()).unwrap();

		assert_eq!(collection.graph[&memo_id].depth, 1);
		assert_eq!(collection.graph[&cell_id].depth, 1);
		assert_eq!(collection.graph[&cell_id].owner, collection.graph[&memo_id].owner);
	}

	#[test]
	fn release_is_idempotent() {
		let collector = collector();
		let cell = Var::new(0);
		let node = cell.node();

		let collection = collector.collect(&node, |_| {});
		assert!(collector.observers.is_observing_value(&node, GRAPH_TAG));

		collection.release();
		collection.release();
		assert!(collection.is_released());
		assert!(!collector.observers.is_observing_value(&node, GRAPH_TAG));
	}

	#[test]
	fn structural_nodes_give_an_empty_graph() {
		let collector = collector();

		struct Structural;
		impl Node for Structural {
			fn role(&self) -> Role {
				Role::Component
			}
			fn name(&self) -> Option<String> {
				None
			}
			fn owner(&self) -> Option<Owner> {
				None
			}
			fn instrument(&self) {}
		}

		let node: Rc<dyn Node> = Rc::new(Structural);
		assert!(collector.collect(&node, |_| {}).graph.is_empty());
	}
}
