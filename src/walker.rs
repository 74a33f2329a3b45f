//! Serializable snapshots of the scope tree.

use std::cell::Cell;
use std::rc::Rc;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::observer::Observers;
use crate::registry::{Kind, NodeId, Registry};
use crate::runtime::{ControlFlow, Element, Owner, Role};

pub const STRUCTURE_TAG: &str = "structure";

/// Label of scopes created without a name.
pub const UNNAMED: &str = "<unnamed>";

/// Granularity of the structure tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreeWalkerMode {
	/// Every scope.
	ByScope,
	/// Components and roots; everything in between is hoisted.
	#[default]
	ByComponent,
	/// Like `ByComponent`, with the elements each component rendered.
	ByRenderedElement,
}

fn is_false(value: &bool) -> bool {
	!*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
	pub id: NodeId,
	#[serde(rename = "type")]
	pub role: Role,
	pub name: String,
	pub children: Vec<TreeNode>,
	/// A computation without dependencies. It can not re-run again.
	#[serde(default, skip_serializing_if = "is_false")]
	pub frozen: bool,
	/// A component merged with its hot-reload boundary.
	#[serde(default, skip_serializing_if = "is_false")]
	pub hmr: bool,
}

impl TreeNode {
	/// Merges a fresh walk of the same scope into this node. Children are
	/// matched by position: a child with the same id is updated in place,
	/// anything else is replaced.
	pub fn reconcile(&mut self, next: TreeNode) {
		self.role = next.role;
		self.name = next.name;
		self.frozen = next.frozen;
		self.hmr = next.hmr;

		let mut prev = std::mem::take(&mut self.children).into_iter();
		self.children = next
			.children
			.into_iter()
			.map(|child| match prev.next() {
				Some(mut old) if old.id == child.id => {
					old.reconcile(child);
					old
				}
				_ => child,
			})
			.collect();
	}

	pub fn find(&self, id: NodeId) -> Option<&TreeNode> {
		if self.id == id {
			return Some(self);
		}
		self.children.iter().find_map(|child| child.find(id))
	}

	pub fn find_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
		if self.id == id {
			return Some(self);
		}
		self.children.iter_mut().find_map(|child| child.find_mut(id))
	}

	/// Number of nodes in this subtree, itself included.
	pub fn size(&self) -> usize {
		1 + self.children.iter().map(TreeNode::size).sum::<usize>()
	}
}

/// Reported after re-runs of observed computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputationUpdate {
	/// Top-level root the computation was walked under.
	pub root_id: NodeId,
	pub id: NodeId,
	/// The tree under the computation may look different now.
	pub changed_structure: bool,
}

pub struct Walker {
	registry: Rc<Registry>,
	observers: Rc<Observers>,
	mode: TreeWalkerMode,
	mark_frozen: bool,
	rendered_reruns_restructure: bool,
	on_update: Rc<dyn Fn(ComputationUpdate)>,
}

impl Walker {
	pub fn new(
		registry: Rc<Registry>,
		observers: Rc<Observers>,
		on_update: impl Fn(ComputationUpdate) + 'static,
	) -> Self {
		Walker {
			registry,
			observers,
			mode: TreeWalkerMode::default(),
			mark_frozen: true,
			rendered_reruns_restructure: true,
			on_update: Rc::new(on_update),
		}
	}

	pub fn with_mode(mut self, mode: TreeWalkerMode) -> Self {
		self.mode = mode;
		self
	}

	pub fn mark_frozen(mut self, enabled: bool) -> Self {
		self.mark_frozen = enabled;
		self
	}

	/// Treat every re-run as structural when elements are walked.
	pub fn rendered_reruns_restructure(mut self, enabled: bool) -> Self {
		self.rendered_reruns_restructure = enabled;
		self
	}

	pub fn mode(&self) -> TreeWalkerMode {
		self.mode
	}

	pub fn set_mode(&mut self, mode: TreeWalkerMode) {
		self.mode = mode;
	}

	/// Builds the tree of `scope`, observing every computation inside it.
	/// `root_id` is reported back with re-runs of those computations.
	pub fn walk(&self, scope: &Owner, root_id: NodeId) -> Option<TreeNode> {
		if scope.is_disposed() {
			return None;
		}

		let mut walk = Walk {
			walker: self,
			root_id,
			rendered_roots: FxHashMap::default(),
		};

		walk.observe(scope, true);
		Some(walk.map_owner(scope))
	}

	/// Whether `owner` gets its own node in the current mode.
	pub fn is_mapped(&self, owner: &Owner) -> bool {
		if owner.node().map_or(false, |node| node.is_transparent()) {
			return false;
		}

		match self.mode {
			TreeWalkerMode::ByScope => true,
			TreeWalkerMode::ByComponent | TreeWalkerMode::ByRenderedElement => {
				matches!(owner.role(), Role::Component | Role::Root)
			}
		}
	}

	pub fn id_of(&self, owner: &Owner) -> NodeId {
		self.registry.identify(owner.rc(), Kind::Owner)
	}
}

/// State of one walk. Dropped when the walk returns.
struct Walk<'w> {
	walker: &'w Walker,
	root_id: NodeId,
	/// Root elements of every mapped component, by element address.
	rendered_roots: FxHashMap<usize, NodeId>,
}

impl<'w> Walk<'w> {
	fn visit(&mut self, owner: &Owner, out: &mut Vec<TreeNode>) {
		if owner.is_disposed() {
			return;
		}

		let mapped = self.walker.is_mapped(owner);
		self.observe(owner, mapped);
		if mapped {
			out.push(self.map_owner(owner));
		} else {
			self.visit_children(owner, out);
		}
	}

	fn visit_children(&mut self, owner: &Owner, out: &mut Vec<TreeNode>) {
		for child in owner.children() {
			self.visit(&child, out);
		}
	}

	fn map_owner(&mut self, owner: &Owner) -> TreeNode {
		let walker = self.walker;
		let role = owner.role();
		let frozen = walker.mark_frozen
			&& role.is_computation()
			&& owner.node().map_or(false, |node| node.sources().is_empty());

		let mut node = TreeNode {
			id: walker.id_of(owner),
			role,
			name: owner.name().unwrap_or(UNNAMED).to_owned(),
			children: Vec::new(),
			frozen,
			hmr: false,
		};

		let mut children = Vec::new();
		match role {
			Role::Component => node.hmr = self.visit_component(owner, &mut children),
			_ => self.visit_children(owner, &mut children),
		}

		node.children = match (walker.mode, role) {
			(TreeWalkerMode::ByRenderedElement, Role::Component) => {
				let rendered = owner.rendered();
				let children = self.place_components(&rendered, children);
				for element in &rendered {
					self.rendered_roots.insert(element.addr(), node.id);
				}
				children
			}
			_ => children,
		};

		node
	}

	/// Collapses the internals of refresh boundaries and control-flow
	/// components. Returns whether a refresh scope was merged.
	fn visit_component(&mut self, owner: &Owner, out: &mut Vec<TreeNode>) -> bool {
		let owned = owner.owned();
		let has_sub_roots = !owner.sub_roots().is_empty();

		if let [refresh] = owned.as_slice() {
			if refresh.role() == Role::Refresh && !has_sub_roots {
				self.visit_children(refresh, out);
				return true;
			}
		}

		let hoisted = match (owner.control_flow(), owned.as_slice()) {
			(Some(ControlFlow::Show), [condition, value])
				if condition.role() == Role::Memo && value.role() == Role::Memo =>
			{
				self.observe(condition, false);
				Some(value)
			}
			(Some(ControlFlow::For), [mapped]) if mapped.role() == Role::Memo => Some(mapped),
			(None, _) => None,
			(Some(flow), _) => {
				shape_anomaly(owner, flow);
				None
			}
		};

		match hoisted {
			Some(memo) => {
				self.observe(memo, false);
				self.visit_children(memo, out);
				for sub_root in owner.sub_roots() {
					self.visit(&sub_root, out);
				}
			}
			None => self.visit_children(owner, out),
		}

		false
	}

	/// Maps rendered elements, putting each child component where its
	/// first root element was rendered. Components that rendered nothing
	/// visible here go last.
	fn place_components(&mut self, elements: &[Element], components: Vec<TreeNode>) -> Vec<TreeNode> {
		let index: FxHashMap<NodeId, usize> = components
			.iter()
			.enumerate()
			.map(|(pos, node)| (node.id, pos))
			.collect();
		let mut pending: Vec<Option<TreeNode>> = components.into_iter().map(Some).collect();

		let mut out = self.map_elements(elements, &index, &mut pending);
		out.extend(pending.into_iter().flatten());
		out
	}

	fn map_elements(
		&mut self,
		elements: &[Element],
		index: &FxHashMap<NodeId, usize>,
		pending: &mut Vec<Option<TreeNode>>,
	) -> Vec<TreeNode> {
		let mut out = Vec::with_capacity(elements.len());
		for element in elements {
			let placed = self
				.rendered_roots
				.get(&element.addr())
				.and_then(|id| index.get(id))
				.copied();

			if let Some(pos) = placed {
				if let Some(component) = pending[pos].take() {
					out.push(component);
				}
				continue;
			}

			out.push(TreeNode {
				id: self.walker.registry.identify(element.rc(), Kind::Element),
				role: Role::Element,
				name: element.tag().to_owned(),
				children: self.map_elements(&element.children(), index, pending),
				frozen: false,
				hmr: false,
			});
		}
		out
	}

	/// (Re)installs the re-run observer of a computation scope. Scopes
	/// without a node of their own only report re-runs that may change the
	/// structure.
	fn observe(&self, owner: &Owner, in_tree: bool) {
		if !owner.role().is_computation() || owner.is_disposed() {
			return;
		}

		let walker = self.walker;
		let update = ComputationUpdate {
			root_id: self.root_id,
			id: walker.id_of(owner),
			changed_structure: false,
		};
		let was_leaf = Cell::new(owner.is_leaf());
		let always_structural =
			walker.mode == TreeWalkerMode::ByRenderedElement && walker.rendered_reruns_restructure;
		let scope = Rc::downgrade(owner.rc());
		let on_update = walker.on_update.clone();

		walker.observers.observe_computation_rerun(owner, STRUCTURE_TAG, move || {
			let scope = match scope.upgrade() {
				Some(scope) => Owner::from_rc(scope),
				None => return,
			};
			let is_leaf = scope.is_leaf();
			let flipped = was_leaf.replace(is_leaf) != is_leaf;
			let changed_structure = flipped || !is_leaf || always_structural;
			if !changed_structure && !in_tree {
				return;
			}

			on_update(ComputationUpdate {
				changed_structure,
				..update
			});
		});
	}
}

#[cfg(debug_assertions)]
fn shape_anomaly(owner: &Owner, flow: ControlFlow) {
	tracing::warn!(
		name = ?owner.name(),
		?flow,
		owned = owner.owned().len(),
		"control-flow component has an unexpected shape"
	);
}

#[cfg(not(debug_assertions))]
fn shape_anomaly(_owner: &Owner, _flow: ControlFlow) {}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::runtime::{component, create_root, hot_component, Computed, Var};

	fn walker(mode: TreeWalkerMode) -> Walker {
		Walker::new(Rc::new(Registry::new()), Rc::new(Observers::new()), |_| {}).with_mode(mode)
	}

	fn names(node: &TreeNode) -> Vec<&str> {
		node.children.iter().map(|child| child.name.as_str()).collect()
	}

	#[test]
	fn by_component_hoists_computations() {
		let walker = walker(TreeWalkerMode::ByComponent);

		let root = create_root("app", |root| {
			component("Outer", || {
				let memo = Computed::named(
					"wrapper",
					Box::new(|_| {
						component("Inner", Vec::new);
						1
					}),
				);
				let _ = memo.get_once();
				Vec::new()
			});
			root.clone()
		});

		let id = walker.id_of(&root);
		let tree = walker.walk(&root, id).unwrap();
		assert_eq!(names(&tree), vec!["Outer"]);
		assert_eq!(names(&tree.children[0]), vec!["Inner"]);
		assert_eq!(tree.size(), 3);

		let by_scope = walker.with_mode(TreeWalkerMode::ByScope);
		let tree = by_scope.walk(&root, id).unwrap();
		assert_eq!(names(&tree.children[0]), vec!["wrapper"]);
		assert_eq!(tree.size(), 4);
	}

	#[test]
	fn transparent_scopes_are_hoisted() {
		let walker = walker(TreeWalkerMode::ByScope);

		let root = create_root("app", |root| {
			let _wrapper = Computed::new_transparent(Box::new(|_| {
				component("Inner", Vec::new);
				0u8
			}));
			root.clone()
		});

		let tree = walker.walk(&root, walker.id_of(&root)).unwrap();
		assert_eq!(names(&tree), vec!["Inner"]);
		assert_eq!(tree.children[0].role, Role::Component);
		assert_eq!(tree.size(), 2);
	}

	#[test]
	fn refresh_boundary_is_merged() {
		let walker = walker(TreeWalkerMode::ByScope);

		let root = create_root("app", |root| {
			hot_component("Hot", || {
				component("Child", Vec::new);
				Vec::new()
			});
			root.clone()
		});

		let tree = walker.walk(&root, walker.id_of(&root)).unwrap();
		let hot = &tree.children[0];
		assert_eq!(hot.name, "Hot");
		assert!(hot.hmr);
		assert_eq!(names(hot), vec!["Child"]);
		assert!(tree.find(hot.id).is_some());
		assert_eq!(tree.size(), 3);
	}

	#[test]
	fn frozen_computations_are_marked() {
		let walker = walker(TreeWalkerMode::ByScope);
		let var = Var::new(1);

		let root = create_root("app", |root| {
			let _frozen = Computed::named("frozen", Box::new(|_| 1));
			let _live = Computed::named("live", Box::new(move |cx| *var.get(cx)));
			root.clone()
		});

		let tree = walker.walk(&root, walker.id_of(&root)).unwrap();
		let frozen: Vec<_> = tree.children.iter().map(|child| child.frozen).collect();
		assert_eq!(frozen, vec![true, false]);
		assert_eq!(tree.children[0].role, Role::Memo);
	}

	#[test]
	fn disposed_scopes_are_skipped() {
		let walker = walker(TreeWalkerMode::ByScope);
		let root = create_root("app", |root| root.clone());
		root.dispose();
		assert!(walker.walk(&root, NodeId::from_raw(0)).is_none());
	}

	#[test]
	fn reconcile_keeps_matching_ids() {
		let node = |id: u64, children: Vec<TreeNode>| TreeNode {
			id: NodeId::from_raw(id),
			role: Role::Component,
			name: format!("n{id}"),
			children,
			frozen: false,
			hmr: false,
		};

		let mut cached = node(1, vec![node(2, vec![node(3, vec![])]), node(4, vec![])]);
		cached.reconcile(node(1, vec![node(2, vec![]), node(5, vec![])]));

		assert_eq!(cached, node(1, vec![node(2, vec![]), node(5, vec![])]));
		assert!(cached.find_mut(NodeId::from_raw(5)).is_some());
		assert!(cached.find(NodeId::from_raw(3)).is_none());
	}
}
