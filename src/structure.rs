//! Cached structure trees kept up to date by minimal re-walks.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::registry::{Kind, NodeId, Registry};
use crate::runtime::{Owner, OwnerBody};
use crate::walker::{TreeNode, TreeWalkerMode, Walker};

/// What happened to the scope behind a queued id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureChange {
	/// The subtree of the scope may look different.
	Update,
	/// The top-level root is gone.
	RemoveRoot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureUpdates {
	/// `false` when the batch replaces everything the observer knows.
	pub partial: bool,
	/// Fresh subtrees by top-level root, then by the id of their top node.
	pub updated_subtrees: BTreeMap<NodeId, BTreeMap<NodeId, TreeNode>>,
	pub removed_root_ids: Vec<NodeId>,
}

impl StructureUpdates {
	pub fn is_empty(&self) -> bool {
		self.updated_subtrees.is_empty() && self.removed_root_ids.is_empty()
	}
}

pub struct Structure {
	walker: Walker,
	registry: Rc<Registry>,
	trees: BTreeMap<NodeId, TreeNode>,
}

impl Structure {
	pub fn new(walker: Walker, registry: Rc<Registry>) -> Self {
		Structure {
			walker,
			registry,
			trees: BTreeMap::new(),
		}
	}

	pub fn walker(&self) -> &Walker {
		&self.walker
	}

	pub fn set_mode(&mut self, mode: TreeWalkerMode) {
		self.walker.set_mode(mode);
	}

	/// Cached tree of a top-level root.
	pub fn tree(&self, root_id: NodeId) -> Option<&TreeNode> {
		self.trees.get(&root_id)
	}

	/// Walks every live root from scratch.
	pub fn rebuild(&mut self) -> StructureUpdates {
		self.trees.clear();

		let mut updates = StructureUpdates::default();
		for root in Owner::roots() {
			let root_id = self.walker.id_of(&root);
			if let Some(tree) = self.walker.walk(&root, root_id) {
				updates
					.updated_subtrees
					.entry(root_id)
					.or_default()
					.insert(root_id, tree.clone());
				self.trees.insert(root_id, tree);
			}
		}

		tracing::debug!(roots = self.trees.len(), mode = ?self.walker.mode(), "structure walked");
		updates
	}

	/// Re-walks the smallest cached subtrees covering `changes`, parents
	/// before children, and merges them into the cache.
	pub fn update(&mut self, changes: Vec<(NodeId, StructureChange)>) -> StructureUpdates {
		let mut updates = StructureUpdates {
			partial: true,
			..Default::default()
		};

		let mut targets = Vec::new();
		for (id, change) in changes {
			match change {
				StructureChange::RemoveRoot => {
					if self.trees.remove(&id).is_some() {
						updates.removed_root_ids.push(id);
					}
				}
				StructureChange::Update => {
					let owner = self
						.registry
						.resolve::<OwnerBody>(&id, Kind::Owner)
						.map(Owner::from_rc);
					match owner {
						Some(owner) if !owner.is_disposed() => targets.push(owner),
						_ => {}
					}
				}
			}
		}

		targets.sort_by_key(nesting);

		let mut walked: Vec<Owner> = Vec::new();
		for target in targets {
			let top = target.top();
			if !top.is_top_level() || top.is_disposed() {
				continue;
			}

			let root_id = self.walker.id_of(&top);
			let anchor = match self.trees.get(&root_id) {
				Some(tree) => match self.anchor(tree, target, &top) {
					Some(anchor) => anchor,
					None => continue,
				},
				// A root the observer has not seen yet.
				None => top.clone(),
			};

			if is_covered(&walked, &anchor) {
				continue;
			}

			let anchor_id = self.walker.id_of(&anchor);
			let fresh = match self.walker.walk(&anchor, root_id) {
				Some(fresh) => fresh,
				None => continue,
			};

			match self.trees.get_mut(&root_id) {
				Some(tree) => {
					if let Some(cached) = tree.find_mut(anchor_id) {
						cached.reconcile(fresh.clone());
					}
				}
				None => {
					self.trees.insert(root_id, fresh.clone());
				}
			}

			updates
				.updated_subtrees
				.entry(root_id)
				.or_default()
				.insert(anchor_id, fresh);
			walked.push(anchor);
		}

		updates
	}

	/// Nearest scope at or above `owner` that has a node in `tree`.
	fn anchor(&self, tree: &TreeNode, owner: Owner, top: &Owner) -> Option<Owner> {
		let mut cursor = Some(owner);
		while let Some(owner) = cursor {
			let candidate = owner.ptr_eq(top) || self.walker.is_mapped(&owner);
			if candidate && tree.find(self.walker.id_of(&owner)).is_some() {
				return Some(owner);
			}
			cursor = owner.parent();
		}
		None
	}

	pub fn clear(&mut self) {
		self.trees.clear();
	}
}

/// Number of scopes above `owner`, across sub-root boundaries.
fn nesting(owner: &Owner) -> usize {
	let mut count = 0;
	let mut cursor = owner.parent();
	while let Some(parent) = cursor {
		count += 1;
		cursor = parent.parent();
	}
	count
}

fn is_covered(walked: &[Owner], owner: &Owner) -> bool {
	let mut cursor = Some(owner.clone());
	while let Some(owner) = cursor {
		if walked.iter().any(|done| done.ptr_eq(&owner)) {
			return true;
		}
		cursor = owner.parent();
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::observer::Observers;
	use crate::runtime::{component, create_root, Var};

	fn structure(mode: TreeWalkerMode) -> Structure {
		let registry = Rc::new(Registry::new());
		let walker = Walker::new(registry.clone(), Rc::new(Observers::new()), |_| {}).with_mode(mode);
		Structure::new(walker, registry)
	}

	#[test]
	fn updates_are_anchored_at_cached_nodes() {
		let mut structure = structure(TreeWalkerMode::ByComponent);
		let flag = Var::new(false);

		let (root, panel) = create_root("app", |root| {
			let mut panel = None;
			component("Panel", || {
				panel = Owner::current();
				Vec::new()
			});
			(root.clone(), panel)
		});
		let panel = panel.unwrap();

		let full = structure.rebuild();
		assert!(!full.partial);
		let root_id = structure.walker().id_of(&root);
		assert_eq!(structure.tree(root_id).map(TreeNode::size), Some(2));

		let extra = panel.run(|| {
			crate::runtime::Computed::named("extra", {
				let flag = flag.clone();
				Box::new(move |cx| {
					component("Late", Vec::new);
					*flag.get(cx)
				})
			})
		});

		let extra_id = structure.walker().id_of(extra.owner());
		let panel_id = structure.walker().id_of(&panel);
		let updates = structure.update(vec![
			(extra_id, StructureChange::Update),
			(panel_id, StructureChange::Update),
		]);

		assert!(updates.partial);
		let subtrees = &updates.updated_subtrees[&root_id];
		assert_eq!(subtrees.keys().copied().collect::<Vec<_>>(), vec![panel_id]);
		assert_eq!(subtrees[&panel_id].children[0].name, "Late");
		assert_eq!(structure.tree(root_id).map(TreeNode::size), Some(3));
	}

	#[test]
	fn disposed_roots_are_removed() {
		let mut structure = structure(TreeWalkerMode::ByScope);
		let root = create_root("app", |root| root.clone());
		structure.rebuild();

		let root_id = structure.walker().id_of(&root);
		root.dispose();

		let updates = structure.update(vec![(root_id, StructureChange::RemoveRoot)]);
		assert_eq!(updates.removed_root_ids, vec![root_id]);
		assert!(updates.updated_subtrees.is_empty());
		assert!(structure.tree(root_id).is_none());
	}
}
