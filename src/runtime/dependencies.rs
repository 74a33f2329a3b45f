use std::rc::{Rc, Weak};

use crate::addr::RcAddr;
use crate::runtime::{Derived, Node, Observable, Version};

/// Sources read during one evaluation, in read order.
#[derive(Default)]
pub struct Dependencies {
	based_on: Vec<(RcAddr<dyn Observable>, Version)>,
}

impl Dependencies {
	pub fn new() -> Self {
		Self {
			based_on: Vec::new(),
		}
	}

	pub fn drop(&mut self, parent: &Weak<dyn Derived>) {
		for (item, _) in &self.based_on {
			item.not_used_by(parent)
		}
	}

	pub fn based_on(&mut self, observable: Rc<dyn Observable>, version: Version) {
		let observable = RcAddr::new(observable);
		match self.based_on.iter_mut().find(|(base, _)| *base == observable) {
			Some(entry) => entry.1 = version,
			None => self.based_on.push((observable, version)),
		}
	}

	pub fn are_valid(&self) -> bool {
		self.based_on
			.iter()
			.all(|(base, version)| base.update() == *version)
	}

	pub fn swap(&mut self, next: Dependencies, parent: &Weak<dyn Derived>) {
		let prev = std::mem::replace(&mut self.based_on, next.based_on);

		// Diff the keys
		prev.iter()
			.filter(|(k, _)| !self.based_on.iter().any(|(n, _)| n == k))
			.for_each(|(k, _)| k.not_used_by(parent));
	}

	pub fn nodes(&self) -> Vec<Rc<dyn Node>> {
		self.based_on
			.iter()
			.map(|(base, _)| Rc::clone(base).as_node())
			.collect()
	}
}
