//! Stable opaque ids for live graph objects.
//!
//! The registry only ever holds weak pointers. A weak pointer keeps the
//! allocation reserved, so an address can not be reused by another object
//! while its entry exists; dead entries are dropped when they are looked up
//! and by periodic sweeps.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use fxhash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::addr::thin;

/// Number of assignments between two sweeps of dead entries.
const SWEEP_INTERVAL: u64 = 256;

/// Opaque node identifier, serialized as a base-36 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
	pub fn from_raw(raw: u64) -> Self {
		NodeId(raw)
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

		let mut buf = [0u8; 13];
		let mut pos = buf.len();
		let mut n = self.0;
		loop {
			pos -= 1;
			buf[pos] = DIGITS[(n % 36) as usize];
			n /= 36;
			if n == 0 {
				break;
			}
		}

		// Only ASCII digits were written.
		f.write_str(std::str::from_utf8(&buf[pos..]).map_err(|_| fmt::Error)?)
	}
}

impl FromStr for NodeId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		u64::from_str_radix(s, 36).map(NodeId)
	}
}

impl Serialize for NodeId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for NodeId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(serde::de::Error::custom)
	}
}

/// Disjoint id namespaces. Lookups always name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Kind {
	Owner,
	Element,
	Signal,
	StoreRoot,
	StoreNode,
	Custom,
}

trait Slot {
	fn is_alive(&self) -> bool;
	fn as_any(&self) -> &dyn Any;
}

impl<T: ?Sized + 'static> Slot for Weak<T> {
	fn is_alive(&self) -> bool {
		self.strong_count() > 0
	}

	fn as_any(&self) -> &dyn Any {
		self
	}
}

struct Entry {
	addr: usize,
	slot: Box<dyn Slot>,
}

#[derive(Default)]
struct Table {
	by_addr: FxHashMap<usize, NodeId>,
	by_id: FxHashMap<NodeId, Entry>,
}

impl Table {
	fn remove(&mut self, id: &NodeId) {
		if let Some(entry) = self.by_id.remove(id) {
			self.by_addr.remove(&entry.addr);
		}
	}

	fn sweep(&mut self) {
		let by_addr = &mut self.by_addr;
		self.by_id.retain(|_, entry| {
			let alive = entry.slot.is_alive();
			if !alive {
				by_addr.remove(&entry.addr);
			}
			alive
		});
	}
}

#[derive(Default)]
pub struct Registry {
	next: Cell<u64>,
	assigned: Cell<u64>,
	tables: RefCell<FxHashMap<Kind, Table>>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the id of `object` in `kind`, assigning a fresh one the first
	/// time the object is seen. Identity is the allocation, not the value.
	pub fn identify<T: ?Sized + 'static>(&self, object: &Rc<T>, kind: Kind) -> NodeId {
		let addr = thin(Rc::as_ptr(object));
		let mut tables = self.tables.borrow_mut();
		let table = tables.entry(kind).or_default();

		if let Some(id) = table.by_addr.get(&addr).copied() {
			match table.by_id.get(&id) {
				Some(entry) if entry.slot.is_alive() => return id,
				_ => table.remove(&id),
			}
		}

		let id = NodeId(self.next.get());
		self.next.set(id.0 + 1);
		table.by_addr.insert(addr, id);
		table.by_id.insert(
			id,
			Entry {
				addr,
				slot: Box::new(Rc::downgrade(object)),
			},
		);

		let assigned = self.assigned.get() + 1;
		self.assigned.set(assigned);
		if assigned % SWEEP_INTERVAL == 0 {
			table.sweep();
		}

		id
	}

	/// Looks up the live object behind `id`. Stale ids, ids of another
	/// kind and ids registered with a different type all resolve to `None`.
	pub fn resolve<T: ?Sized + 'static>(&self, id: &NodeId, kind: Kind) -> Option<Rc<T>> {
		let mut tables = self.tables.borrow_mut();
		let table = tables.get_mut(&kind)?;
		let entry = table.by_id.get(id)?;

		match entry.slot.as_any().downcast_ref::<Weak<T>>()?.upgrade() {
			Some(object) => Some(object),
			None => {
				table.remove(id);
				None
			}
		}
	}

	/// Whether `id` is currently assigned in `kind`, without resolving it.
	pub fn contains(&self, id: &NodeId, kind: Kind) -> bool {
		self.tables
			.borrow()
			.get(&kind)
			.and_then(|table| table.by_id.get(id))
			.map_or(false, |entry| entry.slot.is_alive())
	}

	/// Drops every entry whose object is gone.
	pub fn sweep(&self) {
		for table in self.tables.borrow_mut().values_mut() {
			table.sweep();
		}
	}

	/// Number of entries, live or not yet swept.
	pub fn len(&self) -> usize {
		self.tables
			.borrow()
			.values()
			.map(|table| table.by_id.len())
			.sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_are_stable_and_distinct() {
		let registry = Registry::new();
		let a = Rc::new(1);
		let b = Rc::new(1);

		let id = registry.identify(&a, Kind::Signal);
		assert_eq!(registry.identify(&a, Kind::Signal), id);
		assert_eq!(registry.identify(&a.clone(), Kind::Signal), id);
		assert_ne!(registry.identify(&b, Kind::Signal), id);
	}

	#[test]
	fn resolve_needs_matching_kind() {
		let registry = Registry::new();
		let a = Rc::new(String::from("a"));

		let signal = registry.identify(&a, Kind::Signal);
		let custom = registry.identify(&a, Kind::Custom);
		assert_ne!(signal, custom);

		let resolved = registry.resolve::<String>(&signal, Kind::Signal);
		assert!(resolved.is_some_and(|s| Rc::ptr_eq(&s, &a)));
		assert!(registry.resolve::<String>(&signal, Kind::Custom).is_none());
		assert!(registry.resolve::<String>(&signal, Kind::StoreNode).is_none());
		assert!(registry.resolve::<u32>(&signal, Kind::Signal).is_none());
	}

	#[test]
	fn dropped_objects_resolve_to_none() {
		let registry = Registry::new();
		let a = Rc::new(vec![1, 2, 3]);
		let id = registry.identify(&a, Kind::Element);

		drop(a);

		assert!(!registry.contains(&id, Kind::Element));
		assert!(registry.resolve::<Vec<i32>>(&id, Kind::Element).is_none());
		assert!(registry.is_empty());
	}

	#[test]
	fn sweep_drops_dead_entries() {
		let registry = Registry::new();
		let keep = Rc::new(1u8);
		registry.identify(&keep, Kind::Custom);
		for _ in 0..10 {
			let temp = Rc::new(2u8);
			registry.identify(&temp, Kind::Custom);
		}

		registry.sweep();
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn ids_print_in_base_36() {
		assert_eq!(NodeId(0).to_string(), "0");
		assert_eq!(NodeId(35).to_string(), "z");
		assert_eq!(NodeId(36).to_string(), "10");
		assert_eq!("10".parse::<NodeId>(), Ok(NodeId(36)));
		assert_eq!(NodeId(u64::MAX).to_string().parse::<NodeId>(), Ok(NodeId(u64::MAX)));
	}
}
