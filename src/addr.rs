use std::cmp::Ordering;
use std::ops::Deref;
use std::rc::{Rc, Weak};

/// Address of the allocation behind `ptr`, without trait-object metadata.
#[inline]
pub(crate) fn thin<T: ?Sized>(ptr: *const T) -> usize {
	ptr.cast::<()>() as usize
}

pub struct RcAddr<T: ?Sized> {
	ptr: Rc<T>,
}

impl<T: ?Sized> RcAddr<T> {
	pub fn new(ptr: Rc<T>) -> Self {
		RcAddr { ptr }
	}

	pub fn addr(&self) -> usize {
		thin(Rc::as_ptr(&self.ptr))
	}
}

impl<T: ?Sized> Deref for RcAddr<T> {
	type Target = Rc<T>;
	fn deref(&self) -> &Self::Target {
		&self.ptr
	}
}

impl<T: ?Sized> PartialEq for RcAddr<T> {
	fn eq(&self, other: &Self) -> bool {
		self.addr() == other.addr()
	}
}

impl<T: ?Sized> Eq for RcAddr<T> {}

impl<T: ?Sized> Ord for RcAddr<T> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.addr().cmp(&other.addr())
	}
}

impl<T: ?Sized> PartialOrd for RcAddr<T> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Weak pointer compared by address.
///
/// Holding the weak keeps the allocation reserved, so an address stays
/// unique for as long as the key exists even after the value was dropped.
pub struct WeakAddr<T: ?Sized> {
	ptr: Weak<T>,
}

impl<T: ?Sized> WeakAddr<T> {
	pub fn new(ptr: Weak<T>) -> Self {
		WeakAddr { ptr }
	}

	pub fn addr(&self) -> usize {
		thin(Weak::as_ptr(&self.ptr))
	}

	pub fn is_alive(&self) -> bool {
		self.ptr.strong_count() > 0
	}
}

impl<T: ?Sized> Clone for WeakAddr<T> {
	fn clone(&self) -> Self {
		WeakAddr {
			ptr: self.ptr.clone(),
		}
	}
}

impl<T: ?Sized> Deref for WeakAddr<T> {
	type Target = Weak<T>;
	fn deref(&self) -> &Self::Target {
		&self.ptr
	}
}

impl<T: ?Sized> PartialEq for WeakAddr<T> {
	fn eq(&self, other: &Self) -> bool {
		self.addr() == other.addr()
	}
}

impl<T: ?Sized> Eq for WeakAddr<T> {}

impl<T: ?Sized> Ord for WeakAddr<T> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.addr().cmp(&other.addr())
	}
}

impl<T: ?Sized> PartialOrd for WeakAddr<T> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
