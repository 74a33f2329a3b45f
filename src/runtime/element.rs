use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::addr::thin;

/// Output of a component.
pub type View = Vec<Element>;

/// An externally rendered element, such as a DOM node.
#[derive(Clone)]
pub struct Element {
	body: Rc<ElementBody>,
}

pub(crate) struct ElementBody {
	tag: String,
	children: RefCell<Vec<Element>>,
}

impl Element {
	pub fn new(tag: impl Into<String>) -> Self {
		Element {
			body: Rc::new(ElementBody {
				tag: tag.into(),
				children: RefCell::new(Vec::new()),
			}),
		}
	}

	pub fn with_children(tag: impl Into<String>, children: impl IntoIterator<Item = Element>) -> Self {
		let element = Element::new(tag);
		element.append(children);
		element
	}

	pub fn append(&self, children: impl IntoIterator<Item = Element>) {
		self.body.children.borrow_mut().extend(children);
	}

	pub fn tag(&self) -> &str {
		&self.body.tag
	}

	pub fn children(&self) -> Vec<Element> {
		self.body.children.borrow().clone()
	}

	pub(crate) fn rc(&self) -> &Rc<ElementBody> {
		&self.body
	}

	pub(crate) fn addr(&self) -> usize {
		thin(Rc::as_ptr(&self.body))
	}
}

impl PartialEq for Element {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.body, &other.body)
	}
}

impl Eq for Element {}

impl Hash for Element {
	fn hash<H: Hasher>(&self, state: &mut H) {
		state.write_usize(self.addr());
	}
}

impl std::fmt::Debug for Element {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Element")
			.field("tag", &self.body.tag)
			.field("children", &self.body.children.borrow().len())
			.finish()
	}
}
