use std::hash::Hash;
use std::rc::{Rc, Weak};

use crate::runtime::owner::{render_component, OwnerBody};
use crate::runtime::{Computed, ControlFlow, Evaluation, Owner, View};

/// Keeps the rendered output of the enclosing component in sync with the
/// memo producing it.
fn rendered_by(component: &Option<Weak<OwnerBody>>, view: &View) {
	if let Some(component) = component.as_ref().and_then(Weak::upgrade) {
		Owner::from_rc(component).set_rendered(view.clone());
	}
}

fn current_component() -> Option<Weak<OwnerBody>> {
	Owner::current().map(|owner| Rc::downgrade(owner.rc()))
}

/// Renders `render` while `when` holds.
pub fn show(
	when: impl Fn(&Evaluation) -> bool + 'static,
	render: impl Fn() -> View + 'static,
) -> View {
	render_component("Show", Some(ControlFlow::Show), move || {
		let component = current_component();
		let condition = Computed::named("condition", Box::new(when));
		let value = Computed::named(
			"value",
			Box::new(move |cx| {
				let view = match *condition.get(cx) {
					true => render(),
					false => View::new(),
				};
				rendered_by(&component, &view);
				view
			}),
		);

		let view = value.get_once().clone();
		view
	})
}

/// Renders every item of the list produced by `list`.
pub fn each<T>(
	list: impl Fn(&Evaluation) -> Vec<T> + 'static,
	render: impl Fn(&T) -> View + 'static,
) -> View
where
	T: Hash + 'static,
{
	render_component("For", Some(ControlFlow::For), move || {
		let component = current_component();
		let mapped = Computed::named(
			"map",
			Box::new(move |cx| {
				let view = list(cx).iter().flat_map(&render).collect::<View>();
				rendered_by(&component, &view);
				view
			}),
		);

		let view = mapped.get_once().clone();
		view
	})
}
