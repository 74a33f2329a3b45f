//! Introspection engine for reactive graphs.
//!
//! A [`Debugger`] session attaches to the single-threaded [`runtime`] of
//! the current thread and exposes serializable snapshots of it:
//!
//! - stable ids for live scopes, cells and elements ([`Registry`]),
//! - a tree of scopes, walked in one of three [`TreeWalkerMode`]s and
//!   kept up to date with partial batches,
//! - the dependency neighborhood of one focused node, kept live while it
//!   stays focused,
//! - batched notifications for everything that changed in between.
//!
//! ```
//! use observe_devtools::runtime::{create_root, Var};
//! use observe_devtools::{Config, Debugger, Event};
//!
//! let debugger = Debugger::attach(Config::default(), |event: Event| {
//! 	println!("{}", serde_json::to_string(&event).unwrap());
//! })
//! .unwrap();
//!
//! let count = create_root("app", |_| Var::named("count", 0));
//! debugger.enable_structure();
//!
//! let id = debugger.node_id(&count.node()).unwrap();
//! let graph = debugger.focus(id).unwrap();
//! assert_eq!(graph.len(), 1);
//! ```

pub mod macros;

mod addr;
mod config;
mod debugger;
mod error;
pub mod graph;
#[cfg(target_arch = "wasm32")]
mod microtask;
pub mod observer;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod structure;
pub mod task;
pub mod walker;

pub use config::Config;
pub use debugger::{Debugger, Event, Hover};
pub use error::{Error, Result};
pub use graph::{Collection, Collector, DependencyGraph, GraphNode};
pub use observer::Observers;
pub use registry::{Kind, NodeId, Registry};
pub use scheduler::{Batch, Deadline, Scheduler};
pub use structure::{Structure, StructureChange, StructureUpdates};
pub use walker::{ComputationUpdate, TreeNode, TreeWalkerMode, Walker};
