use thiserror::Error;

use crate::registry::NodeId;
use crate::runtime::Role;

/// Misuse by the caller. Stale ids and unexpected node shapes are never
/// errors: they produce smaller trees and graphs instead.
#[derive(Error, Debug)]
pub enum Error {
	#[error("a debugger session is already attached to this thread")]
	AlreadyAttached,

	#[error("node {id} is a {role} and has no dependency graph")]
	InvalidFocus { id: NodeId, role: Role },

	#[error("invalid config: {0}")]
	Config(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
