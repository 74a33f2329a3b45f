use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::walker::TreeWalkerMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	/// Walker mode the structure starts in.
	pub mode: TreeWalkerMode,
	/// Minimum interval between two partial structure batches.
	pub structure_throttle_ms: u64,
	/// Interval of node update batches and of value-only computation
	/// updates. Zero flushes at the end of the turn.
	pub node_update_throttle_ms: u64,
	/// Flag computations without dependencies as frozen in the tree.
	pub mark_frozen: bool,
	/// Leave memos without dependencies out of dependency graphs.
	pub prune_frozen_memos: bool,
	/// In element mode, treat every re-run as a possible structure change.
	pub rendered_reruns_restructure: bool,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			mode: TreeWalkerMode::default(),
			structure_throttle_ms: 300,
			node_update_throttle_ms: 0,
			mark_frozen: true,
			prune_frozen_memos: true,
			rendered_reruns_restructure: true,
		}
	}
}

impl Config {
	pub fn from_json(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_fields_use_defaults() {
		let config = Config::from_json(r#"{ "mode": "byScope", "structureThrottleMs": 50 }"#).unwrap();
		assert_eq!(config.mode, TreeWalkerMode::ByScope);
		assert_eq!(config.structure_throttle_ms, 50);
		assert_eq!(config.node_update_throttle_ms, 0);
		assert!(config.prune_frozen_memos);

		assert_eq!(Config::from_json("{}").unwrap(), Config::default());
	}

	#[test]
	fn bad_json_is_a_config_error() {
		let err = Config::from_json(r#"{ "mode": "byPixel" }"#).unwrap_err();
		assert!(matches!(err, crate::Error::Config(_)));
	}
}
