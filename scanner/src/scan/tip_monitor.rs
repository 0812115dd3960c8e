// Copyright 2021 The Floscan Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Watches the full node's chain tips for competing branches near the
//! active tip. The decision is a pure function so it can be checked
//! against each scenario directly.

use crate::node::ChainTip;

/// Notification that a competing branch of meaningful length exists
/// close to the active tip.
#[derive(Clone, Debug)]
pub struct ReorgTrigger {
	/// The currently active best tip
	pub best_height_tip: ChainTip,
	/// The competing tip that tripped the threshold
	pub reorg_tip: ChainTip,
}

/// Decides whether the reported tips warrant a reorg notification.
/// A fork qualifies when its branch is at least `trigger_length` long
/// and its tip is no more than `tip_maxage` below the active tip.
pub fn check_reorg(
	tips: &[ChainTip],
	trigger_length: u64,
	tip_maxage: u64,
) -> Option<ReorgTrigger> {
	let best_active = tips
		.iter()
		.filter(|tip| tip.status == "active")
		.max_by_key(|tip| tip.height)?
		.clone();

	for tip in tips {
		if tip.status == "active" {
			continue;
		}
		if tip.branchlen >= trigger_length && tip.height + tip_maxage >= best_active.height {
			return Some(ReorgTrigger {
				best_height_tip: best_active,
				reorg_tip: tip.clone(),
			});
		}
	}
	None
}

#[cfg(test)]
mod test {
	use super::*;

	fn tip(height: u64, branchlen: u64, status: &str) -> ChainTip {
		ChainTip {
			height,
			hash: format!("{:064x}", height),
			branchlen,
			status: status.to_string(),
		}
	}

	#[test]
	fn long_fork_near_tip_triggers() {
		let tips = vec![tip(1000, 0, "active"), tip(998, 12, "valid-fork")];
		let trigger = check_reorg(&tips, 10, 25).expect("should trigger");
		assert_eq!(trigger.best_height_tip.height, 1000);
		assert_eq!(trigger.reorg_tip.height, 998);
	}

	#[test]
	fn old_fork_does_not_trigger() {
		let tips = vec![tip(2000, 0, "active"), tip(1500, 12, "valid-fork")];
		assert!(check_reorg(&tips, 10, 25).is_none());
	}

	#[test]
	fn short_fork_does_not_trigger() {
		let tips = vec![tip(1000, 0, "active"), tip(999, 3, "valid-fork")];
		assert!(check_reorg(&tips, 10, 25).is_none());
	}

	#[test]
	fn no_active_tip_means_no_trigger() {
		let tips = vec![tip(1000, 12, "valid-fork")];
		assert!(check_reorg(&tips, 10, 25).is_none());
	}

	#[test]
	fn highest_active_tip_wins() {
		let tips = vec![
			tip(900, 0, "active"),
			tip(1000, 0, "active"),
			tip(998, 15, "headers-only"),
		];
		let trigger = check_reorg(&tips, 10, 25).expect("should trigger");
		assert_eq!(trigger.best_height_tip.height, 1000);
	}

	#[test]
	fn fork_exactly_at_age_cutoff_triggers() {
		let tips = vec![tip(1000, 0, "active"), tip(975, 10, "valid-fork")];
		assert!(check_reorg(&tips, 10, 25).is_some());
		let tips = vec![tip(1000, 0, "active"), tip(974, 10, "valid-fork")];
		assert!(check_reorg(&tips, 10, 25).is_none());
	}
}
