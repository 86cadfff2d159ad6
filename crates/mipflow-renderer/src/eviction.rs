//! Eviction Sweep
//!
//! Keeps the summed footprint of all tracked handles under the allowed
//! memory. A footprint is the target size plus any dense headroom reserved
//! by earlier promotions.
//!
//! When over budget, unused headroom is released first since it holds no
//! pixels. The demotion loop pops the handle with the largest target size, sheds one
//! mip from its target and pushes it back while it can shed more. Mips that
//! are already populated on a handle the renderer may be sampling are only
//! dropped from the target; the storage change is deferred to the render
//! thread. When the sweep ends with slack, promotable handles grow by one
//! mip at a time, cheapest first, while each promotion fits; headroom is
//! only reserved out of the remaining slack.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use mipflow_core::format_bytes;

use crate::handle::{SyncState, TextureHandle, WeakTextureHandle};

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Summed target size after the sweep
    pub total_target: u64,
    /// Unpopulated dense headroom left after the sweep
    pub headroom: u64,
    pub allowed: u64,
    /// Handles whose headroom was released
    pub trimmed: u32,
    /// Mips shed from storage during the sweep
    pub demoted: u32,
    /// Live mips handed to the render thread
    pub deferred: u32,
    pub promoted: u32,
    /// Handles invalidated by device errors during the sweep
    pub failed: u32,
}

impl SweepOutcome {
    /// Summed footprint of the tracked handles
    pub fn footprint(&self) -> u64 {
        self.total_target + self.headroom
    }

    /// Whether the minimum feasible footprint exceeds the allowed memory
    pub fn is_over_budget(&self) -> bool {
        self.footprint() > self.allowed
    }
}

struct Candidate {
    size: u64,
    order: usize,
    handle: TextureHandle,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Larger first, earlier tracked first on ties
        self.size
            .cmp(&other.size)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Rebalance the tracked handles against `allowed` bytes
///
/// `transferred` holds completed handles, `in_flight` the ones still
/// uploading. Live demotions are appended to `deferred`.
pub fn recompute_load(
    transferred: &[TextureHandle],
    in_flight: &[TextureHandle],
    allowed: u64,
    deferred: &mut Vec<WeakTextureHandle>,
) -> SweepOutcome {
    let mut outcome = SweepOutcome {
        allowed,
        ..SweepOutcome::default()
    };

    let mut heap = BinaryHeap::new();
    let mut reserved = Vec::new();
    for (order, handle) in transferred.iter().chain(in_flight).enumerate() {
        let texture = handle.lock();
        if texture.is_invalid() {
            continue;
        }
        let size = texture.target_size();
        outcome.total_target += size;
        let headroom = texture.unused_headroom();
        if headroom > 0 {
            outcome.headroom += headroom;
            reserved.push(handle.clone());
        }
        if texture.derezable() {
            heap.push(Candidate {
                size,
                order,
                handle: handle.clone(),
            });
        }
    }

    if outcome.is_over_budget() {
        for handle in reserved {
            let mut texture = handle.lock();
            let headroom = texture.unused_headroom();
            outcome.headroom = outcome.headroom.saturating_sub(headroom);
            match texture.trim_headroom() {
                Ok(_) => outcome.trimmed += 1,
                Err(err) => {
                    texture.fail(&err);
                    outcome.failed += 1;
                }
            }
        }
    }

    let mut shed: Vec<TextureHandle> = Vec::new();
    while outcome.is_over_budget() {
        let Some(candidate) = heap.pop() else {
            break;
        };
        let mut texture = candidate.handle.lock();
        let (freed, live) = texture.pre_derez();
        outcome.total_target -= freed;

        if live && texture.sync_state() != SyncState::Pending {
            outcome.deferred += 1;
            let weak = Arc::downgrade(&candidate.handle);
            if !deferred.iter().any(|queued| queued.ptr_eq(&weak)) {
                deferred.push(weak);
            }
        } else {
            outcome.demoted += 1;
            if !shed.iter().any(|handle| Arc::ptr_eq(handle, &candidate.handle)) {
                shed.push(candidate.handle.clone());
            }
        }

        if texture.derezable() {
            let size = texture.target_size();
            drop(texture);
            heap.push(Candidate { size, ..candidate });
        }
    }

    // One storage change per handle, however many mips it lost
    for handle in shed {
        let mut texture = handle.lock();
        if let Err(err) = texture.shed_to_target() {
            texture.fail(&err);
            outcome.failed += 1;
        }
    }

    if outcome.is_over_budget() {
        log::warn!(
            "Texture memory over budget at minimum residency: {} wanted, {} allowed",
            format_bytes(outcome.footprint()),
            format_bytes(allowed)
        );
    } else if outcome.demoted == 0 && outcome.deferred == 0 {
        promote_into_slack(transferred, &mut outcome);
    }

    outcome
}

/// Grow promotable handles, cheapest promotion first, while they fit
fn promote_into_slack(transferred: &[TextureHandle], outcome: &mut SweepOutcome) {
    let mut heap = BinaryHeap::new();
    for (order, handle) in transferred.iter().enumerate() {
        let texture = handle.lock();
        if !texture.is_invalid() && texture.promotable() {
            heap.push(Reverse((texture.promotion_cost(), order)));
        }
    }

    while let Some(Reverse((cost, order))) = heap.pop() {
        let slack = outcome.allowed.saturating_sub(outcome.footprint());
        if cost > slack {
            break;
        }
        let mut texture = transferred[order].lock();
        let (target, headroom) = (texture.target_size(), texture.unused_headroom());
        match texture.promote_within(slack) {
            Ok(()) => {
                outcome.total_target = outcome.total_target + texture.target_size() - target;
                outcome.headroom = outcome.headroom + texture.unused_headroom() - headroom;
                outcome.promoted += 1;
                if texture.promotable() {
                    heap.push(Reverse((texture.promotion_cost(), order)));
                }
            }
            Err(err) => {
                texture.fail(&err);
                outcome.failed += 1;
            }
        }
    }
}
