//! Variable Allocations
//!
//! Growing and shrinking the resident mip range of dense and sparse
//! handles.
//!
//! Dense storage holds exactly the allocated range, so every change of
//! `allocated_mip` creates a new object and copies the retained mips over,
//! most detailed first. Sparse storage spans the full chain and only
//! commits or decommits the pages of one level.
//!
//! A dense promotion may reserve finer levels before they are populated.
//! Those bytes count toward the handle's [`footprint`](DeviceTexture::footprint)
//! until they are filled or trimmed.

use crate::device::TextureRegion;
use crate::format;
use crate::handle::{AllocationKind, DeviceTexture, SyncState};
use crate::TextureResult;

/// Extra levels allocated beyond immediate need when dense storage grows
pub const PROMOTION_HEADROOM: u16 = 2;

impl DeviceTexture {
    /// Whether one more mip can be shed to free memory
    pub fn derezable(&self) -> bool {
        self.is_variable() && !self.is_failed() && self.target_min_mip < self.derez_limit()
    }

    /// Give up the finest wanted mip in the budget decision
    ///
    /// Returns the bytes this frees from the target size and whether the
    /// mip is live, i.e. already populated and possibly being sampled.
    pub fn pre_derez(&mut self) -> (u64, bool) {
        assert!(self.derezable(), "texture {} is not derezable", self.id);
        let freed = self.mip_size(self.target_min_mip);
        let live = self
            .populated_mip
            .is_some_and(|populated| populated <= self.target_min_mip);
        self.target_min_mip += 1;
        (freed, live)
    }

    /// Shrink storage so it starts at the target mip
    ///
    /// Applies every pending one-level [`demote`](Self::demote) step at
    /// once: dense storage is reallocated a single time however many mips
    /// the target dropped.
    pub fn shed_to_target(&mut self) -> TextureResult<()> {
        if !self.is_variable() || self.object.is_none() || self.allocated_mip >= self.target_min_mip {
            return Ok(());
        }
        self.shrink_storage(self.target_min_mip)?;
        log::debug!(
            "Texture {} ({}) shed to mip {}, {} resident",
            self.id,
            self.label,
            self.allocated_mip,
            mipflow_core::format_bytes(self.resident_size)
        );
        Ok(())
    }

    /// Shrink the populated range by exactly one mip
    ///
    /// Dense storage is reallocated without headroom and the evicted mip is
    /// not copied.
    pub fn demote(&mut self) -> TextureResult<()> {
        assert!(self.is_variable(), "demoting a fixed texture {}", self.id);
        let resident = self.populated_mip.unwrap_or(self.allocated_mip).max(self.allocated_mip);
        let next = resident + 1;
        assert!(
            next <= self.derez_limit(),
            "demoting texture {} past its floor {}",
            self.id,
            self.derez_limit()
        );

        self.shrink_storage(next)?;
        self.target_min_mip = self.target_min_mip.max(self.allocated_mip);
        log::trace!("Texture {} ({}) demoted to mip {}", self.id, self.label, next);
        Ok(())
    }

    fn shrink_storage(&mut self, allocated_mip: u16) -> TextureResult<()> {
        match self.kind() {
            AllocationKind::Dense => self.reallocate(allocated_mip)?,
            AllocationKind::Sparse => self.commit_to(allocated_mip)?,
            _ => unreachable!(),
        }
        self.populated_mip = self
            .populated_mip
            .map(|populated| populated.max(self.allocated_mip));
        self.sync_sampler()?;
        self.update_size();
        Ok(())
    }

    /// Bytes of dense storage reserved finer than both the populated and
    /// the target mips
    ///
    /// Only settled handles report headroom; an uploading handle fills its
    /// allocation coarsest first.
    pub fn unused_headroom(&self) -> u64 {
        match self.headroom_floor() {
            Some(kept) => self.range_size(self.allocated_mip) - self.range_size(kept),
            None => 0,
        }
    }

    /// First mip storage must keep when headroom is released
    fn headroom_floor(&self) -> Option<u16> {
        if self.kind() != AllocationKind::Dense
            || self.object.is_none()
            || self.sync_state == SyncState::Pending
        {
            return None;
        }
        self.populated_mip
            .map(|populated| populated.min(self.target_min_mip))
            .filter(|&kept| kept > self.allocated_mip)
    }

    /// Bytes the budget charges this handle: its target plus unused headroom
    pub fn footprint(&self) -> u64 {
        self.target_size() + self.unused_headroom()
    }

    /// Release unused headroom without touching populated mips
    ///
    /// Returns the bytes freed.
    pub fn trim_headroom(&mut self) -> TextureResult<u64> {
        let headroom = self.unused_headroom();
        let Some(kept) = self.headroom_floor() else {
            return Ok(0);
        };
        self.reallocate(kept)?;
        self.sync_sampler()?;
        log::debug!(
            "Texture {} ({}) trimmed {} of headroom",
            self.id,
            self.label,
            mipflow_core::format_bytes(headroom)
        );
        Ok(headroom)
    }

    /// Whether the next finer mip can be made resident
    pub fn promotable(&self) -> bool {
        if !self.is_variable() || self.is_failed() || self.sync_state == SyncState::Pending {
            return false;
        }
        let Some(populated) = self.populated_mip else {
            return false;
        };
        if populated == 0 || populated != self.target_min_mip {
            return false;
        }
        self.source()
            .is_some_and(|texture| texture.is_mip_available(populated - 1))
    }

    /// Bytes one promotion adds to the footprint, without headroom
    ///
    /// Filling a level that is already allocated costs nothing.
    pub fn promotion_cost(&self) -> u64 {
        let Some(needed) = self.populated_mip.filter(|&mip| mip > 0).map(|mip| mip - 1) else {
            return 0;
        };
        if needed >= self.allocated_mip {
            return 0;
        }
        match self.kind() {
            AllocationKind::Dense => self.range_size(needed).saturating_sub(self.resident_size),
            _ => self.mip_size(needed),
        }
    }

    /// Make one more detailed mip resident
    ///
    /// Dense storage that has no room for it is reallocated with up to
    /// [`PROMOTION_HEADROOM`] extra levels.
    pub fn promote(&mut self) -> TextureResult<()> {
        self.promote_within(u64::MAX)
    }

    /// Make one more detailed mip resident, growing the footprint by at most `slack`
    ///
    /// Headroom is reduced until the new dense allocation fits; the caller
    /// checks that [`promotion_cost`](Self::promotion_cost) fits first.
    pub fn promote_within(&mut self, slack: u64) -> TextureResult<()> {
        assert!(self.is_variable(), "promoting a fixed texture {}", self.id);
        let populated = self
            .populated_mip
            .filter(|&mip| mip > 0)
            .unwrap_or_else(|| panic!("texture {} has no finer mip to promote", self.id));
        let needed = populated - 1;
        let Some(texture) = self.source() else {
            return Ok(());
        };

        if needed < self.allocated_mip {
            match self.kind() {
                AllocationKind::Dense => {
                    let extra = (0..=needed.min(PROMOTION_HEADROOM))
                        .rev()
                        .find(|&extra| {
                            self.range_size(needed - extra)
                                .saturating_sub(self.resident_size)
                                <= slack
                        })
                        .unwrap_or(0);
                    self.reallocate(needed - extra)?
                }
                AllocationKind::Sparse => self.commit_to(needed)?,
                _ => unreachable!(),
            }
        }

        self.upload_mip(&texture, needed)?;
        self.populated_mip = Some(needed);
        self.target_min_mip = self.target_min_mip.min(needed);
        self.sync_sampler()?;
        self.update_size();
        log::trace!("Texture {} ({}) promoted to mip {}", self.id, self.label, needed);
        Ok(())
    }

    /// Replace dense storage with one starting at `allocated_mip`
    ///
    /// Populated mips inside the new range are copied forward face by face,
    /// most detailed first. The old object is destroyed only after the copy
    /// succeeded.
    pub(crate) fn reallocate(&mut self, allocated_mip: u16) -> TextureResult<()> {
        assert!(
            allocated_mip <= self.max_mip,
            "allocating texture {} from mip {} past its last mip {}",
            self.id,
            allocated_mip,
            self.max_mip
        );
        let old_object = self.object;
        let old_allocated = self.allocated_mip;
        let new_object = self.create_storage(allocated_mip, None)?;

        if let (Some(old_object), Some(populated)) = (old_object, self.populated_mip) {
            for mip in populated.max(allocated_mip)..=self.max_mip {
                let extent = format::mip_dimensions(self.dimensions, mip);
                for face in 0..self.target.faces {
                    let region = TextureRegion::face(mip - old_allocated, face, extent);
                    if let Err(err) =
                        self.device
                            .copy_region(old_object, &region, new_object, mip - allocated_mip)
                    {
                        self.device.destroy_texture(new_object);
                        return Err(err.into());
                    }
                }
            }
        }

        self.object = Some(new_object);
        self.allocated_mip = allocated_mip;
        if let Some(old_object) = old_object {
            self.device.destroy_texture(old_object);
        }
        self.populated_mip = self.populated_mip.map(|populated| populated.max(allocated_mip));
        self.update_size();
        Ok(())
    }
}
