//! Sparse Page Bookkeeping
//!
//! Page geometry and commitment counts for sparse textures. Levels at least
//! one page wide are committed page by page; smaller levels form the mip
//! tail and stay committed for the life of the storage.

use glam::UVec3;

use crate::format;

/// Overhead applied to raw page bytes when accounting sparse memory
pub const SPARSE_PAGE_SIZE_OVERHEAD_ESTIMATE: f64 = 1.3;

/// Page geometry and commitment of one sparse texture
#[derive(Debug, Clone, PartialEq)]
pub struct SparseInfo {
    pub page_index: u32,
    pub page_dimensions: UVec3,
    /// Accounted bytes per page, overhead included
    pub page_bytes: u64,
    /// Last level committed page by page
    pub max_sparse_level: u16,
    pub allocated_pages: u64,
    pub max_pages: u64,
}

impl SparseInfo {
    /// Pick the first page size that evenly divides the texture
    ///
    /// A texture no page size divides cannot be sparse.
    pub fn select_page(page_sizes: &[UVec3], dimensions: UVec3) -> Option<(u32, UVec3)> {
        page_sizes
            .iter()
            .enumerate()
            .find(|(_, page)| {
                page.cmpgt(UVec3::ZERO).all()
                    && page.x <= dimensions.x
                    && page.y <= dimensions.y
                    && (dimensions % **page).cmpeq(UVec3::ZERO).all()
            })
            .map(|(index, page)| (index as u32, *page))
    }

    /// Build page bookkeeping for a texture
    ///
    /// The last page-granular level is estimated from the geometry and
    /// replaced by what the device reports once storage exists.
    pub fn new(
        page_index: u32,
        page_dimensions: UVec3,
        texel_bytes: u32,
        dimensions: UVec3,
        mip_count: u16,
        faces: u8,
    ) -> Self {
        let page_volume = u64::from(page_dimensions.x)
            * u64::from(page_dimensions.y)
            * u64::from(page_dimensions.z);
        let raw_page_bytes = page_volume * u64::from(texel_bytes);
        let page_bytes = (raw_page_bytes as f64 * SPARSE_PAGE_SIZE_OVERHEAD_ESTIMATE) as u64;

        let mut info = Self {
            page_index,
            page_dimensions,
            page_bytes,
            max_sparse_level: 0,
            allocated_pages: 0,
            max_pages: 0,
        };

        let sparse_levels = (0..mip_count)
            .take_while(|&mip| {
                let dims = format::mip_dimensions(dimensions, mip);
                dims.x >= page_dimensions.x && dims.y >= page_dimensions.y
            })
            .count() as u16;
        info.max_sparse_level = sparse_levels.saturating_sub(1);
        info.max_pages = (0..mip_count)
            .map(|mip| info.page_count(format::mip_dimensions(dimensions, mip)) * u64::from(faces))
            .sum();
        info
    }

    /// Set the last page-granular level from the device's sparse level count
    pub fn update_sparse_levels(&mut self, sparse_level_count: u16) {
        self.max_sparse_level = sparse_level_count.saturating_sub(1);
    }

    /// Pages per axis covering the given dimensions, partial pages rounded up
    pub fn page_counts(&self, dimensions: UVec3) -> UVec3 {
        dimensions / self.page_dimensions + (dimensions % self.page_dimensions).min(UVec3::ONE)
    }

    /// Total pages covering the given dimensions
    pub fn page_count(&self, dimensions: UVec3) -> u64 {
        let counts = self.page_counts(dimensions).as_u64vec3();
        counts.x * counts.y * counts.z
    }

    /// Record newly committed pages
    pub fn record_commit(&mut self, pages: u64) {
        self.allocated_pages += pages;
        assert!(
            self.allocated_pages <= self.max_pages,
            "committed {} pages of {}",
            self.allocated_pages,
            self.max_pages
        );
    }

    /// Record decommitted pages
    pub fn record_decommit(&mut self, pages: u64) {
        assert!(
            pages <= self.allocated_pages,
            "decommitting {} pages with {} allocated",
            pages,
            self.allocated_pages
        );
        self.allocated_pages -= pages;
    }

    /// Accounted size of the committed pages
    pub fn size(&self) -> u64 {
        self.allocated_pages * self.page_bytes
    }
}
