//! Page window arithmetic for comment listings.
//!
//! Requested pages outside the valid range are clamped, never rejected: a
//! client asking for page 9 of a 4-page listing gets page 4.

use serde::{Deserialize, Serialize};

/// Number of page links shown in one navigation block.
pub const DEFAULT_PAGE_BLOCK: u64 = 10;

/// Resolved page window plus the navigation block it falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationWindow {
    pub total_count: u64,
    pub requested_page: i64,
    pub page_size: u64,
    pub total_pages: u64,
    /// Effective page, always within `[1, max(total_pages, 1)]`.
    pub page: u64,
    pub offset: u64,
    pub limit: u64,
    pub start_page: u64,
    pub end_page: u64,
    pub has_prev: bool,
    pub has_next: bool,
}

impl PaginationWindow {
    /// Window with the default navigation block.
    pub fn compute(total_count: u64, requested_page: i64, page_size: u64) -> Self {
        Self::compute_with_block(total_count, requested_page, page_size, DEFAULT_PAGE_BLOCK)
    }

    pub fn compute_with_block(
        total_count: u64,
        requested_page: i64,
        page_size: u64,
        block_size: u64,
    ) -> Self {
        let page_size = page_size.max(1);
        let block_size = block_size.max(1);
        let total_pages = total_count.div_ceil(page_size);
        let last_page = total_pages.max(1);

        let page = if requested_page < 1 {
            1
        } else {
            (requested_page as u64).min(last_page)
        };
        let offset = (page - 1) * page_size;

        let start_page = ((page - 1) / block_size) * block_size + 1;
        let end_page = (start_page + block_size - 1).min(last_page);

        Self {
            total_count,
            requested_page,
            page_size,
            total_pages,
            page,
            offset,
            limit: page_size,
            start_page,
            end_page,
            has_prev: start_page > 1,
            has_next: end_page < total_pages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_pages == 0
    }
}

/// Paging query parameters as they arrive on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: Option<i64>,
    pub page_size: Option<u64>,
}

/// Defaults and bounds applied to a [`PageRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    pub default_page_size: u64,
    pub max_page_size: u64,
    pub block_size: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self { default_page_size: 10, max_page_size: 50, block_size: DEFAULT_PAGE_BLOCK }
    }
}

impl PagingConfig {
    pub fn window(&self, total_count: u64, req: &PageRequest) -> PaginationWindow {
        let size = req
            .page_size
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1));
        PaginationWindow::compute_with_block(total_count, req.page.unwrap_or(1), size, self.block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_past_last_page() {
        let w = PaginationWindow::compute(37, 5, 10);
        assert_eq!(w.total_pages, 4);
        assert_eq!(w.page, 4);
        assert_eq!(w.offset, 30);
        assert_eq!(w.limit, 10);
    }

    #[test]
    fn empty_listing() {
        let w = PaginationWindow::compute(0, 3, 10);
        assert_eq!(w.total_pages, 0);
        assert_eq!(w.page, 1);
        assert_eq!(w.offset, 0);
        assert_eq!(w.limit, 10);
        assert!(w.is_empty());
        assert!(!w.has_next);
        assert!(!w.has_prev);
    }

    #[test]
    fn zero_and_negative_pages_clamp_to_first() {
        for requested in [0, -1, i64::MIN] {
            let w = PaginationWindow::compute(25, requested, 10);
            assert_eq!(w.page, 1, "requested {requested}");
            assert_eq!(w.offset, 0);
        }
    }

    #[test]
    fn exact_multiple_has_no_trailing_page() {
        let w = PaginationWindow::compute(30, 3, 10);
        assert_eq!(w.total_pages, 3);
        assert_eq!(w.page, 3);
        assert_eq!(w.offset, 20);
    }

    #[test]
    fn invariants_hold_over_a_grid() {
        for total in [0u64, 1, 9, 10, 11, 99, 100, 101] {
            for size in [1u64, 3, 10, 50] {
                for requested in [-5i64, 0, 1, 2, 7, 1000] {
                    let w = PaginationWindow::compute(total, requested, size);
                    assert!(w.page >= 1 && w.page <= w.total_pages.max(1));
                    assert_eq!(w.offset, (w.page - 1) * size);
                    assert!(w.start_page <= w.page && w.page <= w.end_page);
                }
            }
        }
    }

    #[test]
    fn navigation_block() {
        let w = PaginationWindow::compute_with_block(250, 12, 10, 10);
        assert_eq!(w.total_pages, 25);
        assert_eq!(w.start_page, 11);
        assert_eq!(w.end_page, 20);
        assert!(w.has_prev);
        assert!(w.has_next);

        let last = PaginationWindow::compute_with_block(250, 25, 10, 10);
        assert_eq!(last.start_page, 21);
        assert_eq!(last.end_page, 25);
        assert!(!last.has_next);
    }

    #[test]
    fn config_bounds_page_size() {
        let cfg = PagingConfig { default_page_size: 10, max_page_size: 20, block_size: 5 };
        let w = cfg.window(100, &PageRequest { page: Some(2), page_size: Some(500) });
        assert_eq!(w.page_size, 20);
        assert_eq!(w.offset, 20);

        let w = cfg.window(100, &PageRequest { page: None, page_size: Some(0) });
        assert_eq!(w.page_size, 1);
        assert_eq!(w.page, 1);

        let w = cfg.window(100, &PageRequest::default());
        assert_eq!(w.page_size, 10);
    }
}
