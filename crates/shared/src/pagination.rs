//! Page/offset pagination shared by every list endpoint

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("page must be at least 1")]
    InvalidPage,
    #[error("per_page must be between 1 and {MAX_PER_PAGE}")]
    InvalidPerPage,
}

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub per_page: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Page {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Result<Self, PageError> {
        let page = page.unwrap_or(1);
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);

        if page < 1 {
            return Err(PageError::InvalidPage);
        }
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(PageError::InvalidPerPage);
        }

        Ok(Self { page, per_page })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    /// Cut one page out of an already-ordered, fully materialized list.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let start = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let len = usize::try_from(self.per_page).unwrap_or(0);
        items.iter().skip(start).take(len).cloned().collect()
    }
}

/// One page of results plus the counters the dashboard needs.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub has_more: bool,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, page: Page) -> Self {
        let returned = items.len() as i64;
        Self {
            has_more: page.offset() + returned < total,
            items,
            total,
            page: page.page,
            per_page: page.per_page,
        }
    }
}
