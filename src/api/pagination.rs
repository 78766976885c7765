//! Purpose: Page arithmetic for select requests and the responses they produce.
//! Exports: `Pagination`, `Paginated`, `DEFAULT_PER_PAGE`.
//! Role: Plain value carried by `Response`; page helpers are a trait over that value.
//! Invariants: Pages are 1-based; non-positive inputs fall back to page 1 / 10 per page.

pub const DEFAULT_PER_PAGE: i64 = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn from_page(page: i64, per_page: i64) -> Self {
        let page = if page <= 0 { 1 } else { page };
        let per_page = if per_page <= 0 {
            DEFAULT_PER_PAGE
        } else {
            per_page
        };
        Self {
            offset: per_page.saturating_mul(page - 1),
            limit: per_page,
        }
    }
}

/// Page navigation over anything that knows its pagination and total hit count.
pub trait Paginated {
    fn pagination(&self) -> Option<Pagination>;
    fn total_count(&self) -> i64;

    fn per_page(&self) -> i64 {
        self.pagination()
            .map(|pagination| pagination.limit)
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_PER_PAGE)
    }

    fn current_page(&self) -> i64 {
        let offset = self.pagination().map(|p| p.offset).unwrap_or(0);
        (offset / self.per_page()).saturating_add(1)
    }

    fn total_pages(&self) -> i64 {
        let total = self.total_count().max(0);
        let per_page = self.per_page();
        (total / per_page + i64::from(total % per_page != 0)).max(1)
    }

    fn first_page(&self) -> i64 {
        1
    }

    fn last_page(&self) -> i64 {
        self.total_pages()
    }

    fn is_first_page(&self) -> bool {
        self.current_page() == 1
    }

    fn is_last_page(&self) -> bool {
        self.current_page() >= self.total_pages()
    }

    fn previous_page(&self) -> Option<i64> {
        (!self.is_first_page()).then(|| self.current_page() - 1)
    }

    fn next_page(&self) -> Option<i64> {
        (!self.is_last_page()).then(|| self.current_page() + 1)
    }
}

impl Paginated for crate::api::Response {
    fn pagination(&self) -> Option<Pagination> {
        crate::api::Response::pagination(self)
    }

    fn total_count(&self) -> i64 {
        self.select().map(|result| result.n_hits).unwrap_or(0)
    }
}
