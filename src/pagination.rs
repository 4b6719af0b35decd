//! Page-number pagination over lazily evaluated result sources.

use async_trait::async_trait;
use serde::Serialize;

/// A result set that can be counted and sliced without materialising it.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;
    type Error: Send;

    async fn count(&self) -> Result<usize, Self::Error>;
    async fn slice(&self, offset: usize, limit: usize) -> Result<Vec<Self::Item>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub number: usize,
    pub num_pages: usize,
    pub count: usize,
    pub per_page: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
            per_page: self.per_page,
            has_next: self.has_next,
            has_previous: self.has_previous,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    per_page: usize,
}

impl Paginator {
    pub fn new(per_page: usize) -> Self {
        Self { per_page: per_page.max(1) }
    }

    /// Number of pages for `count` items; an empty set still has one page.
    pub fn num_pages(&self, count: usize) -> usize {
        count.div_ceil(self.per_page).max(1)
    }

    /// Resolve a raw page parameter: missing, non-integer or < 1 means page 1,
    /// past the end means the last page.
    pub fn resolve_number(&self, raw: Option<&str>, count: usize) -> usize {
        let last = self.num_pages(count);
        let Some(raw) = raw.map(str::trim) else { return 1 };
        match raw.parse::<i64>() {
            Ok(n) if n < 1 => 1,
            Ok(n) => usize::try_from(n).map_or(last, |n| n.min(last)),
            // too large for i64 but still a page number
            Err(_) if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => last,
            Err(_) => 1,
        }
    }

    pub async fn page<S: PageSource + ?Sized>(&self, source: &S, raw: Option<&str>) -> Result<Page<S::Item>, S::Error> {
        let count = source.count().await?;
        let number = self.resolve_number(raw, count);
        let num_pages = self.num_pages(count);
        let offset = (number - 1) * self.per_page;
        let items = if count == 0 { Vec::new() } else { source.slice(offset, self.per_page).await? };
        Ok(Page {
            number,
            num_pages,
            count,
            per_page: self.per_page,
            has_next: number < num_pages,
            has_previous: number > 1,
            items,
        })
    }
}
