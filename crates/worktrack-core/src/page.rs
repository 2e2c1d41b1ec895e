//! Pagination links for filtered list results.
//!
//! Links are aligned on a grid of `limit`-sized pages anchored at offset 0:
//!
//! - `first` is always `(0, L)`, even for an empty result.
//! - `last` is `(floor((T - 1) / L) * L, L)` when `T > 0`, absent otherwise.
//! - `prev` is `(max(0, O - L), L)` when `O > 0`.
//! - `next` is `(O + L, L)` when `O + L < T`.
//!
//! An out-of-range offset still gets links computed from the requested
//! offset and the total, so callers can navigate back to valid pages.

use serde::Serialize;

use crate::config::PagingConfig;

/// A normalized `(offset, limit)` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Normalize raw wire parameters.
    ///
    /// A missing, non-numeric or negative offset becomes 0. A missing or
    /// non-positive limit becomes `default_limit`; a limit above
    /// `max_limit` is clamped to it.
    #[must_use]
    pub fn normalize(offset: Option<&str>, limit: Option<i64>, paging: &PagingConfig) -> Self {
        let offset = offset
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|o| u64::try_from(o).ok())
            .unwrap_or(0);
        let limit = match limit.and_then(|l| u64::try_from(l).ok()) {
            None | Some(0) => paging.default_limit,
            Some(l) => l.min(paging.max_limit),
        };
        Self { offset, limit }
    }
}

/// One navigation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageLink {
    pub offset: u64,
    pub limit: u64,
}

impl PageLink {
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Query-string form: `offset=<O>&limit=<L>`.
    #[must_use]
    pub fn query(&self) -> String {
        format!("offset={}&limit={}", self.offset, self.limit)
    }

    /// Absolute URL for this page of `collection_url`.
    #[must_use]
    pub fn absolute(&self, collection_url: &str) -> String {
        let sep = if collection_url.contains('?') { '&' } else { '?' };
        format!("{collection_url}{sep}{}", self.query())
    }
}

/// Navigation links for one page of a list result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub first: PageLink,
    pub prev: Option<PageLink>,
    pub next: Option<PageLink>,
    pub last: Option<PageLink>,
}

impl PageWindow {
    /// Compute links for `request` over `total` matching records.
    #[must_use]
    pub fn compute(request: PageRequest, total: u64) -> Self {
        let PageRequest { offset, limit } = request;
        let limit = limit.max(1);

        let first = PageLink::new(0, limit);
        let last = (total > 0).then(|| PageLink::new((total - 1) / limit * limit, limit));
        let prev = (offset > 0).then(|| PageLink::new(offset.saturating_sub(limit), limit));
        let next = offset
            .checked_add(limit)
            .filter(|end| *end < total)
            .map(|end| PageLink::new(end, limit));

        Self {
            first,
            prev,
            next,
            last,
        }
    }

    /// Render every present link as an absolute URL.
    #[must_use]
    pub fn links(&self, collection_url: &str) -> PageLinks {
        PageLinks {
            first: self.first.absolute(collection_url),
            prev: self.prev.map(|l| l.absolute(collection_url)),
            next: self.next.map(|l| l.absolute(collection_url)),
            last: self.last.map(|l| l.absolute(collection_url)),
        }
    }
}

/// Absolute pagination URLs, as embedded in list documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLinks {
    pub first: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}
