/// Fixed estimate for the page envelope (flags, cursor, brackets)
pub const PAGE_BASE_OVERHEAD: usize = 128;

/// Byte budget for one response page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseBudget {
    limit: usize,
    base_overhead: usize,
}

impl ResponseBudget {
    pub fn new(limit: usize) -> Self {
        ResponseBudget {
            limit,
            base_overhead: PAGE_BASE_OVERHEAD,
        }
    }

    pub fn with_base_overhead(mut self, base_overhead: usize) -> Self {
        self.base_overhead = base_overhead;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn start_page(&self) -> PagePacker {
        PagePacker {
            used: self.base_overhead,
            limit: self.limit,
            rows: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Include,
    /// Hold the row for the next page
    Defer,
}

/// Running size estimate of the page being filled.
///
/// A row is deferred when it would bring the estimate to the limit or
/// beyond, except the first row of a page which is always taken so every
/// page makes progress.
#[derive(Debug, Clone)]
pub struct PagePacker {
    used: usize,
    limit: usize,
    rows: usize,
}

impl PagePacker {
    pub fn offer(&mut self, row_size: usize) -> Admission {
        if self.rows > 0 && self.used + row_size >= self.limit {
            return Admission::Defer;
        }
        self.used += row_size;
        self.rows += 1;
        Admission::Include
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}
