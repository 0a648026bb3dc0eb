//! Interval set algebra over half-open timespans
//!
//! Instants are integer seconds, so every operation is exact and two runs
//! over the same inputs produce identical span boundaries.
//!
//! An [`IntervalSet`] is kept canonical at all times: spans are sorted by
//! start, pairwise disjoint, and never adjoin (touching spans are merged on
//! insertion). `insert` and `remove` are the only paths that change the span
//! list; union, subtraction and intersection are built from them.

use std::ops::ControlFlow;

use crate::{ReaperError, Result};

/// A half-open span `[start, end)` of integer seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timespan {
    pub start: i64,
    pub end: i64,
}

impl Timespan {
    /// Create a span, rejecting `end < start`. Zero-length spans are allowed.
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if end < start {
            return Err(ReaperError::InvalidSpan { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, t: i64) -> bool {
        self.start <= t && t < self.end
    }

    /// Intersection with `[lo, hi)`, or `None` when it is empty
    fn clip(&self, lo: i64, hi: i64) -> Option<Timespan> {
        let start = self.start.max(lo);
        let end = self.end.min(hi);
        (start < end).then_some(Timespan { start, end })
    }
}

/// Canonical set of disjoint, non-adjoining timespans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    spans: Vec<Timespan>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set by inserting each `(start, end)` pair in turn
    pub fn from_spans(spans: impl IntoIterator<Item = (i64, i64)>) -> Result<Self> {
        let mut set = Self::new();
        for (start, end) in spans {
            set.insert(start, end)?;
        }
        Ok(set)
    }

    /// The canonical spans, in ascending order
    pub fn spans(&self) -> &[Timespan] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Whether instant `t` lies inside one of the spans
    pub fn contains(&self, t: i64) -> bool {
        let idx = self.spans.partition_point(|s| s.end <= t);
        self.spans.get(idx).is_some_and(|s| s.contains(t))
    }

    /// Add `[start, end)`, merging with every overlapping or adjoining span.
    pub fn insert(&mut self, start: i64, end: i64) -> Result<()> {
        let span = Timespan::new(start, end)?;
        if span.is_empty() {
            return Ok(());
        }

        // Spans whose end reaches `start` and whose start does not pass `end`
        // overlap or touch the new one.
        let lo = self.spans.partition_point(|s| s.end < start);
        let hi = self.spans.partition_point(|s| s.start <= end);

        if lo < hi {
            let merged = Timespan {
                start: start.min(self.spans[lo].start),
                end: end.max(self.spans[hi - 1].end),
            };
            self.spans.splice(lo..hi, std::iter::once(merged));
        } else {
            self.spans.insert(lo, span);
        }
        Ok(())
    }

    /// Remove `[start, end)`, shrinking or splitting any span it overlaps.
    pub fn remove(&mut self, start: i64, end: i64) -> Result<()> {
        let span = Timespan::new(start, end)?;
        if span.is_empty() {
            return Ok(());
        }

        let lo = self.spans.partition_point(|s| s.end <= start);
        let hi = self.spans.partition_point(|s| s.start < end);
        if lo >= hi {
            return Ok(());
        }

        let first = self.spans[lo];
        let last = self.spans[hi - 1];
        let mut remainder = Vec::with_capacity(2);
        if first.start < start {
            remainder.push(Timespan {
                start: first.start,
                end: start,
            });
        }
        if last.end > end {
            remainder.push(Timespan {
                start: end,
                end: last.end,
            });
        }
        self.spans.splice(lo..hi, remainder);
        Ok(())
    }

    pub fn union_with(&mut self, other: &IntervalSet) {
        for span in &other.spans {
            self.insert_trusted(*span);
        }
    }

    pub fn subtract_with(&mut self, other: &IntervalSet) {
        for span in &other.spans {
            self.remove_trusted(*span);
        }
    }

    /// Keep only what is also covered by `other`: `self - (self - other)`
    pub fn intersect_with(&mut self, other: &IntervalSet) {
        let outside = self.subtract(other);
        self.subtract_with(&outside);
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    pub fn subtract(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = self.clone();
        out.subtract_with(other);
        out
    }

    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = self.clone();
        out.intersect_with(other);
        out
    }

    /// Spans clipped to `[window_start, window_end)`, in ascending order.
    ///
    /// The iterator is cheap to clone; calling this again restarts the walk.
    pub fn spans_between(&self, window_start: i64, window_end: i64) -> SpansBetween<'_> {
        let idx = if window_end > window_start {
            self.spans.partition_point(|s| s.end <= window_start)
        } else {
            self.spans.len()
        };
        SpansBetween {
            spans: &self.spans[idx..],
            window_start,
            window_end,
        }
    }

    /// Visit each clipped span in order until the visitor breaks.
    ///
    /// Returns the visitor's `Break` value, or `Continue` once every span
    /// has been seen.
    pub fn for_each_span<B, F>(
        &self,
        window_start: i64,
        window_end: i64,
        mut visitor: F,
    ) -> ControlFlow<B>
    where
        F: FnMut(i64, i64) -> ControlFlow<B>,
    {
        for span in self.spans_between(window_start, window_end) {
            if let ControlFlow::Break(value) = visitor(span.start, span.end) {
                return ControlFlow::Break(value);
            }
        }
        ControlFlow::Continue(())
    }

    /// Sum of span durations inside `[window_start, window_end)`
    pub fn total_covered_seconds(&self, window_start: i64, window_end: i64) -> i64 {
        self.spans_between(window_start, window_end)
            .map(|s| s.duration())
            .sum()
    }

    // Spans taken from another canonical set are never reversed.
    fn insert_trusted(&mut self, span: Timespan) {
        if let Err(e) = self.insert(span.start, span.end) {
            tracing::error!(error = %e, "Canonical span rejected on insert");
        }
    }

    fn remove_trusted(&mut self, span: Timespan) {
        if let Err(e) = self.remove(span.start, span.end) {
            tracing::error!(error = %e, "Canonical span rejected on remove");
        }
    }
}

/// Iterator over the spans of an [`IntervalSet`] clipped to a window
#[derive(Debug, Clone)]
pub struct SpansBetween<'a> {
    spans: &'a [Timespan],
    window_start: i64,
    window_end: i64,
}

impl Iterator for SpansBetween<'_> {
    type Item = Timespan;

    fn next(&mut self) -> Option<Timespan> {
        let (first, rest) = self.spans.split_first()?;
        if first.start >= self.window_end {
            self.spans = &[];
            return None;
        }
        self.spans = rest;
        first.clip(self.window_start, self.window_end)
    }
}
