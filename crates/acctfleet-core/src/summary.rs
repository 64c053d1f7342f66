//! Bounded, category-grouped result summaries.
//!
//! Every user-facing operation reports counts plus at most
//! [`MAX_REASON_CATEGORIES`] failure categories, each with a count and one
//! example message, so a caller can render one line per category.

use std::fmt;

use serde::Serialize;

pub const MAX_REASON_CATEGORIES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasonCount {
    pub category: String,
    pub count: usize,
    pub example: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub accepted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub reasons: Vec<ReasonCount>,
    /// Categories dropped because of the category cap.
    pub omitted_categories: usize,
}

impl Summary {
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.failed == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted {}, skipped {}, failed {}",
            self.accepted, self.skipped, self.failed
        )?;
        for reason in &self.reasons {
            write!(
                f,
                "\n  {} x{}: {}",
                reason.category, reason.count, reason.example
            )?;
        }
        if self.omitted_categories > 0 {
            write!(f, "\n  ... {} more categories", self.omitted_categories)?;
        }
        Ok(())
    }
}

/// Accumulates outcomes; keeps one example per category.
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    accepted: usize,
    skipped: usize,
    failed: usize,
    reasons: Vec<ReasonCount>,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, n: usize) -> &mut Self {
        self.accepted += n;
        self
    }

    pub fn skip(&mut self, category: &str, example: impl fmt::Display) -> &mut Self {
        self.skipped += 1;
        self.note(category, example);
        self
    }

    pub fn fail(&mut self, category: &str, example: impl fmt::Display) -> &mut Self {
        self.failed += 1;
        self.note(category, example);
        self
    }

    fn note(&mut self, category: &str, example: impl fmt::Display) {
        match self.reasons.iter_mut().find(|r| r.category == category) {
            Some(reason) => reason.count += 1,
            None => self.reasons.push(ReasonCount {
                category: category.to_string(),
                count: 1,
                example: example.to_string(),
            }),
        }
    }

    /// Most frequent categories first; ties keep first-seen order.
    pub fn build(mut self) -> Summary {
        self.reasons.sort_by(|a, b| b.count.cmp(&a.count));
        let omitted_categories = self.reasons.len().saturating_sub(MAX_REASON_CATEGORIES);
        self.reasons.truncate(MAX_REASON_CATEGORIES);
        Summary {
            accepted: self.accepted,
            skipped: self.skipped,
            failed: self.failed,
            reasons: self.reasons,
            omitted_categories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_category_and_keeps_first_example() {
        let mut b = SummaryBuilder::new();
        b.accept(3);
        b.skip("empty_field", "line 2: a");
        b.skip("empty_field", "line 5: b");
        b.fail("timeout", "alice");
        let s = b.build();
        assert_eq!((s.accepted, s.skipped, s.failed), (3, 2, 1));
        assert_eq!(s.reasons[0].category, "empty_field");
        assert_eq!(s.reasons[0].count, 2);
        assert_eq!(s.reasons[0].example, "line 2: a");
        assert_eq!(s.reasons[1].category, "timeout");
        assert!(!s.is_clean());
    }

    #[test]
    fn category_list_is_bounded() {
        let mut b = SummaryBuilder::new();
        for i in 0..(MAX_REASON_CATEGORIES + 3) {
            b.fail(&format!("cat{i}"), i);
        }
        let s = b.build();
        assert_eq!(s.reasons.len(), MAX_REASON_CATEGORIES);
        assert_eq!(s.omitted_categories, 3);
        assert_eq!(s.failed, MAX_REASON_CATEGORIES + 3);
        assert!(s.to_string().contains("3 more categories"));
    }

    #[test]
    fn display_one_line_per_category() {
        let mut b = SummaryBuilder::new();
        b.accept(1).skip("x", "why");
        assert_eq!(b.build().to_string(), "accepted 1, skipped 1, failed 0\n  x x1: why");
    }
}
