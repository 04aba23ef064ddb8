//! Case filtering for nestrun.
//!
//! A filter decides which cases are part of the run, based on their fully
//! qualified title. Cases that do not match are removed from the run entirely:
//! they get no record and their body never runs. They still count as a
//! started child of their group, so the skip boundary of a group does not
//! depend on which filter is active.
//!
//! This is different to skipping: a skipped case still "exists" in the run,
//! shows up with a skip line and is counted in the summary.
//!
//! Implement [`CaseFilter`] to define a filter strategy.

/// A strategy for selecting which cases are included in a run.
pub trait CaseFilter {
    /// Whether the case with this fully qualified title should run.
    fn matches(&self, title: &str) -> bool;

    /// The text shown in the run start banner, if this filter restricts anything.
    fn banner(&self) -> Option<&str> {
        None
    }
}

/// A [`CaseFilter`] that keeps every case.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NoFilter;

impl CaseFilter for NoFilter {
    fn matches(&self, _: &str) -> bool {
        true
    }
}

/// Keeps cases whose title contains a literal, case sensitive substring.
///
/// An empty substring keeps every case.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubstringFilter {
    needle: String,
}

impl SubstringFilter {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }
}

impl CaseFilter for SubstringFilter {
    fn matches(&self, title: &str) -> bool {
        title.contains(&self.needle)
    }

    fn banner(&self) -> Option<&str> {
        match self.needle.is_empty() {
            true => None,
            false => Some(&self.needle),
        }
    }
}

impl<F: CaseFilter + ?Sized> CaseFilter for Box<F> {
    fn matches(&self, title: &str) -> bool {
        (**self).matches(title)
    }

    fn banner(&self) -> Option<&str> {
        (**self).banner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_is_literal_and_case_sensitive() {
        let filter = SubstringFilter::new("Group A › t");
        assert!(filter.matches("Group A › test 1"));
        assert!(!filter.matches("group a › test 1"));
        assert!(!filter.matches("Group B › test 1"));

        let dots = SubstringFilter::new("a.c");
        assert!(dots.matches("xa.cx"));
        assert!(!dots.matches("abc"));
    }

    #[test]
    fn empty_means_no_filter() {
        let filter = SubstringFilter::new("");
        assert!(filter.is_empty());
        assert!(filter.matches("anything"));
        assert_eq!(filter.banner(), None);
        assert_eq!(SubstringFilter::new("x").banner(), Some("x"));
    }

    #[test]
    fn no_filter_keeps_all() {
        assert!(NoFilter.matches(""));
        assert_eq!(NoFilter.banner(), None);
    }
}
