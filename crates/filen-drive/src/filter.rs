//! Include/exclude glob filters.
//!
//! Patterns match the path relative to the operation root (slash-separated).
//! A file is included iff it matches at least one include pattern (or the
//! include list is empty) and matches no exclude pattern.

use filen_core::{FilenError, FilenResult};
use glob::Pattern;

#[derive(Debug, Default)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> FilenResult<Self> {
        Ok(PathFilter {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(rel_path)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(rel_path))
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

fn compile(patterns: &[String]) -> FilenResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| FilenError::Fatal(format!("invalid pattern {p:?}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str]) -> PathFilter {
        PathFilter::new(
            &include.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &exclude.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn empty_filter_includes_everything() {
        let f = filter(&[], &[]);
        assert!(f.matches("a.txt"));
        assert!(f.matches("deep/nested/b.bin"));
    }

    #[test]
    fn include_only() {
        let f = filter(&["*.pdf"], &[]);
        assert!(f.matches("report.pdf"));
        assert!(!f.matches("report.txt"));
    }

    #[test]
    fn exclude_beats_include() {
        let f = filter(&["*.pdf"], &["draft_*"]);
        assert!(f.matches("final.pdf"));
        assert!(!f.matches("draft_final.pdf"));
        assert!(!f.matches("notes.txt"));
    }

    #[test]
    fn multiple_includes_are_a_union() {
        let f = filter(&["*.jpg", "*.png"], &[]);
        assert!(f.matches("a.jpg"));
        assert!(f.matches("b.png"));
        assert!(!f.matches("c.gif"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let err = PathFilter::new(&["[".to_string()], &[]).unwrap_err();
        assert_eq!(err.kind(), "fatal");
    }
}
