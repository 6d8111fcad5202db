//! Interface to the external file-catalog service.
//!
//! The executor core never inspects the catalog's internals: it issues a
//! [`FilterQuery`] and uses the resulting paths as command arguments.

use std::path::PathBuf;

/// Query against the dataset catalog. All fields are optional filters.
#[derive(Debug, Clone, Default)]
pub struct FilterQuery {
    pub subject: Option<String>,
    pub session: Option<String>,
    pub modal: Option<String>,
    pub annotation: Option<String>,
    pub regex: Option<String>,
    pub regex_ignore: Option<String>,
    pub ext: Option<String>,
}

impl FilterQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn modal(mut self, modal: impl Into<String>) -> Self {
        self.modal = Some(modal.into());
        self
    }

    pub fn annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    pub fn regex_ignore(mut self, regex_ignore: impl Into<String>) -> Self {
        self.regex_ignore = Some(regex_ignore.into());
        self
    }

    pub fn ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }
}

/// The consumed contract of the file-catalog service.
pub trait FileCatalog: Send + Sync {
    /// Resolve a query to the matching file paths.
    fn filter(&self, query: &FilterQuery) -> Vec<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticCatalog(Vec<PathBuf>);

    impl FileCatalog for StaticCatalog {
        fn filter(&self, query: &FilterQuery) -> Vec<PathBuf> {
            self.0
                .iter()
                .filter(|p| match &query.ext {
                    Some(ext) => p.extension().is_some_and(|e| e == ext.as_str()),
                    None => true,
                })
                .cloned()
                .collect()
        }
    }

    #[test]
    fn filter_query_builder() {
        let query = FilterQuery::new().subject("sub-01").ext("nii");
        assert_eq!(query.subject.as_deref(), Some("sub-01"));
        assert_eq!(query.ext.as_deref(), Some("nii"));
        assert!(query.regex.is_none());
    }

    #[test]
    fn catalog_results_are_plain_paths() {
        let catalog = StaticCatalog(vec![
            PathBuf::from("/data/sub-01/anat.nii"),
            PathBuf::from("/data/sub-01/notes.txt"),
        ]);
        let paths = catalog.filter(&FilterQuery::new().ext("nii"));
        assert_eq!(paths, vec![PathBuf::from("/data/sub-01/anat.nii")]);
    }
}
