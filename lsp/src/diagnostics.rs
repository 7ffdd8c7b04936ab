//! Latest published diagnostics per document URI.

use std::collections::HashMap;

use crate::types::{Diagnostic, DiagnosticsSnapshot};

#[derive(Debug, Default)]
pub(crate) struct DiagnosticsStore {
    data: HashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `uri`. An empty list clears it.
    pub fn update(&mut self, uri: &str, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(uri);
        } else {
            self.data.insert(uri.to_string(), items);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(String, Vec<Diagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        files.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiagnosticSeverity;

    fn diag(severity: DiagnosticSeverity, msg: &str) -> Diagnostic {
        Diagnostic::new(severity, msg, 1, 0, "clang")
    }

    #[test]
    fn empty_list_clears_uri() {
        let mut store = DiagnosticsStore::new();
        store.update("file:///a.cpp", vec![diag(DiagnosticSeverity::Error, "e")]);
        assert_eq!(store.snapshot().total_count(), 1);

        store.update("file:///a.cpp", vec![]);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn republish_replaces_previous() {
        let mut store = DiagnosticsStore::new();
        store.update(
            "file:///a.cpp",
            vec![
                diag(DiagnosticSeverity::Error, "e1"),
                diag(DiagnosticSeverity::Error, "e2"),
            ],
        );
        store.update("file:///a.cpp", vec![diag(DiagnosticSeverity::Error, "e1")]);
        assert_eq!(store.snapshot().error_count(), 1);
    }

    #[test]
    fn files_with_errors_sort_first() {
        let mut store = DiagnosticsStore::new();
        store.update("file:///a.cpp", vec![diag(DiagnosticSeverity::Warning, "w")]);
        store.update("file:///b.cpp", vec![diag(DiagnosticSeverity::Error, "e")]);

        let snap = store.snapshot();
        assert_eq!(snap.files()[0].0, "file:///b.cpp");
        assert_eq!(snap.files()[1].0, "file:///a.cpp");
    }
}
