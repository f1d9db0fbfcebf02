//! Interfaces to the host's document view
//!
//! The voice engine never calls these. A host that renders the repository
//! being narrated implements them next to the [`crate::turn::TurnController`]
//! and drives both from its own script.

use serde::{Deserialize, Serialize};

/// Kind of repository page being shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    File,
    Directory,
    PullRequest,
    Issue,
    Other,
}

impl PageType {
    /// Classify a repository URL path such as `/owner/repo/blob/main/src/lib.rs`
    pub fn classify(path: &str) -> PageType {
        if path.contains("/blob/") {
            PageType::File
        } else if path.contains("/tree/") || is_repo_root(path) {
            PageType::Directory
        } else if path.contains("/pull/") {
            PageType::PullRequest
        } else if path.contains("/issues/") {
            PageType::Issue
        } else {
            PageType::Other
        }
    }
}

/// `/owner/repo` with an optional trailing slash
fn is_repo_root(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let mut parts = rest.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[serde(rename = "dir")]
    Directory,
    File,
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl FileEntry {
    /// Build an entry from a listing link; directories link into `/tree/`
    pub fn from_link(name: &str, href: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            kind: if href.contains("/tree/") {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
        }
    }
}

/// Read-only queries against the displayed page
pub trait PageModel {
    fn files(&self) -> Vec<FileEntry>;

    fn page_type(&self) -> PageType;

    /// Visible source text, or the README when no code is shown
    fn code_text(&self) -> String;

    fn readme(&self) -> String;

    fn repo_description(&self) -> String;
}

/// Visual emphasis on the displayed page; every call replaces the last
pub trait DocumentHighlighter {
    /// Spotlight the listing row named `name`; false when no row matches
    fn spot(&self, name: &str) -> bool;

    /// Spotlight lines `start..=end` (1-based) of the shown file
    fn spot_lines(&self, start: u32, end: u32);

    fn banner(&self, title: &str, body: &str);

    fn clear(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_classify_pages() {
        assert_eq!(
            PageType::classify("/rust-lang/rust/blob/master/README.md"),
            PageType::File
        );
        assert_eq!(
            PageType::classify("/rust-lang/rust/tree/master/src"),
            PageType::Directory
        );
        assert_eq!(PageType::classify("/rust-lang/rust"), PageType::Directory);
        assert_eq!(PageType::classify("/rust-lang/rust/"), PageType::Directory);
        assert_eq!(
            PageType::classify("/rust-lang/rust/pull/1234"),
            PageType::PullRequest
        );
        assert_eq!(
            PageType::classify("/rust-lang/rust/issues/42"),
            PageType::Issue
        );
        assert_eq!(PageType::classify("/rust-lang"), PageType::Other);
        assert_eq!(
            PageType::classify("/rust-lang/rust/actions"),
            PageType::Other
        );
    }

    #[test]
    fn test_blob_wins_over_tree() {
        assert_eq!(
            PageType::classify("/o/r/blob/main/tree/notes.md"),
            PageType::File
        );
    }

    #[test]
    fn test_file_entry_from_link() {
        let dir = FileEntry::from_link(" src ", "/o/r/tree/main/src");
        assert_eq!(dir.name, "src");
        assert_eq!(dir.kind, EntryKind::Directory);

        let file = FileEntry::from_link("Cargo.toml", "/o/r/blob/main/Cargo.toml");
        assert_eq!(
            serde_json::to_string(&file).unwrap(),
            r#"{"name":"Cargo.toml","type":"file"}"#
        );
    }

    #[derive(Default)]
    struct RecordingHighlighter {
        calls: RefCell<Vec<String>>,
        rows: Vec<&'static str>,
    }

    impl DocumentHighlighter for RecordingHighlighter {
        fn spot(&self, name: &str) -> bool {
            self.calls.borrow_mut().push(format!("spot {}", name));
            self.rows
                .iter()
                .any(|row| *row == name || row.ends_with(&format!("/{}", name)))
        }

        fn spot_lines(&self, start: u32, end: u32) {
            self.calls
                .borrow_mut()
                .push(format!("lines {}..={}", start, end));
        }

        fn banner(&self, title: &str, _body: &str) {
            self.calls.borrow_mut().push(format!("banner {}", title));
        }

        fn clear(&self) {
            self.calls.borrow_mut().push("clear".to_string());
        }
    }

    #[test]
    fn test_highlighter_is_object_safe() {
        let highlighter = RecordingHighlighter {
            rows: vec!["src/main.rs", "Cargo.toml"],
            ..Default::default()
        };
        let dynamic: &dyn DocumentHighlighter = &highlighter;
        assert!(dynamic.spot("main.rs"));
        assert!(!dynamic.spot("build.rs"));
        dynamic.spot_lines(3, 9);
        dynamic.clear();
        assert_eq!(highlighter.calls.borrow().len(), 4);
    }
}
