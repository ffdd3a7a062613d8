//! Read/write classification of tool names.

use std::collections::HashMap;

use conduit_core::ToolPolicy;
use once_cell::sync::Lazy;

use crate::mcp::config::McpServersConfig;

static BUILTIN_POLICIES: Lazy<HashMap<&'static str, ToolPolicy>> = Lazy::new(|| {
    let read = |name, running: &str, done: &str| {
        (
            name,
            ToolPolicy::read(running, done, format!("{} failed", running)),
        )
    };
    let write = |name, running: &str, done: &str| {
        (
            name,
            ToolPolicy::write(running, done, format!("{} failed", running)),
        )
    };

    HashMap::from([
        read("read_file", "Reading file", "File read"),
        read("read_text_file", "Reading file", "File read"),
        read("read_media_file", "Reading file", "File read"),
        read("read_multiple_files", "Reading files", "Files read"),
        read("list_directory", "Listing directory", "Directory listed"),
        read("list_directory_with_sizes", "Listing directory", "Directory listed"),
        read("directory_tree", "Building directory tree", "Directory tree built"),
        read("search_files", "Searching files", "Search finished"),
        read("get_file_info", "Reading file info", "File info read"),
        read("list_allowed_directories", "Listing allowed directories", "Allowed directories listed"),
        write("write_file", "Writing file", "File written"),
        write("edit_file", "Editing file", "File edited"),
        write("create_directory", "Creating directory", "Directory created"),
        write("move_file", "Moving file", "File moved"),
        write("delete_file", "Deleting file", "File deleted"),
    ])
});

/// Built-in policy for `name`, if it has one.
///
/// Pure and lock-free. `None` means the tool is unclassified, which callers
/// must handle on purpose.
pub fn classify(name: &str) -> Option<&'static ToolPolicy> {
    BUILTIN_POLICIES.get(name)
}

/// The built-in table plus policies from configuration. Configured entries
/// win over built-in ones.
#[derive(Debug, Clone, Default)]
pub struct ToolClassifier {
    overrides: HashMap<String, ToolPolicy>,
}

impl ToolClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: HashMap<String, ToolPolicy>) -> Self {
        Self { overrides }
    }

    pub fn from_config(config: &McpServersConfig) -> Self {
        Self::with_overrides(config.policy_overrides())
    }

    pub fn with_policy(mut self, tool: impl Into<String>, policy: ToolPolicy) -> Self {
        self.overrides.insert(tool.into(), policy);
        self
    }

    pub fn classify(&self, name: &str) -> Option<&ToolPolicy> {
        self.overrides.get(name).or_else(|| classify(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::ToolKind;

    #[test]
    fn test_builtin_read_and_write() {
        let read = classify("read_file").unwrap();
        assert_eq!(read.kind, ToolKind::Read);
        assert_eq!(read.running_label, "Reading file");
        assert_eq!(read.failure_label, "Reading file failed");

        assert_eq!(classify("write_file").unwrap().kind, ToolKind::Write);
        assert_eq!(classify("move_file").unwrap().kind, ToolKind::Write);
    }

    #[test]
    fn test_unknown_tool_is_unclassified() {
        assert!(classify("launch_rockets").is_none());
        assert!(classify("").is_none());
        assert!(classify("READ_FILE").is_none());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let classifier = ToolClassifier::new()
            .with_policy("read_file", ToolPolicy::write("Reading", "Read", "Read failed"))
            .with_policy("deleteAll", ToolPolicy::write("Deleting", "Deleted", "Delete failed"));

        assert_eq!(classifier.classify("read_file").unwrap().kind, ToolKind::Write);
        assert_eq!(classifier.classify("deleteAll").unwrap().kind, ToolKind::Write);
        assert_eq!(classifier.classify("list_directory").unwrap().kind, ToolKind::Read);
        assert!(classifier.classify("unknown").is_none());
    }

    #[test]
    fn test_from_config() {
        let config = McpServersConfig::parse(
            r#"
            [[policies]]
            tool = "search_issues"
            kind = "read"
            running_label = "Searching issues"
            success_label = "Issues found"
            failure_label = "Issue search failed"
            "#,
        )
        .unwrap();

        let classifier = ToolClassifier::from_config(&config);
        let policy = classifier.classify("search_issues").unwrap();
        assert_eq!(policy.kind, ToolKind::Read);
        assert_eq!(policy.success_label, "Issues found");
    }

    #[test]
    fn test_classify_from_many_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| classify("edit_file").map(|p| p.kind)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(ToolKind::Write));
        }
    }
}
