//! Per-file include/skip decisions.

use crate::format::CompressionMethod;
use crate::task::{FileRule, RuleAction, TocTask};

/// Outcome of classifying one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    /// Pack the file with this method.
    Include(CompressionMethod),
    /// A folder on the file's path is on the ignore list.
    SkipByFolder,
    /// The file name matches an ignore-list pattern.
    SkipByPattern,
    /// A skip rule of the TOC matched.
    SkipByRule,
}

impl FileDisposition {
    #[inline]
    pub fn method(self) -> Option<CompressionMethod> {
        match self {
            FileDisposition::Include(method) => Some(method),
            _ => None,
        }
    }
}

/// A `*`/`?` wildcard. Every other character is literal.
#[derive(Debug, Clone)]
pub struct Wildcard {
    pattern: Option<glob::Pattern>,
    literal: String,
}

impl Wildcard {
    pub fn new(text: &str) -> Self {
        let literal = text.to_lowercase();

        let mut escaped = String::with_capacity(literal.len() + 8);
        let mut previous_star = false;
        for c in literal.chars() {
            match c {
                '*' if previous_star => continue,
                '[' => escaped.push_str("[[]"),
                ']' => escaped.push_str("[]]"),
                other => escaped.push(other),
            }
            previous_star = c == '*';
        }

        let pattern = match glob::Pattern::new(&escaped) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                tracing::warn!(wildcard = text, %err, "wildcard compared literally");
                None
            }
        };

        Self { pattern, literal }
    }

    /// Case-insensitive match against a whole file name.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        match &self.pattern {
            Some(pattern) => pattern.matches(&name),
            None => name == self.literal,
        }
    }
}

/// Folder names and file-name patterns excluded from every build.
///
/// Entries ending in `/` or `\` name folders; any path component equal to
/// one excludes the file. Other entries are wildcards against the file name.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    folders: Vec<String>,
    patterns: Vec<Wildcard>,
}

impl IgnoreList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match entry.strip_suffix(&['/', '\\'][..]) {
                Some(folder) => list.folders.push(folder.to_lowercase()),
                None => list.patterns.push(Wildcard::new(entry)),
            }
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.patterns.is_empty()
    }

    fn excludes_folder<'a, I>(&self, folders: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.folders.is_empty() {
            return false;
        }
        folders.into_iter().any(|component| {
            let component = component.to_lowercase();
            self.folders.iter().any(|folder| *folder == component)
        })
    }

    fn excludes_name(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(name))
    }
}

/// Compiled rules of one TOC.
#[derive(Debug, Clone)]
pub struct RuleSet {
    default: CompressionMethod,
    rules: Vec<(FileRule, Wildcard)>,
}

impl RuleSet {
    pub fn new(toc: &TocTask) -> Self {
        let rules = toc
            .rules
            .iter()
            .map(|rule| (rule.clone(), Wildcard::new(&rule.wildcard)))
            .collect();
        Self {
            default: toc.default_compression,
            rules,
        }
    }

    /// Decide how a file is stored.
    ///
    /// `folders` are the components of the file's folder path relative to
    /// the TOC root, `name` its lowercase file name.
    pub fn classify<'a, I>(
        &self,
        ignore: &IgnoreList,
        folders: I,
        name: &str,
        size: u64,
    ) -> FileDisposition
    where
        I: IntoIterator<Item = &'a str>,
    {
        if ignore.excludes_folder(folders) {
            return FileDisposition::SkipByFolder;
        }
        if ignore.excludes_name(name) {
            return FileDisposition::SkipByPattern;
        }

        let mut method = None;
        for (rule, wildcard) in &self.rules {
            if !rule.accepts_size(size) || !wildcard.matches(name) {
                continue;
            }
            match rule.action {
                RuleAction::Skip => return FileDisposition::SkipByRule,
                RuleAction::Override { compression } => {
                    method.get_or_insert(compression);
                }
            }
        }

        if size == 0 {
            return FileDisposition::Include(CompressionMethod::Uncompressed);
        }
        FileDisposition::Include(method.unwrap_or(self.default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: [&str; 0] = [];

    fn toc(rules: Vec<FileRule>) -> TocTask {
        let mut toc = TocTask::new("data", "data");
        toc.rules = rules;
        toc
    }

    #[test]
    fn test_wildcards() {
        assert!(Wildcard::new("*.txt").matches("a.txt"));
        assert!(Wildcard::new("*.TXT").matches("A.txt"));
        assert!(Wildcard::new("?.txt").matches("a.txt"));
        assert!(!Wildcard::new("?.txt").matches("ab.txt"));
        assert!(Wildcard::new("a**b").matches("axxb"));
        assert!(Wildcard::new("[x].txt").matches("[x].txt"));
        assert!(!Wildcard::new("[x].txt").matches("x.txt"));
    }

    #[test]
    fn test_default_and_empty() {
        let rules = RuleSet::new(&toc(vec![]));
        let ignore = IgnoreList::default();

        assert_eq!(
            rules.classify(&ignore, ROOT, "a.txt", 4),
            FileDisposition::Include(CompressionMethod::DecompressDuringRead)
        );
        assert_eq!(
            rules.classify(&ignore, ROOT, "empty.txt", 0),
            FileDisposition::Include(CompressionMethod::Uncompressed)
        );
    }

    #[test]
    fn test_first_override_wins() {
        let rules = RuleSet::new(&toc(vec![
            FileRule::overriding("*.wav", CompressionMethod::Uncompressed),
            FileRule::overriding("*", CompressionMethod::DecompressAllAtOnce),
        ]));
        let ignore = IgnoreList::default();

        assert_eq!(
            rules.classify(&ignore, ROOT, "hit.wav", 100).method(),
            Some(CompressionMethod::Uncompressed)
        );
        assert_eq!(
            rules.classify(&ignore, ROOT, "hit.lua", 100).method(),
            Some(CompressionMethod::DecompressAllAtOnce)
        );
    }

    #[test]
    fn test_skip_rule_with_size() {
        let rules = RuleSet::new(&toc(vec![
            FileRule::overriding("*", CompressionMethod::Uncompressed),
            FileRule::skipping("*.tmp").with_size_range(Some(10), None),
        ]));
        let ignore = IgnoreList::default();

        assert_eq!(rules.classify(&ignore, ROOT, "x.tmp", 10), FileDisposition::SkipByRule);
        assert_eq!(
            rules.classify(&ignore, ROOT, "x.tmp", 9),
            FileDisposition::Include(CompressionMethod::Uncompressed)
        );
    }

    #[test]
    fn test_ignore_list() {
        let ignore = IgnoreList::new([".git/", "Backup\\", "*.bak", "  "]);
        let rules = RuleSet::new(&toc(vec![]));

        assert!(!ignore.is_empty());
        assert_eq!(
            rules.classify(&ignore, ["art", ".git"], "a.txt", 1),
            FileDisposition::SkipByFolder
        );
        assert_eq!(
            rules.classify(&ignore, ["backup"], "a.txt", 1),
            FileDisposition::SkipByFolder
        );
        assert_eq!(rules.classify(&ignore, ["art"], "a.bak", 1), FileDisposition::SkipByPattern);
        assert!(rules.classify(&ignore, ["art"], "a.txt", 1).method().is_some());
    }
}
