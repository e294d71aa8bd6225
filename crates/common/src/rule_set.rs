//! Ordered first-match-wins rule set with file persistence

use crate::descriptor::Descriptor;
use crate::rule::{Rule, Verdict, sanitize};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Rule file loaded when nothing else is configured
pub const DEFAULT_RULE_FILE: &str = "default.rules";

/// Persistence errors
///
/// A failed load or save never changes the in-memory rule set.
#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("failed to read rule file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to create rule directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write rule file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Ordered policy
///
/// Position 0 has the highest priority. Rule file paths are resolved against
/// a fixed root directory.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: VecDeque<Rule>,
    root: PathBuf,
    path: PathBuf,
}

impl RuleSet {
    /// Empty rule set targeting [`DEFAULT_RULE_FILE`] under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_path(root, DEFAULT_RULE_FILE)
    }

    pub fn with_path(root: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            rules: VecDeque::new(),
            root: root.into(),
            path: path.into(),
        }
    }

    /// Whether `descriptor` is allowed
    ///
    /// The first rule with a non-ignore verdict decides; if none applies the
    /// descriptor is permitted.
    pub fn permission(&self, descriptor: &Descriptor) -> bool {
        self.rules
            .iter()
            .map(|rule| rule.evaluate(descriptor))
            .find(|verdict| *verdict != Verdict::Ignore)
            .is_none_or(|verdict| verdict == Verdict::Permit)
    }

    pub fn push_front(&mut self, rule: Rule) {
        self.rules.push_front(rule);
    }

    pub fn push_back(&mut self, rule: Rule) {
        self.rules.push_back(rule);
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Replace all rules, keeping their order
    pub fn replace(&mut self, rules: impl IntoIterator<Item = Rule>) {
        self.rules = rules.into_iter().collect();
    }

    /// Move the rule at `index` one step up in priority
    ///
    /// Returns false if `index` is already at the top or out of range.
    pub fn raise(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.rules.len() {
            return false;
        }
        self.rules.swap(index - 1, index);
        true
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Machine form of every rule, in priority order
    pub fn lines(&self) -> Vec<String> {
        self.rules.iter().map(Rule::to_string).collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active rule file, relative to the root
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Change the active rule file without touching the disk
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Absolute location of the active rule file
    pub fn file(&self) -> PathBuf {
        self.root.join(&self.path)
    }

    /// Replace the rules with the contents of `path` and make it active
    ///
    /// Lines that do not parse are skipped, as are bytes that are not UTF-8.
    /// Returns the number of rules loaded.
    pub fn load(&mut self, path: impl Into<PathBuf>) -> Result<usize, RuleSetError> {
        let path = path.into();
        let file = self.root.join(&path);
        let bytes = fs::read(&file).map_err(|source| RuleSetError::Read {
            path: file.clone(),
            source,
        })?;

        let rules = parse_rules(&String::from_utf8_lossy(&bytes), &file);
        let count = rules.len();
        self.rules = rules.into();
        self.path = path;

        debug!("Loaded {} rule(s) from {}", count, file.display());
        Ok(count)
    }

    /// Write every rule to the active file, one per line
    pub fn save(&self) -> Result<(), RuleSetError> {
        let file = self.file();

        if let Some(parent) = file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            fs::create_dir_all(parent).map_err(|source| RuleSetError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut content = String::new();
        for rule in &self.rules {
            content.push_str(&rule.to_string());
            content.push('\n');
        }

        fs::write(&file, content).map_err(|source| RuleSetError::Write {
            path: file.clone(),
            source,
        })?;

        debug!("Saved {} rule(s) to {}", self.rules.len(), file.display());
        Ok(())
    }
}

/// Parse rule file content, skipping blank and malformed lines
fn parse_rules(content: &str, origin: &Path) -> Vec<Rule> {
    let mut rules = Vec::new();

    for (number, line) in content.lines().enumerate() {
        let cleaned = sanitize(line);
        if cleaned.trim().is_empty() {
            continue;
        }

        match cleaned.parse::<Rule>() {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!(
                "Skipping rule {}:{}: {}",
                origin.display(),
                number + 1,
                e
            ),
        }
    }

    rules
}
