//! Active rule file tracking
//!
//! A small pointer file under the rule root names the rule file the daemon
//! should load on startup. It is rewritten whenever a client makes another
//! file active.

use common::RuleSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RulePointer {
    file: PathBuf,
}

impl RulePointer {
    pub fn new(root: &Path, pointer_file: &str) -> Self {
        Self {
            file: root.join(pointer_file),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Rule file named by the pointer, if it exists and is not empty
    pub fn read(&self) -> Option<PathBuf> {
        let content = fs::read_to_string(&self.file).ok()?;
        let name = content.trim();
        (!name.is_empty()).then(|| PathBuf::from(name))
    }

    /// Point at `rule_file`
    pub fn record(&self, rule_file: &Path) -> io::Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.file, format!("{}\n", rule_file.display()))
    }
}

/// Build the startup rule set
///
/// Loads the file named by `pointer`, then `default_file`. If neither loads
/// the rule set starts empty, targeting `default_file`.
pub fn load_active_rules(root: &Path, default_file: &str, pointer: &RulePointer) -> RuleSet {
    let mut rule_set = RuleSet::with_path(root, default_file);

    if let Some(name) = pointer.read() {
        match rule_set.load(&name) {
            Ok(count) => {
                info!("Loaded {} rule(s) from {}", count, rule_set.file().display());
                return rule_set;
            }
            Err(e) => warn!("{}, falling back to {}", e, default_file),
        }
    }

    match rule_set.load(default_file) {
        Ok(count) => info!("Loaded {} rule(s) from {}", count, rule_set.file().display()),
        Err(e) => warn!("{}, starting with an empty rule set", e),
    }

    rule_set
}
