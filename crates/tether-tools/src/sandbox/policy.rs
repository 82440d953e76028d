//! Policy store

use crate::error::{Error, Result};
use crate::types::OperatorId;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A denylisted path prefix.
///
/// Literal prefixes match whole path components (`/etc` matches `/etc/passwd`
/// but not `/etcetera`). Prefixes containing `*` match any single component
/// at that position, e.g. `/Users/*/Library`.
#[derive(Debug, Clone)]
pub enum PathPrefix {
    /// Plain directory prefix, with its resolved form when it exists
    Literal {
        /// As configured
        raw: PathBuf,
        /// Symlink-resolved form, if the prefix exists on disk
        resolved: Option<PathBuf>,
    },
    /// Wildcard prefix compiled to an anchored regex
    Pattern {
        /// As configured
        raw: String,
        /// Compiled matcher
        regex: Regex,
    },
}

impl PathPrefix {
    /// Parse a configured prefix.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Config("empty path prefix".to_string()));
        }
        if raw.contains('*') {
            let trimmed = raw.trim_end_matches('/');
            let body = trimmed
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("[^/]*");
            let regex = Regex::new(&format!("^{}(/|$)", body))
                .map_err(|e| Error::Config(format!("bad path pattern '{}': {}", raw, e)))?;
            return Ok(Self::Pattern {
                raw: raw.to_string(),
                regex,
            });
        }
        let raw = PathBuf::from(raw);
        let resolved = raw.canonicalize().ok().filter(|r| r != &raw);
        Ok(Self::Literal { raw, resolved })
    }

    /// Whether `path` (already resolved) lies under this prefix.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Self::Literal { raw, resolved } => {
                path.starts_with(raw) || resolved.as_ref().is_some_and(|r| path.starts_with(r))
            }
            Self::Pattern { regex, .. } => regex.is_match(&path.to_string_lossy()),
        }
    }

    /// Prefix as configured, for deny messages.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Literal { raw, .. } => raw.display().to_string(),
            Self::Pattern { raw, .. } => raw.clone(),
        }
    }
}

/// Immutable security policy, loaded once per process.
#[derive(Debug, Clone)]
pub struct Policy {
    confinement_root: PathBuf,
    denylisted_commands: BTreeSet<String>,
    denylisted_path_prefixes: Vec<PathPrefix>,
    authorized_operators: HashSet<OperatorId>,
}

impl Policy {
    /// Create a policy confined to `root`, which must be an existing directory.
    ///
    /// The root is stored in symlink-resolved form so every later comparison
    /// is between resolved paths.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let confinement_root = root.canonicalize().map_err(|e| {
            Error::Config(format!(
                "cannot resolve confinement root '{}': {}",
                root.display(),
                e
            ))
        })?;
        if !confinement_root.is_dir() {
            return Err(Error::Config(format!(
                "confinement root '{}' is not a directory",
                confinement_root.display()
            )));
        }
        debug!(root = %confinement_root.display(), "Policy confinement root resolved");
        Ok(Self {
            confinement_root,
            denylisted_commands: BTreeSet::new(),
            denylisted_path_prefixes: Vec::new(),
            authorized_operators: HashSet::new(),
        })
    }

    /// Set denylisted command patterns.
    pub fn with_denylisted_commands<I, S>(mut self, commands: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for cmd in commands {
            let normalized = cmd.as_ref().split_whitespace().collect::<Vec<_>>().join(" ");
            if normalized.is_empty() {
                return Err(Error::Config("empty denylisted command".to_string()));
            }
            set.insert(normalized);
        }
        self.denylisted_commands = set;
        Ok(self)
    }

    /// Set denylisted path prefixes.
    pub fn with_denylisted_paths<I, S>(mut self, prefixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.denylisted_path_prefixes = prefixes
            .into_iter()
            .map(|p| PathPrefix::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Set the operator whitelist. An empty set admits everyone.
    #[must_use]
    pub fn with_authorized_operators<I>(mut self, operators: I) -> Self
    where
        I: IntoIterator<Item = OperatorId>,
    {
        self.authorized_operators = operators.into_iter().collect();
        self
    }

    /// Resolved confinement root.
    #[must_use]
    pub fn confinement_root(&self) -> &Path {
        &self.confinement_root
    }

    /// Denylisted command patterns (whitespace-normalized).
    pub fn denylisted_commands(&self) -> impl Iterator<Item = &str> {
        self.denylisted_commands.iter().map(String::as_str)
    }

    /// Denylisted path prefixes.
    #[must_use]
    pub fn denylisted_path_prefixes(&self) -> &[PathPrefix] {
        &self.denylisted_path_prefixes
    }

    /// Whether the whitelist is empty (everyone admitted).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.authorized_operators.is_empty()
    }

    /// Whitelist membership.
    #[must_use]
    pub fn is_authorized(&self, operator: &OperatorId) -> bool {
        self.authorized_operators.contains(operator)
    }

    /// Number of whitelisted operators.
    #[must_use]
    pub fn operator_count(&self) -> usize {
        self.authorized_operators.len()
    }
}
