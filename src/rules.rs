//! File-backed rule configuration, memoized through the cache layer.
//!
//! Content modules frequently need the same category of drafting rules (for
//! example the essential-characteristics checklist, or the category-specific
//! style constraints) across many runs. [`RuleConfigStore`] reads a category's
//! rule file once, parks concurrent first readers behind the cache's per-key
//! in-flight slot, and serves every later access from memory.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{CacheError, CacheLayer};

/// One drafting rule as stored on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: String,
    pub title: String,
    pub body: String,
}

/// Errors surfaced by [`RuleConfigStore::rules`].
#[derive(Debug, Error, Diagnostic)]
pub enum RuleStoreError {
    /// Reading the category file failed (missing, unreadable, or invalid
    /// JSON). Nothing is cached; the next access retries the read.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    /// The file parsed as JSON but not as a rule list.
    #[error("rule file for category \"{category}\" is malformed")]
    #[diagnostic(
        code(promptloom::rules::malformed),
        help("Each category file must be a JSON array of {{id, title, body}} objects.")
    )]
    Malformed {
        category: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Loads per-category rule files from a directory, once per process.
///
/// A category `"ESS"` maps to `<root>/ESS.json`. Rule files are treated as
/// immutable for the process lifetime; restart (or
/// [`CacheLayer::invalidate`] on `rules:<category>`) picks up edits.
#[derive(Clone, Debug)]
pub struct RuleConfigStore {
    root: PathBuf,
    cache: Arc<CacheLayer>,
}

impl RuleConfigStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, cache: Arc<CacheLayer>) -> Self {
        Self {
            root: root.into(),
            cache,
        }
    }

    /// The rules for `category`, loaded from disk at most once across all
    /// concurrent callers.
    pub async fn rules(&self, category: &str) -> Result<Vec<RuleRecord>, RuleStoreError> {
        let key = format!("rules:{category}");
        let path = self.root.join(format!("{category}.json"));
        let value = self
            .cache
            .get_or_compute(&key, None, || async move { load_rule_file(&path).await })
            .await?;
        serde_json::from_value(value).map_err(|source| RuleStoreError::Malformed {
            category: category.to_string(),
            source,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

async fn load_rule_file(
    path: &Path,
) -> Result<serde_json::Value, crate::cache::ComputeError> {
    tracing::debug!(path = %path.display(), "loading rule file");
    let raw = tokio::fs::read_to_string(path).await?;
    // Parse eagerly so a syntactically broken file fails the computation and
    // is never memoized.
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    Ok(value)
}
