//! Sensitive-word lexicons.
//!
//! ```text
//! lexicon dir → LexiconStore::load → LexiconSnapshot → SensitiveMatcher
//!                                                         ↑
//!                                     LexiconHandle (swap on reload)
//! ```

pub mod compliance;
pub mod matcher;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::domain::{LexiconCategory, LexiconEntry};

pub use compliance::{ComplianceReport, ScreeningPolicy};
pub use matcher::SensitiveMatcher;

/// Whether a load produced anything to screen with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexiconStatus {
    Loaded { entries: usize },
    Unavailable { reason: String },
}

/// Immutable result of one lexicon load.
#[derive(Debug, Clone)]
pub struct LexiconSnapshot {
    pub dir: PathBuf,
    pub entries: Vec<LexiconEntry>,
    pub status: LexiconStatus,
}

impl LexiconSnapshot {
    pub fn empty(dir: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            dir,
            entries: Vec::new(),
            status: LexiconStatus::Unavailable {
                reason: reason.into(),
            },
        }
    }

    pub fn from_entries(dir: PathBuf, entries: Vec<LexiconEntry>) -> Self {
        let status = if entries.is_empty() {
            LexiconStatus::Unavailable {
                reason: format!("no lexicon entries in {}", dir.display()),
            }
        } else {
            LexiconStatus::Loaded {
                entries: entries.len(),
            }
        };
        Self {
            dir,
            entries,
            status,
        }
    }

    pub fn count_by_category(&self) -> BTreeMap<LexiconCategory, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.category).or_insert(0) += 1;
        }
        counts
    }
}

/// Reads category-named word lists from a directory.
pub struct LexiconStore;

impl LexiconStore {
    /// Load every recognized `*.txt` file under `dir`.
    ///
    /// A missing directory, an unreadable file or a directory with zero words
    /// yields an `Unavailable` snapshot rather than an error.
    pub fn load(dir: &Path) -> LexiconSnapshot {
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                return LexiconSnapshot::empty(
                    dir.to_path_buf(),
                    format!("lexicon directory {} unavailable: {}", dir.display(), e),
                )
            }
        };

        let mut files: Vec<(LexiconCategory, PathBuf)> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?;
                match LexiconCategory::from_file_stem(stem) {
                    Some(category) => Some((category, path)),
                    None => {
                        debug!("Skipping unrecognized lexicon file {}", path.display());
                        None
                    }
                }
            })
            .collect();
        // Category order first so the earliest category keeps shared words
        files.sort();

        let mut owner: HashMap<String, LexiconCategory> = HashMap::new();
        let mut entries = Vec::new();

        for (category, path) in files {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read lexicon file {}: {}", path.display(), e);
                    continue;
                }
            };
            let content = String::from_utf8_lossy(&bytes);
            for word in parse_words(&content) {
                match owner.get(&word) {
                    Some(existing) => {
                        if *existing != category {
                            debug!(
                                "Word {:?} already in {}, dropping from {}",
                                word, existing, category
                            );
                        }
                    }
                    None => {
                        owner.insert(word.clone(), category);
                        entries.push(LexiconEntry { word, category });
                    }
                }
            }
        }

        let snapshot = LexiconSnapshot::from_entries(dir.to_path_buf(), entries);
        if let LexiconStatus::Loaded { entries } = snapshot.status {
            info!(
                "Loaded {} lexicon words from {} ({:?})",
                entries,
                dir.display(),
                snapshot.count_by_category()
            );
        }
        snapshot
    }
}

fn parse_words(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(|line| line.trim_start_matches('\u{feff}').trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
}

/// Shared, swappable matcher.
///
/// Scans take a cheap `Arc` clone of the current matcher, so a reload never
/// affects a scan that already started.
pub struct LexiconHandle {
    dir: PathBuf,
    current: RwLock<Arc<SensitiveMatcher>>,
}

impl LexiconHandle {
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let matcher = SensitiveMatcher::build(&LexiconStore::load(&dir));
        Self {
            dir,
            current: RwLock::new(Arc::new(matcher)),
        }
    }

    pub fn from_matcher(dir: impl Into<PathBuf>, matcher: SensitiveMatcher) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(Arc::new(matcher)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot(&self) -> Arc<SensitiveMatcher> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Rebuild from disk and swap the matcher in one step.
    pub fn reload(&self) -> Arc<SensitiveMatcher> {
        let matcher = Arc::new(SensitiveMatcher::build(&LexiconStore::load(&self.dir)));
        match self.current.write() {
            Ok(mut guard) => *guard = matcher.clone(),
            Err(poisoned) => *poisoned.into_inner() = matcher.clone(),
        }
        info!(
            "Lexicon reloaded from {} (screening: {})",
            self.dir.display(),
            matcher.is_screening()
        );
        matcher
    }
}
