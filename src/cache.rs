//! Content-addressed cache of generated context artifacts.
//!
//! Artifact generation is by far the most expensive step of a run (an agent
//! invocation over a whole repository), so completed artifacts are stored on
//! disk keyed by repo, commit, and artifact kind. Concurrent requests for
//! the same key are collapsed to a single generation: one caller becomes the
//! owner while the rest wait, then re-read the entry from disk. A failed
//! generation publishes nothing, so the next caller simply tries again.
//!
//! Within an entry directory `entry.json` is written last, after all
//! artifact files, and atomically. Its presence is what makes an entry
//! visible; a crash mid-store leaves only unreferenced files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::HarnessError;
use crate::results::write_atomic;
use crate::taskset::RepoSpec;

/// Bumped whenever the generation prompt or artifact layout changes, so
/// stale entries are regenerated rather than reused.
pub const GENERATOR_VERSION: &str = "1";

const ENTRY_FILE: &str = "entry.json";

/// Identity of one cached artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    repo_slug: String,
    artifact_kind: String,
    content_hash: String,
}

impl CacheKey {
    /// `artifact_kind` is the generated layout ("flat" or "hierarchical"),
    /// not the experiment condition; conditions that share an artifact
    /// share a key.
    pub fn new(repo: &RepoSpec, artifact_kind: &str, commit: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(repo.url.as_bytes());
        hasher.update(b"\0");
        hasher.update(commit.as_bytes());
        hasher.update(b"\0");
        hasher.update(artifact_kind.as_bytes());
        hasher.update(b"\0");
        hasher.update(GENERATOR_VERSION.as_bytes());
        CacheKey {
            repo_slug: repo.slug(),
            artifact_kind: artifact_kind.to_owned(),
            content_hash: hex::encode(hasher.finalize()),
        }
    }

    /// Directory name under the cache root, readable but collision-safe.
    pub fn dir_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.repo_slug,
            self.artifact_kind,
            &self.content_hash[..12]
        )
    }
}

/// Manifest of one completed cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    repo: String,
    artifact_kind: String,
    content_hash: String,
    created_at: String,
    generator_version: String,
    files: Vec<String>,
}

/// Freshly generated artifact files, still sitting in the workspace that
/// produced them. Paths are relative to `workspace`.
#[derive(Debug)]
pub struct GeneratedContext {
    pub workspace: PathBuf,
    pub files: Vec<String>,
}

/// A cached artifact set ready to be restored into workspaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextArtifact {
    pub dir: PathBuf,
    /// Relative paths within `dir`, preserved on restore.
    pub files: Vec<String>,
}

impl ContextArtifact {
    /// Copy every artifact file into `workspace` at its relative path.
    pub fn restore(&self, workspace: &Path) -> Result<(), HarnessError> {
        for file in &self.files {
            let src = self.dir.join(file);
            let dst = workspace.join(file);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| HarnessError::CacheIo {
                    path: parent.to_path_buf(),
                    detail: e.to_string(),
                })?;
            }
            fs::copy(&src, &dst).map_err(|e| HarnessError::CacheIo {
                path: src.clone(),
                detail: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// All artifact contents joined into one block, for conditions that
    /// embed the context in the prompt instead of the filesystem.
    pub fn concatenated(&self) -> Result<String, HarnessError> {
        let mut out = String::new();
        for file in &self.files {
            let path = self.dir.join(file);
            let contents = fs::read_to_string(&path).map_err(|e| HarnessError::CacheIo {
                path: path.clone(),
                detail: e.to_string(),
            })?;
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&format!("## {file}\n\n"));
            out.push_str(&contents);
        }
        Ok(out)
    }
}

#[derive(Default)]
struct Flight {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Flight {
    fn wait_done(&self) {
        let mut done = lock_unpoisoned(&self.done);
        while !*done {
            done = self
                .cv
                .wait(done)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn mark_done(&self) {
        *lock_unpoisoned(&self.done) = true;
        self.cv.notify_all();
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Claim {
    Owner,
    Waiter(Arc<Flight>),
}

/// Disk-backed artifact cache with in-process single-flight generation.
pub struct ContextCache {
    root: PathBuf,
    in_flight: Mutex<HashMap<String, Arc<Flight>>>,
}

impl ContextCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<ContextCache, HarnessError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| HarnessError::CacheIo {
            path: root.clone(),
            detail: e.to_string(),
        })?;
        Ok(ContextCache {
            root,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Return the cached artifact for `key`, running `generate` if absent.
    ///
    /// At most one generation per key runs at a time in this process.
    /// A generation error is returned to the owning caller only; waiters
    /// retry, so a transient failure does not poison the key.
    pub fn get_or_generate<F>(
        &self,
        key: &CacheKey,
        generate: F,
    ) -> Result<ContextArtifact, HarnessError>
    where
        F: FnOnce() -> Result<GeneratedContext, HarnessError>,
    {
        let dir_name = key.dir_name();
        loop {
            if let Some(artifact) = self.lookup(key)? {
                return Ok(artifact);
            }
            match self.claim(&dir_name) {
                Claim::Owner => return self.generate_claimed(key, &dir_name, generate),
                Claim::Waiter(flight) => flight.wait_done(),
            }
        }
    }

    /// Owner path; the claim is held on entry and released on every exit.
    /// Another owner may have completed and released between this caller's
    /// lookup miss and its claim, so the disk is checked once more before
    /// the expensive generation runs.
    fn generate_claimed<F>(
        &self,
        key: &CacheKey,
        dir_name: &str,
        generate: F,
    ) -> Result<ContextArtifact, HarnessError>
    where
        F: FnOnce() -> Result<GeneratedContext, HarnessError>,
    {
        match self.lookup(key) {
            Ok(Some(artifact)) => {
                self.release(dir_name);
                return Ok(artifact);
            }
            Err(e) => {
                self.release(dir_name);
                return Err(e);
            }
            Ok(None) => {}
        }

        debug!(key = %dir_name, "generating context artifact");
        let outcome = generate().and_then(|generated| self.store(key, &generated));
        self.release(dir_name);
        if outcome.is_ok() {
            info!(key = %dir_name, "context artifact cached");
        }
        outcome
    }

    /// Look up a completed entry on disk. Entries written by an older
    /// generator version or with a different hash are treated as misses.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<ContextArtifact>, HarnessError> {
        let dir = self.root.join(key.dir_name());
        let entry_path = dir.join(ENTRY_FILE);
        let contents = match fs::read_to_string(&entry_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HarnessError::CacheIo {
                    path: entry_path,
                    detail: e.to_string(),
                });
            }
        };
        let entry: CacheEntry =
            serde_json::from_str(&contents).map_err(|e| HarnessError::CacheIo {
                path: entry_path,
                detail: format!("corrupt entry manifest: {e}"),
            })?;
        if entry.generator_version != GENERATOR_VERSION || entry.content_hash != key.content_hash {
            debug!(key = %key.dir_name(), "stale cache entry, regenerating");
            return Ok(None);
        }
        Ok(Some(ContextArtifact {
            dir,
            files: entry.files,
        }))
    }

    fn claim(&self, dir_name: &str) -> Claim {
        let mut flights = lock_unpoisoned(&self.in_flight);
        if let Some(flight) = flights.get(dir_name) {
            Claim::Waiter(Arc::clone(flight))
        } else {
            flights.insert(dir_name.to_owned(), Arc::new(Flight::default()));
            Claim::Owner
        }
    }

    fn release(&self, dir_name: &str) {
        let flight = lock_unpoisoned(&self.in_flight).remove(dir_name);
        if let Some(flight) = flight {
            flight.mark_done();
        }
    }

    /// Copy generated files into the entry directory, then publish the
    /// entry manifest. Empty generations are a defect, not a cacheable
    /// result.
    fn store(
        &self,
        key: &CacheKey,
        generated: &GeneratedContext,
    ) -> Result<ContextArtifact, HarnessError> {
        if generated.files.is_empty() {
            return Err(HarnessError::CacheGeneration {
                detail: "generator produced no artifact files".to_owned(),
            });
        }
        let dir = self.root.join(key.dir_name());
        fs::create_dir_all(&dir).map_err(|e| HarnessError::CacheIo {
            path: dir.clone(),
            detail: e.to_string(),
        })?;

        for file in &generated.files {
            let src = generated.workspace.join(file);
            let dst = dir.join(file);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| HarnessError::CacheIo {
                    path: parent.to_path_buf(),
                    detail: e.to_string(),
                })?;
            }
            fs::copy(&src, &dst).map_err(|e| HarnessError::CacheIo {
                path: src.clone(),
                detail: e.to_string(),
            })?;
        }

        let entry = CacheEntry {
            repo: key.repo_slug.clone(),
            artifact_kind: key.artifact_kind.clone(),
            content_hash: key.content_hash.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            generator_version: GENERATOR_VERSION.to_owned(),
            files: generated.files.clone(),
        };
        let json = serde_json::to_string_pretty(&entry).map_err(|e| HarnessError::CacheIo {
            path: dir.join(ENTRY_FILE),
            detail: e.to_string(),
        })?;
        write_atomic(&dir.join(ENTRY_FILE), &json).map_err(|e| HarnessError::CacheIo {
            path: dir.join(ENTRY_FILE),
            detail: e.to_string(),
        })?;

        Ok(ContextArtifact {
            dir,
            files: generated.files.clone(),
        })
    }
}
