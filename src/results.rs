//! Result records, the persisted run manifest, and resume merging.
//!
//! The on-disk JSON schema is the contract: resume merging operates on raw
//! `serde_json::Value` records (revalidating required fields) rather than
//! reconstructing typed results, so older manifests stay mergeable as long
//! as the field names are stable.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarnessError;
use crate::taskset::{Condition, RepoSpec, Task};

/// Bracketed tags prefixing the `error` field of non-success results.
pub const TAG_PRE_VALIDATION: &str = "[pre-validation]";
pub const TAG_EMPTY_RUN: &str = "[empty-run]";
pub const TAG_CACHE_GENERATION: &str = "[cache-generation]";
pub const TAG_TIMEOUT: &str = "[timeout]";
pub const TAG_INFRASTRUCTURE: &str = "[infrastructure]";

/// Mutually exclusive classification of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    PreValidation,
    EmptyRun,
    CacheGeneration,
    Infrastructure,
}

impl Outcome {
    /// Infra-class outcomes are harness defects: excluded from the
    /// success-rate denominator and always re-attempted on resume.
    pub fn is_infra(&self) -> bool {
        matches!(
            self,
            Outcome::PreValidation
                | Outcome::EmptyRun
                | Outcome::CacheGeneration
                | Outcome::Infrastructure
        )
    }
}

/// One unit of scheduled work.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub repo: RepoSpec,
    pub task: Task,
    pub condition: Condition,
    pub rep_index: u32,
}

impl WorkItem {
    pub fn key(&self) -> (String, String, u32) {
        (
            self.task.id.clone(),
            self.condition.as_str().to_owned(),
            self.rep_index,
        )
    }
}

/// The atomic unit of output: one (task, condition, rep) attempt.
/// Immutable once created; a re-run produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub condition: Condition,
    pub rep_index: u32,
    pub success: bool,
    pub test_output: String,
    pub wall_clock_seconds: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_calls: u32,
    pub lines_changed: u64,
    pub files_touched: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_timeout: bool,
}

impl TaskResult {
    /// A zeroed record for an attempt that never reached the agent.
    /// `tag` must be one of the bracketed infra tags above.
    pub fn infra(item: &WorkItem, tag: &str, detail: impl AsRef<str>) -> TaskResult {
        TaskResult {
            task_id: item.task.id.clone(),
            condition: item.condition,
            rep_index: item.rep_index,
            success: false,
            test_output: String::new(),
            wall_clock_seconds: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            tool_calls: 0,
            lines_changed: 0,
            files_touched: Vec::new(),
            error: Some(format!("{tag} {}", detail.as_ref())),
            exit_code: None,
            is_timeout: false,
        }
    }

    pub fn outcome(&self) -> Outcome {
        if let Some(error) = &self.error {
            return outcome_from_error(error);
        }
        if self.is_timeout {
            // A timeout record always carries the [timeout] tag; bare
            // is_timeout still classifies correctly.
            return Outcome::Timeout;
        }
        if self.success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

fn outcome_from_error(error: &str) -> Outcome {
    if error.starts_with(TAG_PRE_VALIDATION) {
        Outcome::PreValidation
    } else if error.starts_with(TAG_EMPTY_RUN) {
        Outcome::EmptyRun
    } else if error.starts_with(TAG_CACHE_GENERATION) {
        Outcome::CacheGeneration
    } else if error.starts_with(TAG_TIMEOUT) {
        Outcome::Timeout
    } else {
        Outcome::Infrastructure
    }
}

/// Classify a raw JSON record using the same rules as [`TaskResult::outcome`].
/// Works on the persisted shape directly so it applies to prior-run records.
pub fn record_outcome(record: &Value) -> Outcome {
    if let Some(error) = record.get("error").and_then(Value::as_str) {
        return outcome_from_error(error);
    }
    if record
        .get("is_timeout")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Outcome::Timeout;
    }
    if record
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

/// Extract the (task_id, condition, rep_index) identity of a raw record.
/// Returns `None` when any required field is missing or mistyped; such a
/// record is invalid and never carried forward.
pub fn record_key(record: &Value) -> Option<(String, String, u32)> {
    let task_id = record.get("task_id")?.as_str()?;
    let condition = record.get("condition")?.as_str()?;
    let rep = record.get("rep_index")?.as_u64()?;
    // `success` must at least be present and boolean for the record to
    // count as a completed attempt.
    record.get("success")?.as_bool()?;
    Some((task_id.to_owned(), condition.to_owned(), rep as u32))
}

/// The full persisted output of a run: raw records plus a derived summary.
/// Mutated only by appends (fresh run) or merge (resume); summaries are
/// always recomputed from the union, never patched incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub created_at: String,
    pub results: Vec<Value>,
    #[serde(default)]
    pub summary: Value,
}

/// Append-only persistence for a run in progress. The manifest file is
/// rewritten atomically (temp then rename) after every completed item so a
/// crash loses at most the in-flight items.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    manifest: RunManifest,
}

impl ResultStore {
    pub fn create(output_dir: &Path, run_id: &str) -> Result<ResultStore, HarnessError> {
        fs::create_dir_all(output_dir).map_err(|e| HarnessError::ResultsWriteFailed {
            path: output_dir.to_path_buf(),
            detail: e.to_string(),
        })?;
        let path = output_dir.join(format!("{run_id}.json"));
        let manifest = RunManifest {
            run_id: run_id.to_owned(),
            created_at: chrono::Utc::now().to_rfc3339(),
            results: Vec::new(),
            summary: Value::Null,
        };
        let store = ResultStore { path, manifest };
        store.persist()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[Value] {
        &self.manifest.results
    }

    /// Seed the store with records carried forward from a prior run.
    pub fn carry_forward(&mut self, records: Vec<Value>) -> Result<(), HarnessError> {
        self.manifest.results.extend(records);
        self.persist()
    }

    /// Append one completed item and persist.
    pub fn append(&mut self, result: &TaskResult) -> Result<(), HarnessError> {
        let value =
            serde_json::to_value(result).map_err(|e| HarnessError::ResultsWriteFailed {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        self.manifest.results.push(value);
        self.persist()
    }

    /// Recompute and store the summary, then persist the final manifest.
    pub fn finalize(&mut self, summary: Value) -> Result<(), HarnessError> {
        self.manifest.summary = summary;
        self.persist()
    }

    fn persist(&self) -> Result<(), HarnessError> {
        let json = serde_json::to_string_pretty(&self.manifest).map_err(|e| {
            HarnessError::ResultsWriteFailed {
                path: self.path.clone(),
                detail: e.to_string(),
            }
        })?;
        write_atomic(&self.path, &json)
    }
}

/// Write `contents` to `path` via a temp file and rename; falls back to a
/// direct write when the rename fails (e.g. cross-device).
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), HarnessError> {
    let tmp_path = path.with_extension("json.tmp");
    let write_result = (|| -> std::io::Result<()> {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(HarnessError::ResultsWriteFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        });
    }

    if fs::rename(&tmp_path, path).is_err() {
        fs::write(path, contents).map_err(|e| HarnessError::ResultsWriteFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let _ = fs::remove_file(&tmp_path);
    }
    Ok(())
}

/// Load a prior manifest's raw records, validating only the envelope shape.
pub fn load_prior_records(path: &Path) -> Result<Vec<Value>, HarnessError> {
    let contents = fs::read_to_string(path).map_err(|e| HarnessError::ResumeLoad {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| HarnessError::ResumeLoad {
        path: path.to_path_buf(),
        detail: format!("invalid JSON: {e}"),
    })?;

    let results = value
        .get("results")
        .ok_or_else(|| HarnessError::ResumeShape {
            detail: "missing 'results' key".to_owned(),
        })?;
    let records = results
        .as_array()
        .ok_or_else(|| HarnessError::ResumeShape {
            detail: "'results' must be an array".to_owned(),
        })?;
    Ok(records.clone())
}

/// Outcome of merging a prior run into a newly requested work list.
#[derive(Debug)]
pub struct MergePlan {
    /// Prior records kept as-is: valid shape, genuine outcome, and still
    /// part of the requested work list.
    pub carried: Vec<Value>,
    /// Work items that must (re-)run.
    pub to_run: Vec<WorkItem>,
}

/// Merge prior records with the requested work list at item granularity.
///
/// A prior record is carried forward only when its outcome is
/// genuine-class; infra-class and shape-invalid records are always
/// re-attempted. Prior records for items outside the requested list are
/// dropped (the new task set defines the run).
pub fn merge(prior: &[Value], work: Vec<WorkItem>) -> MergePlan {
    let requested: HashSet<(String, String, u32)> = work.iter().map(WorkItem::key).collect();

    let mut carried = Vec::new();
    let mut carried_keys: HashSet<(String, String, u32)> = HashSet::new();

    for record in prior {
        let Some(key) = record_key(record) else {
            continue;
        };
        if !requested.contains(&key) || carried_keys.contains(&key) {
            continue;
        }
        if record_outcome(record).is_infra() {
            continue;
        }
        carried_keys.insert(key);
        carried.push(record.clone());
    }

    let to_run = work
        .into_iter()
        .filter(|item| !carried_keys.contains(&item.key()))
        .collect();

    MergePlan { carried, to_run }
}
