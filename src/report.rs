//! Summary computation and report rendering.
//!
//! Works on raw result records so a summary can be recomputed from any
//! manifest, including merged ones, without typed reconstruction. Infra-
//! class outcomes are surfaced separately and never enter the success-rate
//! denominator or the statistical tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;

use crate::results::{record_key, record_outcome, Outcome};
use crate::stats::{
    ci_overlap, fisher_exact, mcnemar_test, wilson_interval, FisherResult, McNemarResult,
    WilsonInterval,
};
use crate::taskset::Condition;

/// Confidence level for the per-condition Wilson intervals.
const CONFIDENCE: f64 = 0.90;

#[derive(Debug, Clone, Serialize)]
pub struct ConditionSummary {
    pub condition: String,
    pub attempts: usize,
    /// Genuine outcomes: success, failure, timeout.
    pub genuine: usize,
    pub successes: usize,
    pub failures: usize,
    pub timeouts: usize,
    pub infra_excluded: usize,
    pub infra_breakdown: BTreeMap<String, usize>,
    /// successes / genuine, 0 when there are no genuine outcomes.
    pub success_rate: f64,
    pub success_ci: WilsonInterval,
    pub mean_wall_clock_seconds: f64,
    pub mean_input_tokens: f64,
    pub mean_output_tokens: f64,
    pub mean_tool_calls: f64,
    pub mean_lines_changed: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairedComparison {
    pub condition_a: String,
    pub condition_b: String,
    /// (task, repetition) pairs with a genuine outcome under both.
    pub n_pairs: usize,
    pub both_success: usize,
    pub both_failure: usize,
    pub mcnemar: McNemarResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnpairedComparison {
    pub condition_a: String,
    pub condition_b: String,
    pub a_successes: u64,
    pub a_failures: u64,
    pub b_successes: u64,
    pub b_failures: u64,
    /// Whether the two conditions' Wilson intervals overlap. Disjoint
    /// intervals are a quick visual signal; the p-values are the real test.
    pub ci_overlap: bool,
    pub fisher: FisherResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_attempts: usize,
    pub total_infra_excluded: usize,
    pub conditions: Vec<ConditionSummary>,
    pub paired: Vec<PairedComparison>,
    pub unpaired: Vec<UnpairedComparison>,
}

impl Summary {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn get_f64(record: &Value, field: &str) -> f64 {
    record.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Conditions present in the records, in canonical declaration order, with
/// unknown names appended alphabetically so foreign manifests still report.
fn condition_order(records: &[Value]) -> Vec<String> {
    let present: BTreeSet<String> = records
        .iter()
        .filter_map(|r| r.get("condition").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();

    let mut ordered = Vec::new();
    for condition in Condition::all() {
        if present.contains(condition.as_str()) {
            ordered.push(condition.as_str().to_owned());
        }
    }
    for name in present {
        if !ordered.contains(&name) {
            ordered.push(name);
        }
    }
    ordered
}

/// Compute the full summary from raw result records.
pub fn summarize(records: &[Value]) -> Summary {
    let order = condition_order(records);

    let mut conditions = Vec::new();
    for name in &order {
        conditions.push(summarize_condition(name, records));
    }

    let mut paired = Vec::new();
    let mut unpaired = Vec::new();
    for (i, a) in order.iter().enumerate() {
        for b in order.iter().skip(i + 1) {
            paired.push(compare_paired(a, b, records));
            unpaired.push(compare_unpaired(a, b, &conditions));
        }
    }

    Summary {
        total_attempts: records.len(),
        total_infra_excluded: records
            .iter()
            .filter(|r| record_outcome(r).is_infra())
            .count(),
        conditions,
        paired,
        unpaired,
    }
}

fn summarize_condition(name: &str, records: &[Value]) -> ConditionSummary {
    let of_condition: Vec<&Value> = records
        .iter()
        .filter(|r| r.get("condition").and_then(Value::as_str) == Some(name))
        .collect();

    let mut successes = 0usize;
    let mut failures = 0usize;
    let mut timeouts = 0usize;
    let mut infra_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    let mut genuine_records = Vec::new();

    for record in &of_condition {
        match record_outcome(record) {
            Outcome::Success => {
                successes += 1;
                genuine_records.push(*record);
            }
            Outcome::Failure => {
                failures += 1;
                genuine_records.push(*record);
            }
            Outcome::Timeout => {
                timeouts += 1;
                genuine_records.push(*record);
            }
            Outcome::PreValidation => *infra_breakdown.entry("pre-validation".into()).or_default() += 1,
            Outcome::EmptyRun => *infra_breakdown.entry("empty-run".into()).or_default() += 1,
            Outcome::CacheGeneration => {
                *infra_breakdown.entry("cache-generation".into()).or_default() += 1
            }
            Outcome::Infrastructure => {
                *infra_breakdown.entry("infrastructure".into()).or_default() += 1
            }
        }
    }

    let genuine = genuine_records.len();
    let infra_excluded = of_condition.len() - genuine;
    let success_rate = if genuine == 0 {
        0.0
    } else {
        round4(successes as f64 / genuine as f64)
    };

    let mean = |field: &str| -> f64 {
        if genuine_records.is_empty() {
            return 0.0;
        }
        let sum: f64 = genuine_records.iter().map(|r| get_f64(r, field)).sum();
        round1(sum / genuine_records.len() as f64)
    };

    ConditionSummary {
        condition: name.to_owned(),
        attempts: of_condition.len(),
        genuine,
        successes,
        failures,
        timeouts,
        infra_excluded,
        infra_breakdown,
        success_rate,
        success_ci: wilson_interval(successes as u64, genuine as u64, CONFIDENCE),
        mean_wall_clock_seconds: mean("wall_clock_seconds"),
        mean_input_tokens: mean("input_tokens"),
        mean_output_tokens: mean("output_tokens"),
        mean_tool_calls: mean("tool_calls"),
        mean_lines_changed: mean("lines_changed"),
    }
}

/// Paired comparison over (task, repetition) keys that have a genuine
/// outcome under both conditions. Discordant pairs feed McNemar's test.
fn compare_paired(a: &str, b: &str, records: &[Value]) -> PairedComparison {
    // (task_id, rep_index) -> success, genuine outcomes only.
    let genuine_map = |condition: &str| -> HashMap<(String, u32), bool> {
        let mut map = HashMap::new();
        for record in records {
            let Some((task_id, cond, rep)) = record_key(record) else {
                continue;
            };
            if cond != condition || record_outcome(record).is_infra() {
                continue;
            }
            map.entry((task_id, rep))
                .or_insert(record_outcome(record) == Outcome::Success);
        }
        map
    };

    let a_map = genuine_map(a);
    let b_map = genuine_map(b);

    let mut a_wins = 0u64;
    let mut b_wins = 0u64;
    let mut both_success = 0usize;
    let mut both_failure = 0usize;
    let mut n_pairs = 0usize;

    for (key, &a_success) in &a_map {
        let Some(&b_success) = b_map.get(key) else {
            continue;
        };
        n_pairs += 1;
        match (a_success, b_success) {
            (true, true) => both_success += 1,
            (false, false) => both_failure += 1,
            (true, false) => a_wins += 1,
            (false, true) => b_wins += 1,
        }
    }

    PairedComparison {
        condition_a: a.to_owned(),
        condition_b: b.to_owned(),
        n_pairs,
        both_success,
        both_failure,
        mcnemar: mcnemar_test(a_wins, b_wins),
    }
}

fn compare_unpaired(a: &str, b: &str, conditions: &[ConditionSummary]) -> UnpairedComparison {
    let find = |name: &str| conditions.iter().find(|c| c.condition == name);
    let (a_s, a_f, a_ci) = find(a)
        .map(|c| {
            (
                c.successes as u64,
                (c.genuine - c.successes) as u64,
                (c.success_ci.lower, c.success_ci.upper),
            )
        })
        .unwrap_or((0, 0, (0.0, 1.0)));
    let (b_s, b_f, b_ci) = find(b)
        .map(|c| {
            (
                c.successes as u64,
                (c.genuine - c.successes) as u64,
                (c.success_ci.lower, c.success_ci.upper),
            )
        })
        .unwrap_or((0, 0, (0.0, 1.0)));

    UnpairedComparison {
        condition_a: a.to_owned(),
        condition_b: b.to_owned(),
        a_successes: a_s,
        a_failures: a_f,
        b_successes: b_s,
        b_failures: b_f,
        ci_overlap: ci_overlap(a_ci, b_ci),
        fisher: fisher_exact(a_s, a_f, b_s, b_f),
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Render the summary and a per-task outcome grid as Markdown.
pub fn render_markdown(run_id: &str, summary: &Summary, records: &[Value]) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("# Run Results: {run_id}"));
    lines.push(String::new());
    lines.push(format!(
        "**Attempts:** {} ({} excluded as infrastructure)",
        summary.total_attempts, summary.total_infra_excluded
    ));
    lines.push(String::new());
    lines.push("## Conditions".to_owned());
    lines.push(String::new());
    lines.push(
        "| Condition | Genuine | Success rate | 90% CI | Mean time (s) | Mean tokens in | Mean tool calls | Infra excluded |"
            .to_owned(),
    );
    lines.push("|---|---|---|---|---|---|---|---|".to_owned());
    for c in &summary.conditions {
        lines.push(format!(
            "| {} | {} | {}/{} ({:.0}%) | [{:.2}, {:.2}] | {:.1} | {:.0} | {:.1} | {} |",
            c.condition,
            c.genuine,
            c.successes,
            c.genuine,
            c.success_rate * 100.0,
            c.success_ci.lower,
            c.success_ci.upper,
            c.mean_wall_clock_seconds,
            c.mean_input_tokens,
            c.mean_tool_calls,
            c.infra_excluded,
        ));
    }

    if !summary.paired.is_empty() {
        lines.push(String::new());
        lines.push("## Statistical Comparisons".to_owned());
        lines.push(String::new());
        lines.push(
            "| A | B | Pairs | A wins | B wins | McNemar p | Fisher p | CIs overlap |".to_owned(),
        );
        lines.push("|---|---|---|---|---|---|---|---|".to_owned());
        for (paired, unpaired) in summary.paired.iter().zip(&summary.unpaired) {
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {:.4} | {:.4} | {} |",
                paired.condition_a,
                paired.condition_b,
                paired.n_pairs,
                paired.mcnemar.a_wins,
                paired.mcnemar.b_wins,
                paired.mcnemar.p_value,
                unpaired.fisher.p_value,
                if unpaired.ci_overlap { "yes" } else { "no" },
            ));
        }
    }

    // Per-attempt grid, tasks sorted, conditions in summary order.
    let mut by_task: BTreeMap<(String, u32), BTreeMap<String, String>> = BTreeMap::new();
    for record in records {
        let Some((task_id, condition, rep)) = record_key(record) else {
            continue;
        };
        let cell = match record_outcome(record) {
            Outcome::Success => "PASS".to_owned(),
            Outcome::Failure => "FAIL".to_owned(),
            Outcome::Timeout => "TIMEOUT".to_owned(),
            Outcome::PreValidation => "pre-validation".to_owned(),
            Outcome::EmptyRun => "empty-run".to_owned(),
            Outcome::CacheGeneration => "cache-generation".to_owned(),
            Outcome::Infrastructure => "infrastructure".to_owned(),
        };
        by_task.entry((task_id, rep)).or_default().insert(condition, cell);
    }

    if !by_task.is_empty() {
        lines.push(String::new());
        lines.push("## Outcomes".to_owned());
        lines.push(String::new());
        let mut header = "| Task | Rep |".to_owned();
        let mut rule = "|---|---|".to_owned();
        for c in &summary.conditions {
            header.push_str(&format!(" {} |", c.condition));
            rule.push_str("---|");
        }
        lines.push(header);
        lines.push(rule);
        for ((task_id, rep), cells) in &by_task {
            let mut row = format!("| {task_id} | {rep} |");
            for c in &summary.conditions {
                let cell = cells.get(&c.condition).map(String::as_str).unwrap_or("-");
                row.push_str(&format!(" {cell} |"));
            }
            lines.push(row);
        }
    }

    lines.push(String::new());
    lines.join("\n")
}
