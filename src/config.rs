use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cli::RunArgs;
use crate::error::HarnessError;
use crate::runner::Timeouts;
use crate::taskset::{parse_conditions, Condition};

// Precedence: CLI > env > file > defaults.

const DEFAULT_AGENT_CMD: &str = "claude";
const DEFAULT_PARALLEL: u32 = 1;
const DEFAULT_REPETITIONS: u32 = 1;
const DEFAULT_AGENT_TIMEOUT_SEC: u64 = 300;
const DEFAULT_GENERATION_TIMEOUT_SEC: u64 = 600;
const DEFAULT_PRE_VALIDATION_TIMEOUT_SEC: u64 = 180;
const DEFAULT_POST_TEST_TIMEOUT_SEC: u64 = 180;
const DEFAULT_MAX_TURNS: u32 = 50;
const DEFAULT_OUTPUT_DIR: &str = "results";
const DEFAULT_WORKSPACES_DIR: &str = "workspaces";
const DEFAULT_CACHE_DIR: &str = "workspaces/.context-cache";

const ENV_PREFIX: &str = "CTXBENCH_";

/// Resolved configuration for a run.
///
/// Built from three layers with precedence CLI > env > file > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub task_files: Vec<PathBuf>,
    pub conditions: Vec<Condition>,
    pub parallel: u32,
    pub repetitions: u32,
    pub agent_cmd: String,
    pub model: Option<String>,
    pub agent_timeout_sec: u64,
    pub generation_timeout_sec: u64,
    pub pre_validation_timeout_sec: u64,
    pub post_test_timeout_sec: u64,
    pub max_turns: u32,
    pub output_dir: PathBuf,
    pub workspaces_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Clone each repo once locally and share objects into per-item clones.
    pub reference_clones: bool,
    pub keep_workspaces: bool,
    /// Prior run manifest to merge completed items from.
    pub resume: Option<PathBuf>,
    pub dry_run: bool,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

/// TOML-deserializable config file representation. All fields optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    task_files: Option<Vec<PathBuf>>,
    conditions: Option<String>,
    parallel: Option<u32>,
    repetitions: Option<u32>,
    agent_cmd: Option<String>,
    model: Option<String>,
    agent_timeout_sec: Option<u64>,
    generation_timeout_sec: Option<u64>,
    pre_validation_timeout_sec: Option<u64>,
    post_test_timeout_sec: Option<u64>,
    max_turns: Option<u32>,
    output_dir: Option<PathBuf>,
    workspaces_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    reference_clones: Option<bool>,
    keep_workspaces: Option<bool>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

/// Intermediate layer where every field is optional, used to merge sources.
#[derive(Debug, Default)]
struct ConfigLayer {
    task_files: Option<Vec<PathBuf>>,
    conditions: Option<String>,
    parallel: Option<u32>,
    repetitions: Option<u32>,
    agent_cmd: Option<String>,
    model: Option<String>,
    agent_timeout_sec: Option<u64>,
    generation_timeout_sec: Option<u64>,
    pre_validation_timeout_sec: Option<u64>,
    post_test_timeout_sec: Option<u64>,
    max_turns: Option<u32>,
    output_dir: Option<PathBuf>,
    workspaces_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    reference_clones: Option<bool>,
    keep_workspaces: Option<bool>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

impl RunConfig {
    /// Load configuration with precedence: CLI > env > file > defaults.
    pub fn load(config_path: Option<&Path>, cli_args: &RunArgs) -> anyhow::Result<Self> {
        Self::load_with_env(config_path, cli_args, real_env_var)
    }

    /// Internal constructor that accepts an env-var lookup function,
    /// enabling deterministic testing without process-global mutation.
    fn load_with_env(
        config_path: Option<&Path>,
        cli_args: &RunArgs,
        env_fn: fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let file_layer = match config_path {
            Some(path) => load_file_layer(path)?,
            None => ConfigLayer::default(),
        };
        let env_layer = load_env_layer(env_fn)?;
        let cli_layer = cli_layer_from(cli_args);

        let merged = merge_layers(file_layer, env_layer, cli_layer);

        let task_files = merged.task_files.unwrap_or_default();
        if task_files.is_empty() {
            anyhow::bail!(
                "at least one task file is required (via --tasks, CTXBENCH_TASK_FILES, or config file)"
            );
        }

        let conditions = match merged.conditions {
            Some(spec) => parse_conditions(&spec)?,
            None => Condition::all(),
        };

        Ok(RunConfig {
            task_files,
            conditions,
            parallel: merged.parallel.unwrap_or(DEFAULT_PARALLEL),
            repetitions: merged.repetitions.unwrap_or(DEFAULT_REPETITIONS),
            agent_cmd: merged
                .agent_cmd
                .unwrap_or_else(|| DEFAULT_AGENT_CMD.to_owned()),
            model: merged.model,
            agent_timeout_sec: merged.agent_timeout_sec.unwrap_or(DEFAULT_AGENT_TIMEOUT_SEC),
            generation_timeout_sec: merged
                .generation_timeout_sec
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SEC),
            pre_validation_timeout_sec: merged
                .pre_validation_timeout_sec
                .unwrap_or(DEFAULT_PRE_VALIDATION_TIMEOUT_SEC),
            post_test_timeout_sec: merged
                .post_test_timeout_sec
                .unwrap_or(DEFAULT_POST_TEST_TIMEOUT_SEC),
            max_turns: merged.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
            output_dir: merged
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            workspaces_dir: merged
                .workspaces_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACES_DIR)),
            cache_dir: merged
                .cache_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            reference_clones: merged.reference_clones.unwrap_or(false),
            keep_workspaces: merged.keep_workspaces.unwrap_or(false),
            resume: cli_args.resume.clone(),
            dry_run: cli_args.dry_run,
            log_level: merged.log_level,
            log_file: merged.log_file,
        })
    }

    /// Validate the resolved values before any work starts.
    pub fn validate(&self) -> Result<(), HarnessError> {
        for path in &self.task_files {
            if !path.is_file() {
                return Err(HarnessError::ConfigInvalid {
                    detail: format!("task file {} does not exist", path.display()),
                });
            }
        }
        if self.conditions.is_empty() {
            return Err(HarnessError::ConfigInvalid {
                detail: "at least one condition is required".to_owned(),
            });
        }
        if self.parallel == 0 {
            return Err(HarnessError::ConfigInvalid {
                detail: "parallel must be at least 1".to_owned(),
            });
        }
        if self.repetitions == 0 {
            return Err(HarnessError::ConfigInvalid {
                detail: "repetitions must be at least 1".to_owned(),
            });
        }
        if let Some(resume) = &self.resume {
            if !resume.is_file() {
                return Err(HarnessError::ConfigInvalid {
                    detail: format!("resume file {} does not exist", resume.display()),
                });
            }
        }
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            pre_validation: Duration::from_secs(self.pre_validation_timeout_sec),
            generation: Duration::from_secs(self.generation_timeout_sec),
            agent: Duration::from_secs(self.agent_timeout_sec),
            post_test: Duration::from_secs(self.post_test_timeout_sec),
        }
    }
}

fn load_file_layer(path: &Path) -> Result<ConfigLayer, HarnessError> {
    let contents = fs::read_to_string(path).map_err(|e| HarnessError::ConfigFileRead {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let fc: FileConfig =
        toml::from_str(&contents).map_err(|e| HarnessError::ConfigFileParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    Ok(ConfigLayer {
        task_files: fc.task_files,
        conditions: fc.conditions,
        parallel: fc.parallel,
        repetitions: fc.repetitions,
        agent_cmd: fc.agent_cmd,
        model: fc.model,
        agent_timeout_sec: fc.agent_timeout_sec,
        generation_timeout_sec: fc.generation_timeout_sec,
        pre_validation_timeout_sec: fc.pre_validation_timeout_sec,
        post_test_timeout_sec: fc.post_test_timeout_sec,
        max_turns: fc.max_turns,
        output_dir: fc.output_dir,
        workspaces_dir: fc.workspaces_dir,
        cache_dir: fc.cache_dir,
        reference_clones: fc.reference_clones,
        keep_workspaces: fc.keep_workspaces,
        log_level: fc.log_level,
        log_file: fc.log_file,
    })
}

fn real_env_var(suffix: &str) -> Option<String> {
    let key = format!("{ENV_PREFIX}{suffix}");
    env::var(&key).ok().filter(|v| !v.is_empty())
}

fn load_env_layer(env_fn: fn(&str) -> Option<String>) -> Result<ConfigLayer, HarnessError> {
    Ok(ConfigLayer {
        task_files: env_fn("TASK_FILES").map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect()
        }),
        conditions: env_fn("CONDITIONS"),
        parallel: parse_env_u32(env_fn, "PARALLEL")?,
        repetitions: parse_env_u32(env_fn, "REPETITIONS")?,
        agent_cmd: env_fn("AGENT_CMD"),
        model: env_fn("MODEL"),
        agent_timeout_sec: parse_env_u64(env_fn, "AGENT_TIMEOUT_SEC")?,
        generation_timeout_sec: parse_env_u64(env_fn, "GENERATION_TIMEOUT_SEC")?,
        pre_validation_timeout_sec: parse_env_u64(env_fn, "PRE_VALIDATION_TIMEOUT_SEC")?,
        post_test_timeout_sec: parse_env_u64(env_fn, "POST_TEST_TIMEOUT_SEC")?,
        max_turns: parse_env_u32(env_fn, "MAX_TURNS")?,
        output_dir: env_fn("OUTPUT_DIR").map(PathBuf::from),
        workspaces_dir: env_fn("WORKSPACES_DIR").map(PathBuf::from),
        cache_dir: env_fn("CACHE_DIR").map(PathBuf::from),
        reference_clones: parse_env_bool(env_fn, "REFERENCE_CLONES")?,
        keep_workspaces: parse_env_bool(env_fn, "KEEP_WORKSPACES")?,
        log_level: env_fn("LOG_LEVEL"),
        log_file: env_fn("LOG_FILE").map(PathBuf::from),
    })
}

fn parse_env_u32(
    env_fn: fn(&str) -> Option<String>,
    suffix: &str,
) -> Result<Option<u32>, HarnessError> {
    match env_fn(suffix) {
        Some(s) => s
            .parse::<u32>()
            .map(Some)
            .map_err(|e| HarnessError::ConfigEnvParseError {
                var: format!("{ENV_PREFIX}{suffix}"),
                detail: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_env_u64(
    env_fn: fn(&str) -> Option<String>,
    suffix: &str,
) -> Result<Option<u64>, HarnessError> {
    match env_fn(suffix) {
        Some(s) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|e| HarnessError::ConfigEnvParseError {
                var: format!("{ENV_PREFIX}{suffix}"),
                detail: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_env_bool(
    env_fn: fn(&str) -> Option<String>,
    suffix: &str,
) -> Result<Option<bool>, HarnessError> {
    match env_fn(suffix) {
        Some(s) => s
            .parse::<bool>()
            .map(Some)
            .map_err(|e| HarnessError::ConfigEnvParseError {
                var: format!("{ENV_PREFIX}{suffix}"),
                detail: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn cli_layer_from(args: &RunArgs) -> ConfigLayer {
    ConfigLayer {
        task_files: if args.tasks.is_empty() {
            None
        } else {
            Some(args.tasks.clone())
        },
        conditions: args.conditions.clone(),
        parallel: args.parallel,
        repetitions: args.repetitions,
        agent_cmd: args.agent_cmd.clone(),
        model: args.model.clone(),
        agent_timeout_sec: args.agent_timeout_sec,
        generation_timeout_sec: args.generation_timeout_sec,
        pre_validation_timeout_sec: args.pre_validation_timeout_sec,
        post_test_timeout_sec: args.post_test_timeout_sec,
        max_turns: args.max_turns,
        output_dir: args.output.clone(),
        workspaces_dir: args.workspaces_dir.clone(),
        cache_dir: args.cache_dir.clone(),
        reference_clones: if args.reference_clones {
            Some(true)
        } else {
            None
        },
        keep_workspaces: if args.keep_workspaces { Some(true) } else { None },
        log_level: args.log_level.clone(),
        log_file: args.log_file.clone(),
    }
}

/// Merge three layers. For each field, pick CLI first, then env, then file.
fn merge_layers(file: ConfigLayer, env: ConfigLayer, cli: ConfigLayer) -> ConfigLayer {
    ConfigLayer {
        task_files: cli.task_files.or(env.task_files).or(file.task_files),
        conditions: cli.conditions.or(env.conditions).or(file.conditions),
        parallel: cli.parallel.or(env.parallel).or(file.parallel),
        repetitions: cli.repetitions.or(env.repetitions).or(file.repetitions),
        agent_cmd: cli.agent_cmd.or(env.agent_cmd).or(file.agent_cmd),
        model: cli.model.or(env.model).or(file.model),
        agent_timeout_sec: cli
            .agent_timeout_sec
            .or(env.agent_timeout_sec)
            .or(file.agent_timeout_sec),
        generation_timeout_sec: cli
            .generation_timeout_sec
            .or(env.generation_timeout_sec)
            .or(file.generation_timeout_sec),
        pre_validation_timeout_sec: cli
            .pre_validation_timeout_sec
            .or(env.pre_validation_timeout_sec)
            .or(file.pre_validation_timeout_sec),
        post_test_timeout_sec: cli
            .post_test_timeout_sec
            .or(env.post_test_timeout_sec)
            .or(file.post_test_timeout_sec),
        max_turns: cli.max_turns.or(env.max_turns).or(file.max_turns),
        output_dir: cli.output_dir.or(env.output_dir).or(file.output_dir),
        workspaces_dir: cli
            .workspaces_dir
            .or(env.workspaces_dir)
            .or(file.workspaces_dir),
        cache_dir: cli.cache_dir.or(env.cache_dir).or(file.cache_dir),
        reference_clones: cli
            .reference_clones
            .or(env.reference_clones)
            .or(file.reference_clones),
        keep_workspaces: cli
            .keep_workspaces
            .or(env.keep_workspaces)
            .or(file.keep_workspaces),
        log_level: cli.log_level.or(env.log_level).or(file.log_level),
        log_file: cli.log_file.or(env.log_file).or(file.log_file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_suffix: &str) -> Option<String> {
        None
    }

    fn minimal_cli_args(tasks: Vec<PathBuf>) -> RunArgs {
        RunArgs {
            tasks,
            conditions: None,
            parallel: None,
            repetitions: None,
            config: None,
            agent_cmd: None,
            model: None,
            agent_timeout_sec: None,
            generation_timeout_sec: None,
            pre_validation_timeout_sec: None,
            post_test_timeout_sec: None,
            max_turns: None,
            output: None,
            workspaces_dir: None,
            cache_dir: None,
            reference_clones: false,
            keep_workspaces: false,
            resume: None,
            dry_run: false,
            log_level: None,
            log_file: None,
        }
    }

    #[test]
    fn defaults_applied_when_only_tasks_present() {
        let args = minimal_cli_args(vec![PathBuf::from("tasks.yaml")]);
        let cfg = RunConfig::load_with_env(None, &args, no_env).unwrap();

        assert_eq!(cfg.task_files, vec![PathBuf::from("tasks.yaml")]);
        assert_eq!(cfg.conditions, Condition::all());
        assert_eq!(cfg.parallel, 1);
        assert_eq!(cfg.repetitions, 1);
        assert_eq!(cfg.agent_cmd, "claude");
        assert_eq!(cfg.agent_timeout_sec, 300);
        assert_eq!(cfg.generation_timeout_sec, 600);
        assert_eq!(cfg.max_turns, 50);
        assert_eq!(cfg.output_dir, PathBuf::from("results"));
        assert_eq!(cfg.cache_dir, PathBuf::from("workspaces/.context-cache"));
        assert!(!cfg.reference_clones);
        assert!(!cfg.keep_workspaces);
    }

    #[test]
    fn missing_task_files_errors() {
        let args = minimal_cli_args(vec![]);
        let err = RunConfig::load_with_env(None, &args, no_env).unwrap_err();
        assert!(
            format!("{err}").contains("task file is required"),
            "unexpected: {err}"
        );
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("ctxbench.toml");
        fs::write(
            &cfg_path,
            r#"
task_files = ["tasks/widgets.yaml", "tasks/gadgets.yaml"]
conditions = "none,flat"
parallel = 4
repetitions = 3
agent_cmd = "my-agent"
model = "opus"
agent_timeout_sec = 120
reference_clones = true
"#,
        )
        .unwrap();

        let args = minimal_cli_args(vec![]);
        let cfg = RunConfig::load_with_env(Some(&cfg_path), &args, no_env).unwrap();

        assert_eq!(cfg.task_files.len(), 2);
        assert_eq!(cfg.conditions, vec![Condition::None, Condition::Flat]);
        assert_eq!(cfg.parallel, 4);
        assert_eq!(cfg.repetitions, 3);
        assert_eq!(cfg.agent_cmd, "my-agent");
        assert_eq!(cfg.model.as_deref(), Some("opus"));
        assert_eq!(cfg.agent_timeout_sec, 120);
        assert!(cfg.reference_clones);
    }

    #[test]
    fn cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("ctxbench.toml");
        fs::write(
            &cfg_path,
            r#"
task_files = ["file-tasks.yaml"]
parallel = 2
model = "from-file"
"#,
        )
        .unwrap();

        let mut args = minimal_cli_args(vec![PathBuf::from("cli-tasks.yaml")]);
        args.model = Some("from-cli".to_owned());
        let cfg = RunConfig::load_with_env(Some(&cfg_path), &args, no_env).unwrap();

        assert_eq!(cfg.task_files, vec![PathBuf::from("cli-tasks.yaml")], "CLI wins");
        assert_eq!(cfg.parallel, 2, "file fallback");
        assert_eq!(cfg.model.as_deref(), Some("from-cli"), "CLI wins");
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("ctxbench.toml");
        fs::write(
            &cfg_path,
            r#"
task_files = ["t.yaml"]
agent_cmd = "from-file"
"#,
        )
        .unwrap();

        fn fake_env(suffix: &str) -> Option<String> {
            if suffix == "AGENT_CMD" {
                Some("from-env".to_owned())
            } else {
                None
            }
        }

        let args = minimal_cli_args(vec![]);
        let cfg = RunConfig::load_with_env(Some(&cfg_path), &args, fake_env).unwrap();
        assert_eq!(cfg.agent_cmd, "from-env", "env wins over file");
    }

    #[test]
    fn cli_overrides_env() {
        fn fake_env(suffix: &str) -> Option<String> {
            if suffix == "PARALLEL" {
                Some("8".to_owned())
            } else {
                None
            }
        }

        let mut args = minimal_cli_args(vec![PathBuf::from("t.yaml")]);
        args.parallel = Some(2);
        let cfg = RunConfig::load_with_env(None, &args, fake_env).unwrap();
        assert_eq!(cfg.parallel, 2, "CLI wins over env");
    }

    #[test]
    fn env_task_files_parsed_from_comma_separated() {
        fn fake_env(suffix: &str) -> Option<String> {
            if suffix == "TASK_FILES" {
                Some("a.yaml, b.yaml".to_owned())
            } else {
                None
            }
        }

        let args = minimal_cli_args(vec![]);
        let cfg = RunConfig::load_with_env(None, &args, fake_env).unwrap();
        assert_eq!(
            cfg.task_files,
            vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]
        );
    }

    #[test]
    fn invalid_env_number_errors() {
        fn fake_env(suffix: &str) -> Option<String> {
            if suffix == "PARALLEL" {
                Some("many".to_owned())
            } else {
                None
            }
        }

        let args = minimal_cli_args(vec![PathBuf::from("t.yaml")]);
        let err = RunConfig::load_with_env(None, &args, fake_env).unwrap_err();
        assert!(format!("{err}").contains("CTXBENCH_PARALLEL"));
    }

    #[test]
    fn invalid_condition_name_errors() {
        let mut args = minimal_cli_args(vec![PathBuf::from("t.yaml")]);
        args.conditions = Some("none,bogus".to_owned());
        assert!(RunConfig::load_with_env(None, &args, no_env).is_err());
    }

    #[test]
    fn invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("ctxbench.toml");
        fs::write(&cfg_path, "not valid {{{{ toml").unwrap();

        let args = minimal_cli_args(vec![PathBuf::from("t.yaml")]);
        let err = RunConfig::load_with_env(Some(&cfg_path), &args, no_env).unwrap_err();
        assert!(format!("{err}").contains("Failed to parse config file"));
    }

    #[test]
    fn unknown_toml_key_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("ctxbench.toml");
        fs::write(&cfg_path, "task_files = [\"t.yaml\"]\nbogus_key = true\n").unwrap();

        let args = minimal_cli_args(vec![]);
        let err = RunConfig::load_with_env(Some(&cfg_path), &args, no_env).unwrap_err();
        assert!(format!("{err}").contains("Failed to parse config file"));
    }

    #[test]
    fn validate_rejects_zero_parallel_and_repetitions() {
        let dir = tempfile::tempdir().unwrap();
        let task_file = dir.path().join("t.yaml");
        fs::write(&task_file, "repo: {}\ntasks: []\n").unwrap();

        let mut args = minimal_cli_args(vec![task_file.clone()]);
        args.parallel = Some(0);
        let cfg = RunConfig::load_with_env(None, &args, no_env).unwrap();
        assert!(cfg.validate().is_err());

        let mut args = minimal_cli_args(vec![task_file]);
        args.repetitions = Some(0);
        let cfg = RunConfig::load_with_env(None, &args, no_env).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_task_file() {
        let args = minimal_cli_args(vec![PathBuf::from("/no/such/tasks.yaml")]);
        let cfg = RunConfig::load_with_env(None, &args, no_env).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, HarnessError::ConfigInvalid { .. }));
    }

    #[test]
    fn validate_rejects_missing_resume_file() {
        let dir = tempfile::tempdir().unwrap();
        let task_file = dir.path().join("t.yaml");
        fs::write(&task_file, "repo: {}\ntasks: []\n").unwrap();

        let mut args = minimal_cli_args(vec![task_file]);
        args.resume = Some(PathBuf::from("/no/such/run.json"));
        let cfg = RunConfig::load_with_env(None, &args, no_env).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn timeouts_reflect_configured_seconds() {
        let mut args = minimal_cli_args(vec![PathBuf::from("t.yaml")]);
        args.agent_timeout_sec = Some(42);
        let cfg = RunConfig::load_with_env(None, &args, no_env).unwrap();
        let timeouts = cfg.timeouts();
        assert_eq!(timeouts.agent, Duration::from_secs(42));
        assert_eq!(timeouts.generation, Duration::from_secs(600));
    }
}
