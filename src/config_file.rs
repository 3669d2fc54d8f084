//! Configuration file handling for par-run
//!
//! Supported layouts, all sharing one structure:
//!
//! ```toml
//! # commands.toml (or under [tool.par-run] in pyproject.toml)
//! timeout = 60            # file-level defaults, inherited by every group
//! retries = 1
//!
//! [[group]]
//! name = "Formatting"
//! desc = "Code formatting commands"
//! cont_on_fail = true
//!
//!   [group.cmds.ruff_fmt]
//!   exec = "ruff format src"
//!
//!   [group.cmds.ruff_fix]
//!   exec = "ruff check --fix src"
//!   setenv = { RUFF_CACHE_DIR = "/tmp/ruff" }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commands::command::CommandSpec;
use crate::commands::group::{DEFAULT_TIMEOUT, GroupSpec};

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No config file found in current directory or its parents: {0}")]
    ConfigNotFound(PathBuf),
    #[error("Unable to find directory: {path:?} (entry: {entry:?})")]
    DirectoryNotFound {
        entry: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unknown working directory: {0}")]
    UnknownWorkingDirectory(String),
    #[error("Unable to parse TOML config file {path}: {source}")]
    Toml {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("Unable to parse YAML config file {path}: {source}")]
    Yaml {
        source: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("Unable to parse JSON config file {path}: {source}")]
    Json {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("No [tool.par-run] section in {0}")]
    MissingSection(PathBuf),
    #[error("Duplicate name in config: {0}")]
    DuplicateName(String),
    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Configuration for a single command
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigCommand {
    pub exec: String,
    pub cwd: Option<PathBuf>,
    #[serde(alias = "setenv")]
    pub env: Option<HashMap<String, String>>,
}

/// Configuration for a group of commands
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigGroup {
    pub name: String,
    pub desc: Option<String>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub cont_on_fail: Option<bool>,
    pub serial: Option<bool>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub cmds: IndexMap<String, ConfigCommand>,
}

/// Root configuration structure; top-level policy fields are defaults for every group
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Config {
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub cont_on_fail: Option<bool>,
    pub serial: Option<bool>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    #[serde(default, rename = "group", alias = "groups")]
    pub groups: Vec<ConfigGroup>,
}

#[derive(Debug, Deserialize)]
struct PyProject {
    tool: Option<PyProjectTool>,
}

#[derive(Debug, Deserialize)]
struct PyProjectTool {
    #[serde(rename = "par-run")]
    par_run: Option<Config>,
}

impl From<(String, ConfigCommand)> for CommandSpec {
    fn from((name, config): (String, ConfigCommand)) -> Self {
        CommandSpec {
            name,
            exec: config.exec,
            cwd: config.cwd.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
        }
    }
}

impl Config {
    /// Resolve each group's policy against the file-level defaults.
    ///
    /// Inheritance of `cwd` and `env` is applied separately, see [`crate::load_config`].
    #[must_use]
    pub fn into_groups(self) -> Vec<GroupSpec> {
        let Config {
            timeout,
            retries,
            cont_on_fail,
            serial,
            groups,
            ..
        } = self;
        groups
            .into_iter()
            .map(|group| GroupSpec {
                name: group.name,
                description: group.desc,
                timeout: group
                    .timeout
                    .or(timeout)
                    .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
                retries: group.retries.or(retries).unwrap_or(0),
                cont_on_fail: group.cont_on_fail.or(cont_on_fail).unwrap_or(false),
                serial: group.serial.or(serial).unwrap_or(false),
                cwd: group.cwd.unwrap_or_default(),
                env: group.env.unwrap_or_default(),
                commands: group.cmds.into_iter().map(CommandSpec::from).collect(),
            })
            .collect()
    }

    /// Loads and parses a configuration file.
    ///
    /// The format is picked from the file name: `pyproject.toml` reads the `[tool.par-run]`
    /// table, other `.toml` files are read whole, `.json` is JSON and anything else is YAML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if the file cannot be read, a per-format parse
    /// error, or `ConfigError::MissingSection` for a `pyproject.toml` without our table.
    pub fn from_file(file: &Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(file)
            .map_err(|_| ConfigError::ConfigNotFound(file.to_path_buf()))?;
        let is_pyproject = file
            .file_name()
            .is_some_and(|name| name == "pyproject.toml");
        let config = match file.extension().and_then(|ext| ext.to_str()) {
            Some("toml") if is_pyproject => {
                let project: PyProject = toml::from_str(&contents).map_err(|e| ConfigError::Toml {
                    source: e,
                    path: file.to_path_buf(),
                })?;
                project
                    .tool
                    .and_then(|tool| tool.par_run)
                    .ok_or_else(|| ConfigError::MissingSection(file.to_path_buf()))?
            }
            Some("toml") => toml::from_str(&contents).map_err(|e| ConfigError::Toml {
                source: e,
                path: file.to_path_buf(),
            })?,
            Some("json") => serde_json::from_str(&contents).map_err(|e| ConfigError::Json {
                source: e,
                path: file.to_path_buf(),
            })?,
            _ => serde_yaml::from_str(&contents).map_err(|e| ConfigError::Yaml {
                source: e,
                path: file.to_path_buf(),
            })?,
        };
        Ok(config)
    }

    /// Searches for a configuration file in the current directory and its parents.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownWorkingDirectory` if the cwd cannot be determined,
    /// or `ConfigError::ConfigNotFound` if no config file is found.
    pub fn find_config() -> Result<PathBuf, ConfigError> {
        let start = std::env::current_dir()
            .map_err(|e| ConfigError::UnknownWorkingDirectory(e.to_string()))?;
        find_config_from(&start)
    }
}

/// List of supported configuration file names, in lookup order
const FILENAMES: [&str; 5] = [
    "commands.toml",
    ".par-run.yaml",
    ".par-run.yml",
    ".par-run.json",
    "pyproject.toml",
];

fn find_config_from(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut path = start.to_path_buf();
    debug!("Searching for config file in {}", start.display());
    loop {
        for file in &FILENAMES {
            let config_path = path.join(file);
            if config_path.exists() && (*file != "pyproject.toml" || has_section(&config_path)) {
                info!("Found config file: {}", config_path.display());
                return Ok(config_path);
            }
        }
        if !path.pop() {
            return Err(ConfigError::ConfigNotFound(start.to_path_buf()));
        }
    }
}

/// Plenty of projects have a `pyproject.toml`; only claim the ones configuring us
fn has_section(pyproject: &Path) -> bool {
    std::fs::read_to_string(pyproject)
        .ok()
        .and_then(|contents| toml::from_str::<PyProject>(&contents).ok())
        .and_then(|project| project.tool)
        .is_some_and(|tool| tool.par_run.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
timeout = 5
retries = 2

[[group]]
name = "Formatting"
desc = "Code formatting"
cont_on_fail = true

  [group.cmds.zeta]
  exec = "echo zeta"

  [group.cmds.alpha]
  exec = "echo alpha"
  setenv = { FOO = "bar" }

[[group]]
name = "Tests"
timeout = 60
retries = 0
serial = true

  [group.cmds.unit]
  exec = "echo unit"
"#;

    #[test]
    fn test_from_file_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.toml");
        std::fs::write(&path, TOML).unwrap();
        let groups = Config::from_file(&path).unwrap().into_groups();
        assert_eq!(groups.len(), 2);

        let fmt = &groups[0];
        assert_eq!(fmt.description.as_deref(), Some("Code formatting"));
        assert_eq!(fmt.timeout, Duration::from_secs(5));
        assert_eq!(fmt.retries, 2);
        assert!(fmt.cont_on_fail);
        assert!(!fmt.serial);
        // Document order, not alphabetical
        let names: Vec<&str> = fmt.commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(fmt.commands[1].env["FOO"], "bar");

        let tests = &groups[1];
        assert_eq!(tests.timeout, Duration::from_secs(60));
        assert_eq!(tests.retries, 0);
        assert!(!tests.cont_on_fail);
        assert!(tests.serial);
    }

    #[test]
    fn test_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.toml");
        std::fs::write(
            &path,
            "[[group]]\nname = \"g\"\n[group.cmds.a]\nexec = \"true\"\n",
        )
        .unwrap();
        let groups = Config::from_file(&path).unwrap().into_groups();
        assert_eq!(groups[0].timeout, DEFAULT_TIMEOUT);
        assert_eq!(groups[0].retries, 0);
        assert!(!groups[0].cont_on_fail);
        assert!(!groups[0].serial);
    }

    #[test]
    fn test_from_file_pyproject() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyproject.toml");
        std::fs::write(
            &path,
            "[project]\nname = \"demo\"\n\n[[tool.par-run.group]]\nname = \"g\"\n[tool.par-run.group.cmds.a]\nexec = \"true\"\n",
        )
        .unwrap();
        let groups = Config::from_file(&path).unwrap().into_groups();
        assert_eq!(groups[0].name, "g");
        assert_eq!(groups[0].commands[0].exec, "true");
    }

    #[test]
    fn test_pyproject_missing_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyproject.toml");
        std::fs::write(&path, "[project]\nname = \"demo\"\n").unwrap();
        match Config::from_file(&path) {
            Err(ConfigError::MissingSection(p)) => assert_eq!(p, path),
            other => panic!("Expected MissingSection, got: {other:?}"),
        }
    }

    #[test]
    fn test_from_file_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".par-run.yaml");
        std::fs::write(
            &path,
            "group:\n  - name: g\n    serial: true\n    cmds:\n      b:\n        exec: echo b\n      a:\n        exec: echo a\n",
        )
        .unwrap();
        let groups = Config::from_file(&path).unwrap().into_groups();
        assert!(groups[0].serial);
        assert_eq!(groups[0].commands[0].name, "b");
    }

    #[test]
    fn test_from_file_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".par-run.json");
        std::fs::write(
            &path,
            r#"{"groups": [{"name": "g", "retries": 1, "cmds": {"a": {"exec": "echo a"}}}]}"#,
        )
        .unwrap();
        let groups = Config::from_file(&path).unwrap().into_groups();
        assert_eq!(groups[0].retries, 1);
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.toml");
        std::fs::write(&path, "[[group]\nname = ").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn test_find_config_walks_parents_and_skips_foreign_pyproject() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let nested = root.join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("pyproject.toml"), "[project]\nname = \"x\"\n").unwrap();
        std::fs::write(root.join("commands.toml"), TOML).unwrap();

        let found = find_config_from(&nested).unwrap();
        assert_eq!(found, root.join("commands.toml"));
    }
}
