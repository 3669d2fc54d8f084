//! Core implementation of the par-run command group runner
//!
//! par-run executes named groups of shell commands described in a configuration file. Groups
//! run one after another; inside a group, commands run either all at once or one at a time,
//! each with its own timeout and retry budget. A failing command either lets its siblings
//! finish (`cont_on_fail`) or cancels them and aborts the remaining groups.
//!
//! The [`runner::Engine`] does the executing and publishes a live stream of
//! [`runner::Event`]s; rendering those is left to consumers such as [`report`].

use std::collections::HashSet;
use std::path::PathBuf;

use log::{debug, warn};

use crate::commands::group::{GroupSpec, RunConfig};
use crate::commands::inherit::{Inheritable, Inheritance};
use crate::config_file::{Config, ConfigError};

pub mod commands;
pub mod config_file;
pub mod logger;
pub mod report;
pub mod runner;

/// Load configuration from a file (or auto-detect), returning the validated `RunConfig`, cwd,
/// and config file path.
///
/// Relative working directories resolve against the directory holding the config file.
///
/// # Errors
///
/// Returns `ConfigError` if the config file is not found, cannot be parsed,
/// contains invalid values, or references non-existent directories.
pub fn load_config(config_file: Option<&str>) -> Result<(RunConfig, PathBuf, PathBuf), ConfigError> {
    let config_path = match config_file {
        Some(file) => {
            let config_path = PathBuf::from(file);
            if !config_path.exists() {
                return Err(ConfigError::ConfigNotFound(config_path));
            }
            config_path
        }
        None => Config::find_config()?,
    };
    let config_path = config_path
        .canonicalize()
        .map_err(|_| ConfigError::ConfigNotFound(config_path.clone()))?;
    let cwd = config_path
        .parent()
        .ok_or_else(|| ConfigError::ConfigNotFound(config_path.clone()))?
        .to_path_buf();
    debug!(
        "Loading config file: {} (cwd: {})",
        config_path.display(),
        cwd.display()
    );
    let parsed = Config::from_file(&config_path)?;
    let root = Inheritance::new(
        commands::inherit::inherit_path(&cwd, parsed.cwd.clone().unwrap_or_default()),
        parsed.env.clone().unwrap_or_default(),
    );
    let mut groups = parsed.into_groups();
    // Validate before touching the filesystem so name errors win over missing directories
    validate_groups(&groups)?;
    for group in &mut groups {
        group.inherit(&root)?;
    }
    Ok((RunConfig::new(groups)?, cwd, config_path))
}

/// Validate groups for duplicate names, empty names, empty commands and zero timeouts
pub(crate) fn validate_groups(groups: &[GroupSpec]) -> Result<(), ConfigError> {
    check_duplicates(groups)?;
    check_empty_names(groups)?;
    check_empty_commands(groups)?;
    check_timeouts(groups)?;
    check_empty_groups(groups);
    Ok(())
}

fn check_duplicates(groups: &[GroupSpec]) -> Result<(), ConfigError> {
    let mut seen_groups = HashSet::new();
    for group in groups {
        if !seen_groups.insert(group.name.as_str()) {
            return Err(ConfigError::DuplicateName(group.name.clone()));
        }
        let mut seen_commands = HashSet::new();
        for cmd in &group.commands {
            if !seen_commands.insert(cmd.name.as_str()) {
                return Err(ConfigError::DuplicateName(format!(
                    "{}.{}",
                    group.name, cmd.name
                )));
            }
        }
    }
    Ok(())
}

fn check_empty_names(groups: &[GroupSpec]) -> Result<(), ConfigError> {
    for group in groups {
        if group.name.trim().is_empty() {
            return Err(ConfigError::Validation("Group has an empty name".to_string()));
        }
        for cmd in &group.commands {
            if cmd.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Command in group '{}' has an empty name",
                    group.name
                )));
            }
        }
    }
    Ok(())
}

fn check_empty_commands(groups: &[GroupSpec]) -> Result<(), ConfigError> {
    for group in groups {
        for cmd in &group.commands {
            if cmd.exec.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Command '{}' has an empty exec string",
                    cmd.name
                )));
            }
        }
    }
    Ok(())
}

fn check_timeouts(groups: &[GroupSpec]) -> Result<(), ConfigError> {
    for group in groups {
        if group.timeout.is_zero() {
            return Err(ConfigError::Validation(format!(
                "Group '{}' has a zero timeout",
                group.name
            )));
        }
    }
    Ok(())
}

fn check_empty_groups(groups: &[GroupSpec]) {
    for group in groups {
        if group.commands.is_empty() {
            warn!("Group '{}' has no commands", group.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::command::CommandSpec;

    #[test]
    fn test_duplicate_group_name_detection() {
        let groups = vec![
            GroupSpec::new("dup", vec![CommandSpec::new("a", "true")]),
            GroupSpec::new("dup", vec![CommandSpec::new("b", "true")]),
        ];
        match validate_groups(&groups).unwrap_err() {
            ConfigError::DuplicateName(name) => assert_eq!(name, "dup"),
            other => panic!("Expected DuplicateName, got: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_command_name_detection() {
        let groups = vec![GroupSpec::new(
            "g",
            vec![CommandSpec::new("a", "true"), CommandSpec::new("a", "false")],
        )];
        match RunConfig::new(groups).unwrap_err() {
            ConfigError::DuplicateName(name) => assert_eq!(name, "g.a"),
            other => panic!("Expected DuplicateName, got: {other:?}"),
        }
    }

    #[test]
    fn test_same_command_name_in_different_groups_passes() {
        let groups = vec![
            GroupSpec::new("g1", vec![CommandSpec::new("a", "true")]),
            GroupSpec::new("g2", vec![CommandSpec::new("a", "true")]),
        ];
        assert!(validate_groups(&groups).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut group = GroupSpec::new("g", vec![CommandSpec::new("a", "true")]);
        group.timeout = std::time::Duration::ZERO;
        assert!(matches!(
            validate_groups(&[group]),
            Err(ConfigError::Validation(_))
        ));
    }
}
