use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::commands::command::CommandSpec;
use crate::config_file::ConfigError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A named set of commands sharing one execution mode and failure policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub description: Option<String>,
    /// Applies to each command attempt separately
    pub timeout: Duration,
    /// Additional attempts after the first failure
    pub retries: u32,
    /// When false, a failing command cancels its siblings and aborts the rest of the run
    pub cont_on_fail: bool,
    /// Run commands one at a time in declared order instead of all at once
    pub serial: bool,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub commands: Vec<CommandSpec>,
}

impl Default for GroupSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            cont_on_fail: false,
            serial: false,
            cwd: PathBuf::new(),
            env: HashMap::new(),
            commands: Vec::new(),
        }
    }
}

impl GroupSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, commands: Vec<CommandSpec>) -> Self {
        Self {
            name: name.into(),
            commands,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// Ordered groups to execute, one group at a time.
///
/// Only constructible through [`RunConfig::new`], so every value has unique group names,
/// unique command names per group and non-empty command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    groups: Vec<GroupSpec>,
}

impl RunConfig {
    /// Validate and wrap a list of groups.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateName` for repeated group or command names and
    /// `ConfigError::Validation` for empty names, empty command lines or zero timeouts.
    pub fn new(groups: Vec<GroupSpec>) -> Result<Self, ConfigError> {
        crate::validate_groups(&groups)?;
        Ok(Self { groups })
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupSpec] {
        &self.groups
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupSpec> {
        self.groups.iter().find(|g| g.name == name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.commands.is_empty())
    }

    /// Returns a flattened list of `(group, command)` pairs in execution order
    #[must_use]
    pub fn all_commands(&self) -> Vec<(&GroupSpec, &CommandSpec)> {
        self.groups
            .iter()
            .flat_map(|g| g.commands.iter().map(move |c| (g, c)))
            .collect()
    }

    /// Narrow the config to the named groups and/or commands.
    ///
    /// `None` keeps everything for that axis. Groups left without commands are dropped.
    #[must_use]
    pub fn select(&self, groups: Option<&[String]>, commands: Option<&[String]>) -> RunConfig {
        let groups = self
            .groups
            .iter()
            .filter(|g| groups.is_none_or(|names| names.contains(&g.name)))
            .map(|g| GroupSpec {
                commands: g
                    .commands
                    .iter()
                    .filter(|c| commands.is_none_or(|names| names.contains(&c.name)))
                    .cloned()
                    .collect(),
                ..g.clone()
            })
            .filter(|g| !g.commands.is_empty())
            .collect();
        // Subsets of a valid config are valid
        RunConfig { groups }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig::new(vec![
            GroupSpec::new(
                "lint",
                vec![CommandSpec::new("fmt", "true"), CommandSpec::new("clippy", "true")],
            ),
            GroupSpec::new("test", vec![CommandSpec::new("unit", "true")]),
        ])
        .unwrap()
    }

    #[test]
    fn test_select_groups() {
        let selected = config().select(Some(&["test".to_string()]), None);
        assert_eq!(selected.groups().len(), 1);
        assert_eq!(selected.groups()[0].name, "test");
    }

    #[test]
    fn test_select_commands_drops_empty_groups() {
        let selected = config().select(None, Some(&["clippy".to_string()]));
        assert_eq!(selected.groups().len(), 1);
        assert_eq!(selected.groups()[0].commands.len(), 1);
        assert_eq!(selected.groups()[0].commands[0].name, "clippy");
    }

    #[test]
    fn test_select_nothing_matches() {
        let selected = config().select(Some(&["missing".to_string()]), None);
        assert!(selected.is_empty());
    }
}
