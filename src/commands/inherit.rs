use crate::commands::command::CommandSpec;
use crate::commands::group::GroupSpec;
use crate::config_file::ConfigError;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

#[must_use]
pub fn inherit_path(parent: &Path, child: PathBuf) -> PathBuf {
    if child.as_os_str().is_empty() {
        parent.to_path_buf()
    } else if child.is_relative() {
        parent.join(child)
    } else {
        child
    }
}

/// Settings flowing from the config file down to groups, and from groups down to commands
#[derive(Default, Clone, Debug)]
pub struct Inheritance {
    cwd: PathBuf,
    entry_path: Vec<String>,
    env: HashMap<String, String>,
}

impl Inheritance {
    #[must_use]
    pub fn new(cwd: PathBuf, env: HashMap<String, String>) -> Self {
        Self {
            cwd,
            entry_path: Vec::new(),
            env,
        }
    }

    fn canonicalize(&mut self) -> Result<(), io::Error> {
        if !self.cwd.as_os_str().is_empty() {
            self.cwd = self.cwd.canonicalize()?;
        }
        Ok(())
    }

    fn merge_entry_path(&self, entry: &str) -> Vec<String> {
        let mut new_entry_path = self.entry_path.clone();
        new_entry_path.push(entry.to_string());
        new_entry_path
    }
}

impl From<PathBuf> for Inheritance {
    fn from(cwd: PathBuf) -> Self {
        Inheritance {
            cwd,
            ..Default::default()
        }
    }
}

/// A trait for types that can inherit settings from their parent, eg a command from its group
pub trait Inheritable: Sized {
    /// Calculate the inheritance state for this item.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the inheritance calculation fails.
    fn calculate_inheritance(&self, inheritance: &Inheritance) -> Result<Inheritance, ConfigError>;

    /// Apply previously calculated inheritance to this item.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if applying inheritance fails.
    fn apply_inheritance(&mut self, inheritance: &Inheritance) -> Result<(), ConfigError>;

    /// Calculate and apply inheritance in one step.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DirectoryNotFound` if a referenced directory does not exist.
    fn inherit(&mut self, inheritance: &Inheritance) -> Result<(), ConfigError> {
        let mut inherited = self.calculate_inheritance(inheritance)?;
        inherited
            .canonicalize()
            .map_err(|e| ConfigError::DirectoryNotFound {
                path: inherited.cwd.clone(),
                entry: inherited.entry_path.join("."),
                source: e,
            })?;
        self.apply_inheritance(&inherited)
    }
}

fn calculate_common_inheritance(
    name: &str,
    cwd: &Path,
    env: &HashMap<String, String>,
    inheritance: &Inheritance,
) -> Inheritance {
    let mut merged_env = inheritance.env.clone();
    merged_env.extend(env.clone());
    Inheritance {
        cwd: inherit_path(&inheritance.cwd, cwd.to_path_buf()),
        entry_path: inheritance.merge_entry_path(name),
        env: merged_env,
    }
}

impl Inheritable for CommandSpec {
    fn calculate_inheritance(&self, inheritance: &Inheritance) -> Result<Inheritance, ConfigError> {
        Ok(calculate_common_inheritance(
            &self.name,
            &self.cwd,
            &self.env,
            inheritance,
        ))
    }

    fn apply_inheritance(&mut self, inheritance: &Inheritance) -> Result<(), ConfigError> {
        self.cwd.clone_from(&inheritance.cwd);
        self.env.clone_from(&inheritance.env);
        Ok(())
    }
}

impl Inheritable for GroupSpec {
    fn calculate_inheritance(&self, inheritance: &Inheritance) -> Result<Inheritance, ConfigError> {
        Ok(calculate_common_inheritance(
            &self.name,
            &self.cwd,
            &self.env,
            inheritance,
        ))
    }

    fn apply_inheritance(&mut self, inheritance: &Inheritance) -> Result<(), ConfigError> {
        self.cwd.clone_from(&inheritance.cwd);
        self.env.clone_from(&inheritance.env);
        for command in &mut self.commands {
            command.inherit(inheritance)?;
        }
        Ok(())
    }
}
