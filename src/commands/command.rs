use std::collections::HashMap;
use std::path::PathBuf;

/// A single external program invocation, identified by name within its group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    /// Shell command line, run through `sh -c`
    pub exec: String,
    /// Empty means "whatever the runner's working directory is"
    pub cwd: PathBuf,
    /// Merged over the inherited process environment; these win on collision
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, exec: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exec: exec.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }
}
