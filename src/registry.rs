// Tool command registry: maps a hook name to the argv used to invoke it

use crate::error::{ConfigError, Result};
use std::collections::BTreeMap;

/// Read-only lookup from hook name to invocation argv.
///
/// Built once at startup with [`ToolCommandRegistry::register`], then shared
/// behind an `Arc` by the executor. Lookups never mutate state.
#[derive(Debug, Clone, Default)]
pub struct ToolCommandRegistry {
    commands: BTreeMap<String, Vec<String>>,
}

impl ToolCommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the stock invocation of common tools.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        for (name, argv) in BUILTIN_TOOLS {
            registry.register(*name, argv.iter().map(|s| s.to_string()).collect());
        }
        registry
    }

    /// Register (or replace) the argv for a tool.
    pub fn register(&mut self, name: impl Into<String>, argv: Vec<String>) -> &mut Self {
        self.commands.insert(name.into(), argv);
        self
    }

    /// Look up the argv for `name`.
    pub fn get_command(&self, name: &str) -> Result<&[String]> {
        match self.commands.get(name) {
            Some(argv) if !argv.is_empty() => Ok(argv.as_slice()),
            Some(_) => Err(ConfigError::InvalidValue {
                field: format!("tools.{name}"),
                value: "[]".to_string(),
                message: "command argv must not be empty".to_string(),
            }
            .into()),
            None => Err(ConfigError::UnknownTool {
                name: name.to_string(),
                available: self.names(),
            }
            .into()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

const BUILTIN_TOOLS: &[(&str, &[&str])] = &[
    ("ruff-format", &["ruff", "format", "."]),
    ("ruff-check", &["ruff", "check", "--output-format=concise", "."]),
    ("trailing-whitespace", &["trailing-whitespace-fixer"]),
    ("end-of-file-fixer", &["end-of-file-fixer"]),
    ("codespell", &["codespell"]),
    ("pyright", &["pyright"]),
    ("bandit", &["bandit", "-r", ".", "-f", "json", "-q"]),
    ("complexipy", &["complexipy", "."]),
    ("cargo-fmt", &["cargo", "fmt", "--all"]),
    ("cargo-clippy", &["cargo", "clippy", "--all-targets", "--", "-D", "warnings"]),
];
