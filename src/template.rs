//! Template variable substitution
//!
//! The dashboard host owns the real variable state; the data source only needs
//! `replace`. [`TemplateVariables`] is a small in-memory implementation used by
//! the command line tool and the tests.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::ScopedVars;

static VARIABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\w+)|\$\{(\w+)\}|\[\[(\w+)\]\]").expect("variable pattern is valid")
});

pub trait TemplateSrv: Send + Sync {
    /// Substitute `$var`, `${var}` and `[[var]]`; scoped variables win.
    fn replace(&self, text: &str, scoped_vars: &ScopedVars) -> String;
}

/// Dashboard variables kept in memory
#[derive(Debug, Clone, Default)]
pub struct TemplateVariables {
    variables: HashMap<String, String>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }
}

impl TemplateSrv for TemplateVariables {
    fn replace(&self, text: &str, scoped_vars: &ScopedVars) -> String {
        VARIABLE_PATTERN
            .replace_all(text, |caps: &Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();

                scoped_vars
                    .get(name)
                    .or_else(|| self.variables.get(name))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
