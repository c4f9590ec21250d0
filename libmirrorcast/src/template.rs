//! `{{ name }}` placeholder substitution for bio and link templates

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{MirrorError, Result};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
            .expect("PLACEHOLDER is a valid regex pattern")
    })
}

/// Variables available to a template, supplied explicitly by the caller
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Substitute every placeholder; an unknown name is an `InvalidInput` error
pub fn render(template: &str, vars: &TemplateVars) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for captures in placeholder().captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        let value = vars.get(name.as_str()).ok_or_else(|| {
            MirrorError::InvalidInput(format!(
                "unknown template variable '{}' in \"{}\"",
                name.as_str(),
                template
            ))
        })?;

        output.push_str(&template[last..whole.start()]);
        output.push_str(value);
        last = whole.end();
    }

    output.push_str(&template[last..]);
    Ok(output)
}
