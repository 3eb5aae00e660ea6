// src/notify/template.rs

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    match Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}") {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(error = %e, "invalid placeholder pattern");
            None
        }
    }
});

/// Replace every `{{name}}` with `vars[name]`. Unknown names are left as is.
pub fn render(template: &str, vars: &BTreeMap<&str, String>) -> String {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &Captures<'_>| {
        vars.get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_and_keeps_unknown() {
        let mut vars = BTreeMap::new();
        vars.insert("list", "nightly".to_string());
        vars.insert("duration", "3s".to_string());
        let out = render("{{list}} took {{ duration }} ({{missing}})", &vars);
        assert_eq!(out, "nightly took 3s ({{missing}})");
    }
}
