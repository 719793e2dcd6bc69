//! `{placeholder}` substitution for the opaque prompt bodies described in spec §6.
use std::collections::HashMap;

/// Replace every `{key}` occurrence in `template` with its value from `vars`.
/// Unknown placeholders are left untouched rather than treated as an error —
/// prompt bodies are opaque text the core does not validate (spec §6).
pub fn render(template: &str, vars: &HashMap<&str, &str>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_placeholders() {
        let mut vars = HashMap::new();
        vars.insert("context_data", "the context");
        vars.insert("response_type", "multiple paragraphs");
        let out = render("Use {context_data} to answer in {response_type}.", &vars);
        assert_eq!(out, "Use the context to answer in multiple paragraphs.");
    }

    #[test]
    fn leaves_unknown_placeholders() {
        let vars = HashMap::new();
        assert_eq!(render("{unknown}", &vars), "{unknown}");
    }
}
