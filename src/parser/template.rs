//! **ResolveTemplate(string, context) → string.**

use regex::Regex;
use std::sync::LazyLock;

use super::expr::{evaluate_expression, Value};
use crate::model::Context;

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").unwrap());

/// Replaces every `{{ expr }}` occurrence with its evaluated value.
/// References that evaluate to null (a path the context doesn't carry)
/// are left as the original `{{ expr }}` literal, matching the contract
/// that unresolved references remain visible rather than silently
/// collapsing to the text "null".
pub fn resolve_template(text: &str, ctx: &Context) -> String {
    TEMPLATE_RE
        .replace_all(text, |caps: &regex::Captures| {
            let expr = caps[1].trim();
            match evaluate_expression(expr, ctx) {
                Ok(Value::Null) if expr != "null" => caps[0].to_string(),
                Ok(value) => value.to_string(),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn ctx() -> Context {
        let mut ctx = Context::new(PathBuf::from("/p"), PathBuf::from("/p/r"), HashMap::new());
        ctx.variables.insert("name".into(), serde_json::json!("widget"));
        ctx.record_output("build", serde_json::json!({"completed_stories": 4}));
        ctx
    }

    #[test]
    fn substitutes_variable_reference() {
        assert_eq!(resolve_template("hello {{ variables.name }}", &ctx()), "hello widget");
    }

    #[test]
    fn substitutes_stage_output_reference() {
        assert_eq!(
            resolve_template("done: {{ stages.build.completed_stories }}", &ctx()),
            "done: 4"
        );
    }

    #[test]
    fn unresolved_reference_left_verbatim() {
        assert_eq!(
            resolve_template("{{ stages.ghost.value }}", &ctx()),
            "{{ stages.ghost.value }}"
        );
    }

    #[test]
    fn multiple_references_in_one_string() {
        assert_eq!(
            resolve_template("{{ variables.name }}-{{ variables.name }}", &ctx()),
            "widget-widget"
        );
    }

    #[test]
    fn literal_null_resolves_to_null_text() {
        assert_eq!(resolve_template("{{ null }}", &ctx()), "null");
    }
}
