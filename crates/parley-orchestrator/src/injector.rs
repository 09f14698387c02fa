//! `{{tN.result}}` substitution in task inputs

use crate::error::OrchestratorError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static RESULT_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([a-zA-Z0-9_\-]+)\.result\}\}").expect("valid regex"));

/// Whether `input` references any task result
#[must_use]
pub fn has_references(input: &str) -> bool {
    RESULT_REF.is_match(input)
}

/// Ids referenced by `input`, in order of appearance
#[must_use]
pub fn referenced_ids(input: &str) -> Vec<String> {
    RESULT_REF
        .captures_iter(input)
        .map(|c| c[1].to_string())
        .collect()
}

/// Replace each reference with the JSON-quoted result of a completed task.
///
/// Fails on the first reference to a task without a result.
pub fn resolve(input: &str, results: &HashMap<String, String>) -> Result<String, OrchestratorError> {
    let mut missing = None;
    let resolved = RESULT_REF.replace_all(input, |caps: &Captures<'_>| {
        let id = &caps[1];
        match results.get(id) {
            Some(result) => serde_json::to_string(result).unwrap_or_else(|_| result.clone()),
            None => {
                missing.get_or_insert_with(|| id.to_string());
                caps[0].to_string()
            }
        }
    });

    match missing {
        Some(id) => Err(OrchestratorError::UnresolvedReference(id)),
        None => Ok(resolved.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_quoted_results() {
        let results = HashMap::from([("t1".to_string(), "line \"one\"\nline two".to_string())]);
        let resolved = resolve("summarize {{t1.result}} please", &results).unwrap();
        assert_eq!(resolved, "summarize \"line \\\"one\\\"\\nline two\" please");
    }

    #[test]
    fn missing_result_is_an_error() {
        let results = HashMap::new();
        assert_eq!(
            resolve("use {{t2.result}}", &results),
            Err(OrchestratorError::UnresolvedReference("t2".into()))
        );
    }

    #[test]
    fn plain_input_is_untouched() {
        assert!(!has_references("no refs {{here}}"));
        assert_eq!(resolve("no refs", &HashMap::new()).unwrap(), "no refs");
        assert_eq!(referenced_ids("{{a.result}} {{b-2.result}}"), vec!["a", "b-2"]);
    }
}
