// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("selectors with matchExpressions cannot be evaluated")]
    ExpressionsUnsupported,
}

/// Whether the selector selects everything (no terms at all).
#[must_use]
pub fn selector_is_empty(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().is_none_or(BTreeMap::is_empty)
        && selector.match_expressions.as_ref().is_none_or(Vec::is_empty)
}

/// Evaluates a label selector against a label set. Only `matchLabels` terms
/// are supported; an empty selector matches everything.
///
/// # Errors
///
/// Returns an error for selectors carrying `matchExpressions`.
pub fn selector_matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Result<bool, SelectorError> {
    if selector
        .match_expressions
        .as_ref()
        .is_some_and(|exprs| !exprs.is_empty())
    {
        return Err(SelectorError::ExpressionsUnsupported);
    }
    let Some(required) = selector.match_labels.as_ref() else {
        return Ok(true);
    };
    Ok(required
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value)))
}
