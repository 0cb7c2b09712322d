//! Boolean query strings for the provider's search endpoint.

use crate::news::plan::{dedup_case_insensitive, QueryPlan};

/// Join every plan term with ` OR `, quoting multi-word terms.
///
/// Order is keywords, locations, organizations, people, categories; the first
/// spelling of a case-insensitive duplicate wins. An empty plan yields `""`.
pub fn build_boolean_query(plan: &QueryPlan) -> String {
    let terms = plan
        .keywords
        .iter()
        .chain(&plan.entities.locations)
        .chain(&plan.entities.organizations)
        .chain(&plan.entities.people)
        .chain(&plan.categories)
        .cloned();

    dedup_case_insensitive(terms)
        .into_iter()
        .map(|term| {
            if term.contains(char::is_whitespace) {
                format!("\"{}\"", term.replace('"', ""))
            } else {
                term
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}
