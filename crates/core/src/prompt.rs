//! Renders the extraction prompt sent to the completion service.

use crate::registry::PolicyRegistry;

/// Literal the model is told to answer with when no policy fits.
pub const NO_MATCH_TOKEN: &str = "none";

/// Builds the completion prompt for `utterance`.
///
/// Every policy becomes one `- name: description` line. The utterance is
/// embedded verbatim, newlines included.
pub fn build(utterance: &str, registry: &PolicyRegistry) -> String {
    let policies = registry
        .iter()
        .map(|p| format!("- {}: {}", p.name, p.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Given the following list of available robot policies and their descriptions:\n\
         {policies}\n\
         \n\
         Based on the user's request: {utterance}\n\
         Return ONLY the name of the most appropriate policy from the list. \
         If none match well, return \"{none}\".\n\
         Response should be just the policy name or \"{none}\", nothing else.",
        policies = policies,
        utterance = utterance,
        none = NO_MATCH_TOKEN,
    )
}
