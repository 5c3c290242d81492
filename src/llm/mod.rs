mod budget;
mod engine;
mod prompts;
mod provider;
mod response;
#[cfg(test)]
mod tests;

pub use budget::CostBudget;
pub use engine::{CallOutcome, DiscoveryProposal, LlmAssistedEngine, LlmCallRecord};
pub use provider::{GenerationLimits, LlmProvider, build_provider};

#[cfg(test)]
use engine::rank_proposals;
#[cfg(test)]
use response::{ParseErrorKind, ParseStrategy, parse_json_response, recover_json_map};
