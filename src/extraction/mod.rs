mod convert;
mod derive;
mod engine;
mod scoring;
mod table;

pub use convert::convert_value;
pub use engine::{ExtractionStats, PatternExtractionEngine, group_by_parameter};
pub use scoring::{MatchContext, score_match_context};
pub use table::{DEFAULT_FALLBACK_TABLE, DEFAULT_PARAMETER_TABLE, ParameterTable};

#[cfg(test)]
use convert::{ConversionError, parse_number_words};
#[cfg(test)]
use engine::section_boost;
#[cfg(test)]
use scoring::{UnitFamily, context_window};
