// =============================================================================
// analysis — section extraction, materiality scoring, and the diff engine
// =============================================================================

pub mod diff_engine;
pub mod materiality;
pub mod section_extractor;
