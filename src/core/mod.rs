//! Core post-processing modules

pub mod packed_codec;
pub mod impervious;
pub mod qa_rules;
pub mod postprocess;

// Re-export main types
pub use packed_codec::{
    AncillaryClass, AncillaryLayers, DecodeReport, PackedCodec, PackingParams, SevenClass,
};
pub use impervious::{ImperviousMask, ImperviousParams};
pub use qa_rules::{
    AnnualStatistics, QaCode, QaOutcome, QaRule, QaRuleEngine, QaRuleKind, QaSummary,
    QaThresholds, QA_RULES,
};
pub use postprocess::{AnnualQaProcessor, AnnualQaProducts, PackedMask, PackedMaskGenerator};
