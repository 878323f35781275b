//! Core water occurrence processing modules

pub mod reproject;
pub mod classify;
pub mod mask_combiner;
pub mod masking;
pub mod occurrence;
pub mod mosaic;
pub mod pipeline;

// Re-export main types
pub use reproject::reproject_nearest;
pub use classify::WaterClassifier;
pub use mask_combiner::{MaskCombiner, MaskCombinerConfig, MaskLayer, ContaminationMask, MaskDecision};
pub use masking::{MaskingStage, MaskingReport, MaskCoverage, DateOutcome, SceneMasking};
pub use occurrence::{OccurrenceAccumulator, OccurrenceAggregator, Aggregation};
pub use mosaic::{MosaicComposer, MosaicInput};
pub use pipeline::{PipelineConfig, TileProcessor, TileWorkspace, TileReport, BatchReport};
