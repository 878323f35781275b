//! Puddle Hunter: masked water occurrence frequency from classified satellite time series
//!
//! Per-date water classifications are cleaned of cloud, cloud-shadow and
//! terrain-shadow contamination, stacked on a common grid and reduced to the
//! proportion of valid dates on which each pixel was water. Per-tile surfaces
//! can then be mosaicked into one composite.

pub mod types;
pub mod io;
pub mod core;
pub mod config;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use types::{
    RasterGrid, GridSpec, GeoTransform, Crs, SceneDate, DateRange, TileCode,
    MaskKind, RasterRole, HunterError, HunterResult
};

pub use config::Settings;
pub use crate::core::{TileProcessor, PipelineConfig, MosaicComposer};
