use crate::core::reproject::reproject_nearest;
use crate::io::raster::RasterReader;
use crate::types::{GridSpec, HunterResult, MaskKind, PixelType, RasterGrid};
use ndarray::{Array2, Zip};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Class codes and skip policy for the quality masks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskCombinerConfig {
    /// Code marking a cloudy pixel in cloud masks
    pub cloud_class_code: f64,
    /// Code marking a shadowed pixel in cloud-shadow and topo-shadow masks
    pub shadow_class_code: f64,
    /// A date is dropped when any shadow mask covers strictly more than this fraction
    pub shadow_skip_fraction: f64,
}

impl Default for MaskCombinerConfig {
    fn default() -> Self {
        Self {
            cloud_class_code: 1.0,
            shadow_class_code: 2.0,
            shadow_skip_fraction: 0.5,
        }
    }
}

/// Binary quality mask for one date (1 = contaminated)
#[derive(Debug, Clone)]
pub struct MaskLayer {
    pub kind: MaskKind,
    pub grid: RasterGrid<u8>,
    /// Contaminated pixels over all pixels, measured on the native grid
    pub contaminated_fraction: f64,
}

/// Union of all mask layers for a date on the water layer's grid
#[derive(Debug, Clone, PartialEq)]
pub struct ContaminationMask {
    mask: Array2<u8>,
    layer_count: usize,
}

impl ContaminationMask {
    /// All-clear mask for a date without any quality layers
    pub fn empty(shape: (usize, usize)) -> Self {
        Self {
            mask: Array2::zeros(shape),
            layer_count: 0,
        }
    }

    pub fn mask(&self) -> &Array2<u8> {
        &self.mask
    }

    pub fn layer_count(&self) -> usize {
        self.layer_count
    }

    pub fn excluded_pixels(&self) -> usize {
        self.mask.iter().filter(|&&v| v == 1).count()
    }
}

/// Outcome of combining a date's masks
#[derive(Debug, Clone)]
pub enum MaskDecision {
    /// The date contributes nothing downstream
    Skip { kind: MaskKind, fraction: f64 },
    Combined(ContaminationMask),
}

/// Builds one contamination mask per date and enforces the shadow skip rule
#[derive(Debug, Clone, Default)]
pub struct MaskCombiner {
    config: MaskCombinerConfig,
}

impl MaskCombiner {
    pub fn new(config: MaskCombinerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MaskCombinerConfig {
        &self.config
    }

    fn contaminated_code(&self, kind: MaskKind) -> f64 {
        match kind {
            MaskKind::Cloud => self.config.cloud_class_code,
            MaskKind::CloudShadow | MaskKind::TopoShadow => self.config.shadow_class_code,
        }
    }

    /// Binarise a raw mask product for its kind
    pub fn layer_from_raw<T: PixelType>(&self, kind: MaskKind, raw: &RasterGrid<T>) -> HunterResult<MaskLayer> {
        let code = self.contaminated_code(kind);
        let binary = raw.data().mapv(|v| match v.to_f64() {
            Some(value) if value == code => 1u8,
            _ => 0u8,
        });

        let total = binary.len();
        let contaminated = binary.iter().filter(|&&v| v == 1).count();
        let contaminated_fraction = if total == 0 { 0.0 } else { contaminated as f64 / total as f64 };

        Ok(MaskLayer {
            kind,
            grid: raw.with_data(binary, None)?,
            contaminated_fraction,
        })
    }

    /// Read and binarise a mask product from disk
    pub fn read_layer<P: AsRef<Path>>(&self, kind: MaskKind, path: P) -> HunterResult<MaskLayer> {
        let raw = RasterReader::read::<f64, _>(path.as_ref())?;
        let layer = self.layer_from_raw(kind, &raw)?;
        log::debug!(
            "{} mask {}: {:.1}% contaminated",
            kind,
            path.as_ref().display(),
            layer.contaminated_fraction * 100.0
        );
        Ok(layer)
    }

    /// First shadow layer over the skip fraction, if any
    pub fn skip_reason(&self, layers: &[MaskLayer]) -> Option<(MaskKind, f64)> {
        layers
            .iter()
            .filter(|layer| layer.kind.is_shadow())
            .find(|layer| layer.contaminated_fraction > self.config.shadow_skip_fraction)
            .map(|layer| (layer.kind, layer.contaminated_fraction))
    }

    /// Apply the skip rule, then OR every layer onto the water grid
    pub fn combine(&self, layers: &[MaskLayer], water: &GridSpec) -> HunterResult<MaskDecision> {
        if let Some((kind, fraction)) = self.skip_reason(layers) {
            return Ok(MaskDecision::Skip { kind, fraction });
        }

        let mut combined = ContaminationMask::empty(water.shape());
        for layer in layers {
            let resampled = reproject_nearest(&layer.grid, water, 0u8)?;
            Zip::from(&mut combined.mask)
                .and(&resampled)
                .for_each(|acc, &m| *acc |= m);
            combined.layer_count += 1;
        }

        Ok(MaskDecision::Combined(combined))
    }
}
