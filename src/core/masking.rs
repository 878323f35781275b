use crate::core::classify::WaterClassifier;
use crate::core::mask_combiner::{ContaminationMask, MaskCombiner, MaskDecision, MaskLayer};
use crate::io::manifest::{SceneFiles, SceneManifest};
use crate::io::raster::{RasterReader, RasterWriter};
use crate::types::{HunterError, HunterResult, MaskKind, RasterGrid, SceneDate};
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do with a date that has a water raster but no quality masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskCoverage {
    /// Process it with an empty contamination mask
    KeepUnmasked,
    /// Leave it out, like a date without a water raster
    RequireMask,
}

impl Default for MaskCoverage {
    fn default() -> Self {
        MaskCoverage::KeepUnmasked
    }
}

/// Result of masking one date
#[derive(Debug, Clone)]
pub enum DateOutcome {
    Masked { date: SceneDate, path: PathBuf, excluded_pixels: usize },
    Skipped { date: SceneDate, kind: MaskKind, fraction: f64 },
    Unmatched { date: SceneDate, reason: String },
    Invalid { date: SceneDate, error: String },
}

impl DateOutcome {
    pub fn date(&self) -> SceneDate {
        match self {
            DateOutcome::Masked { date, .. }
            | DateOutcome::Skipped { date, .. }
            | DateOutcome::Unmatched { date, .. }
            | DateOutcome::Invalid { date, .. } => *date,
        }
    }
}

/// In-memory result of masking one date
#[derive(Debug, Clone)]
pub enum SceneMasking {
    Masked { grid: RasterGrid<f32>, excluded_pixels: usize },
    /// Skipped or unmatched; the date contributes nothing
    Dropped(DateOutcome),
}

/// Per-date outcomes for one tile, in date order
#[derive(Debug, Clone, Default)]
pub struct MaskingReport {
    pub outcomes: Vec<DateOutcome>,
}

impl MaskingReport {
    /// Written masked rasters, earliest date first
    pub fn masked_paths(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                DateOutcome::Masked { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, DateOutcome::Skipped { .. })).count()
    }

    pub fn count_invalid(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, DateOutcome::Invalid { .. })).count()
    }

    pub fn count_unmatched(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, DateOutcome::Unmatched { .. })).count()
    }
}

/// Classifies, masks and writes every usable date of a tile
#[derive(Debug, Clone)]
pub struct MaskingStage {
    classifier: WaterClassifier,
    combiner: MaskCombiner,
    coverage: MaskCoverage,
    default_nodata: f32,
    compression: Option<String>,
}

impl MaskingStage {
    pub fn new(
        classifier: WaterClassifier,
        combiner: MaskCombiner,
        coverage: MaskCoverage,
        default_nodata: f32,
        compression: Option<String>,
    ) -> Self {
        Self {
            classifier,
            combiner,
            coverage,
            default_nodata,
            compression,
        }
    }

    /// Replace contaminated pixels with the water raster's nodata
    pub fn apply_mask(
        water: &RasterGrid<f32>,
        mask: &ContaminationMask,
        default_nodata: f32,
    ) -> HunterResult<RasterGrid<f32>> {
        if water.shape() != mask.mask().dim() {
            return Err(HunterError::Processing(format!(
                "Contamination mask {:?} does not match water grid {:?}",
                mask.mask().dim(),
                water.shape()
            )));
        }

        let fill = water.nodata().map(|v| v as f32).unwrap_or(default_nodata);
        let mut masked = water.data().clone();
        Zip::from(&mut masked).and(mask.mask()).for_each(|value, &m| {
            if m == 1 {
                *value = fill;
            }
        });

        water.with_data(masked, Some(fill as f64))
    }

    /// Mask one date in memory
    pub fn mask_scene(&self, date: SceneDate, files: &SceneFiles) -> HunterResult<SceneMasking> {
        let water_path = match &files.water {
            Some(path) => path,
            None => {
                return Ok(SceneMasking::Dropped(DateOutcome::Unmatched {
                    date,
                    reason: "no water classification raster".to_string(),
                }))
            }
        };

        if files.masks.is_empty() && self.coverage == MaskCoverage::RequireMask {
            return Ok(SceneMasking::Dropped(DateOutcome::Unmatched {
                date,
                reason: "no quality masks".to_string(),
            }));
        }

        let layers = files
            .masks
            .iter()
            .map(|(kind, path)| self.combiner.read_layer(*kind, path))
            .collect::<HunterResult<Vec<MaskLayer>>>()?;

        // Georeferencing is enough to decide; water pixels are only read for kept dates
        let water_spec = RasterReader::read_spec(water_path)?;
        let mask = match self.combiner.combine(&layers, &water_spec)? {
            MaskDecision::Skip { kind, fraction } => {
                return Ok(SceneMasking::Dropped(DateOutcome::Skipped { date, kind, fraction }))
            }
            MaskDecision::Combined(mask) => mask,
        };

        let water = self.classifier.classify_file(water_path)?;
        Ok(SceneMasking::Masked {
            grid: Self::apply_mask(&water, &mask, self.default_nodata)?,
            excluded_pixels: mask.excluded_pixels(),
        })
    }

    /// Mask one date and write `masked_{date}.tif` into `output_dir`
    pub fn process_date(&self, date: SceneDate, files: &SceneFiles, output_dir: &Path) -> DateOutcome {
        let (masked, excluded_pixels) = match self.mask_scene(date, files) {
            Ok(SceneMasking::Masked { grid, excluded_pixels }) => (grid, excluded_pixels),
            Ok(SceneMasking::Dropped(outcome)) => return outcome,
            Err(e) => {
                return DateOutcome::Invalid {
                    date,
                    error: e.to_string(),
                }
            }
        };

        let path = output_dir.join(masked_file_name(date));
        match RasterWriter::write(&path, &masked, self.compression.as_deref()) {
            Ok(()) => DateOutcome::Masked {
                date,
                path,
                excluded_pixels,
            },
            Err(e) => DateOutcome::Invalid {
                date,
                error: format!("cannot write {}: {}", path.display(), e),
            },
        }
    }

    /// Mask every date of a tile. Each date depends only on its own inputs,
    /// so the order of processing does not affect the written rasters.
    pub fn run(&self, manifest: &SceneManifest, output_dir: &Path) -> MaskingReport {
        log::info!("Masking {} dates for tile {}", manifest.len(), manifest.tile());

        let scenes: Vec<(SceneDate, &SceneFiles)> = manifest.iter().map(|(d, f)| (*d, f)).collect();

        #[cfg(feature = "parallel")]
        let outcomes: Vec<DateOutcome> = {
            use rayon::prelude::*;
            scenes
                .par_iter()
                .map(|(date, files)| self.process_date(*date, files, output_dir))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<DateOutcome> = scenes
            .iter()
            .map(|(date, files)| self.process_date(*date, files, output_dir))
            .collect();

        for outcome in &outcomes {
            match outcome {
                DateOutcome::Masked { date, excluded_pixels, .. } => {
                    log::debug!("{} {}: masked, {} pixels excluded", manifest.tile(), date, excluded_pixels)
                }
                DateOutcome::Skipped { date, kind, fraction } => log::warn!(
                    "{} {}: skipped, {} mask covers {:.1}% of the scene",
                    manifest.tile(),
                    date,
                    kind,
                    fraction * 100.0
                ),
                DateOutcome::Unmatched { date, reason } => {
                    log::warn!("{} {}: not processed, {}", manifest.tile(), date, reason)
                }
                DateOutcome::Invalid { date, error } => {
                    log::error!("{} {}: excluded, {}", manifest.tile(), date, error)
                }
            }
        }

        MaskingReport { outcomes }
    }
}

pub fn masked_file_name(date: SceneDate) -> String {
    format!("masked_{}.tif", date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};
    use ndarray::array;

    fn water(nodata: Option<f64>) -> RasterGrid<f32> {
        RasterGrid::new(
            array![[0.0, 1.0], [1.0, 1.0]],
            GeoTransform::north_up(0.0, 20.0, 10.0, 10.0),
            Crs::from_epsg(32755),
            nodata,
        )
        .unwrap()
    }

    #[test]
    fn test_masked_pixels_take_source_nodata() {
        let combiner = MaskCombiner::default();
        let cloud_raw = water(None).with_data(array![[0u8, 1], [0, 0]], None).unwrap();
        let layer = combiner.layer_from_raw(MaskKind::Cloud, &cloud_raw).unwrap();
        let mask = match combiner.combine(&[layer], &water(None).spec()).unwrap() {
            MaskDecision::Combined(mask) => mask,
            MaskDecision::Skip { .. } => panic!("unexpected skip"),
        };

        let masked = MaskingStage::apply_mask(&water(Some(255.0)), &mask, 0.0).unwrap();
        assert_eq!(*masked.data(), array![[0.0, 255.0], [1.0, 1.0]]);
        assert_eq!(masked.nodata(), Some(255.0));

        let defaulted = MaskingStage::apply_mask(&water(None), &mask, 0.0).unwrap();
        assert_eq!(*defaulted.data(), array![[0.0, 0.0], [1.0, 1.0]]);
        assert_eq!(defaulted.nodata(), Some(0.0));
    }

    #[test]
    fn test_empty_mask_keeps_classification() {
        let mask = ContaminationMask::empty((2, 2));
        let masked = MaskingStage::apply_mask(&water(None), &mask, 0.0).unwrap();
        assert_eq!(masked.data(), water(None).data());
    }

    #[test]
    fn test_mask_shape_must_match() {
        let mask = ContaminationMask::empty((3, 3));
        assert!(MaskingStage::apply_mask(&water(None), &mask, 0.0).is_err());
    }

    #[test]
    fn test_date_without_water_is_unmatched() {
        let stage = MaskingStage::new(
            WaterClassifier::default(),
            MaskCombiner::default(),
            MaskCoverage::KeepUnmasked,
            0.0,
            None,
        );
        let date = SceneDate::parse("20230101").unwrap();
        let files = SceneFiles {
            water: None,
            masks: vec![(MaskKind::Cloud, PathBuf::from("cloud.img"))],
        };

        let outcome = stage.process_date(date, &files, Path::new("."));
        assert!(matches!(outcome, DateOutcome::Unmatched { .. }));
    }

    #[test]
    fn test_require_mask_policy_drops_unmasked_date() {
        let stage = MaskingStage::new(
            WaterClassifier::default(),
            MaskCombiner::default(),
            MaskCoverage::RequireMask,
            0.0,
            None,
        );
        let date = SceneDate::parse("20230101").unwrap();
        let files = SceneFiles {
            water: Some(PathBuf::from("water.img")),
            masks: Vec::new(),
        };

        let outcome = stage.process_date(date, &files, Path::new("."));
        assert!(matches!(outcome, DateOutcome::Unmatched { .. }));
    }

    fn write_u8(dir: &Path, name: &str, data: ndarray::Array2<u8>) -> PathBuf {
        let grid = RasterGrid::new(
            data,
            GeoTransform::north_up(500000.0, 7000000.0, 10.0, 10.0),
            Crs::from_epsg(32755),
            None,
        )
        .unwrap();
        let path = dir.join(name);
        RasterWriter::write(&path, &grid, None).unwrap();
        path
    }

    #[test]
    fn test_shadow_share_decides_between_skip_and_mask() {
        let dir = tempfile::tempdir().unwrap();
        let stage = MaskingStage::new(
            WaterClassifier::default(),
            MaskCombiner::default(),
            MaskCoverage::KeepUnmasked,
            0.0,
            None,
        );
        let date = SceneDate::parse("20230101").unwrap();
        let water = write_u8(dir.path(), "water.tif", array![[2, 2, 0, 0], [2, 0, 0, 2]]);
        let heavy = write_u8(dir.path(), "heavy.tif", array![[2, 2, 2, 0], [2, 2, 0, 0]]);
        let light = write_u8(dir.path(), "light.tif", array![[2, 0, 0, 0], [0, 0, 0, 2]]);

        let skipped = SceneFiles {
            water: Some(water.clone()),
            masks: vec![(MaskKind::CloudShadow, heavy)],
        };
        match stage.mask_scene(date, &skipped).unwrap() {
            SceneMasking::Dropped(DateOutcome::Skipped { kind, fraction, .. }) => {
                assert_eq!(kind, MaskKind::CloudShadow);
                assert_eq!(fraction, 0.625);
            }
            other => panic!("expected a skipped date, got {:?}", other),
        }

        let kept = SceneFiles {
            water: Some(water),
            masks: vec![(MaskKind::TopoShadow, light)],
        };
        match stage.mask_scene(date, &kept).unwrap() {
            SceneMasking::Masked { grid, excluded_pixels } => {
                assert_eq!(excluded_pixels, 2);
                assert_eq!(*grid.data(), array![[0.0, 1.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]]);
            }
            other => panic!("expected a masked date, got {:?}", other),
        }
    }
}
