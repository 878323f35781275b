//! Per-tile workflow: inventory, retrieval, masking, aggregation, output

use crate::core::classify::{WaterClassifier, DEFAULT_WATER_CLASS};
use crate::core::mask_combiner::{MaskCombiner, MaskCombinerConfig};
use crate::core::masking::{MaskCoverage, MaskingReport, MaskingStage};
use crate::core::mosaic::MosaicComposer;
use crate::core::occurrence::{OccurrenceAggregator, DEFAULT_MIN_FREQUENCY};
use crate::io::inventory::SceneInventory;
use crate::io::manifest::{recall_list, SceneManifest};
use crate::io::raster::RasterWriter;
use crate::io::retrieval::Retriever;
use crate::types::{DateRange, HunterError, HunterResult, TileCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Processing parameters for every tile of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub water_class_code: f64,
    pub cloud_class_code: f64,
    pub shadow_class_code: f64,
    pub shadow_skip_fraction: f64,
    pub min_frequency: f64,
    pub output_nodata: f32,
    /// Fill for masked pixels when the water raster has no nodata of its own
    pub default_source_nodata: f32,
    pub mask_coverage: MaskCoverage,
    /// Copy masked rasters to `{work_dir}/{tile}_intermediates/` before cleanup
    pub keep_intermediates: bool,
    /// GeoTIFF COMPRESS creation option for written rasters
    pub compression: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            water_class_code: DEFAULT_WATER_CLASS,
            cloud_class_code: 1.0,
            shadow_class_code: 2.0,
            shadow_skip_fraction: 0.5,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            output_nodata: 0.0,
            default_source_nodata: 0.0,
            mask_coverage: MaskCoverage::KeepUnmasked,
            keep_intermediates: false,
            compression: Some("DEFLATE".to_string()),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> HunterResult<()> {
        if !(0.0..=1.0).contains(&self.shadow_skip_fraction) {
            return Err(HunterError::Config(format!(
                "shadow_skip_fraction must be within [0, 1], got {}",
                self.shadow_skip_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.min_frequency) {
            return Err(HunterError::Config(format!(
                "min_frequency must be within [0, 1], got {}",
                self.min_frequency
            )));
        }
        Ok(())
    }

    pub fn masking_stage(&self) -> MaskingStage {
        MaskingStage::new(
            WaterClassifier::new(self.water_class_code),
            MaskCombiner::new(MaskCombinerConfig {
                cloud_class_code: self.cloud_class_code,
                shadow_class_code: self.shadow_class_code,
                shadow_skip_fraction: self.shadow_skip_fraction,
            }),
            self.mask_coverage,
            self.default_source_nodata,
            self.compression.clone(),
        )
    }

    pub fn aggregator(&self) -> OccurrenceAggregator {
        OccurrenceAggregator::new(self.min_frequency, self.output_nodata)
    }
}

/// Scratch space for one tile, deleted when dropped
pub struct TileWorkspace {
    dir: TempDir,
    recall: PathBuf,
    temp: PathBuf,
}

impl TileWorkspace {
    pub fn create(work_dir: &Path, tile: &TileCode) -> HunterResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}_", tile))
            .tempdir_in(work_dir)?;
        let recall = dir.path().join("recall");
        let temp = recall.join("temp");
        std::fs::create_dir_all(&temp)?;
        log::debug!("Workspace for tile {}: {}", tile, dir.path().display());
        Ok(Self { dir, recall, temp })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Retrieved raw rasters
    pub fn recall_dir(&self) -> &Path {
        &self.recall
    }

    /// Masked per-date rasters
    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    pub fn close(self) -> HunterResult<()> {
        Ok(self.dir.close()?)
    }
}

/// Summary of one completed tile
#[derive(Debug, Clone)]
pub struct TileReport {
    pub tile: TileCode,
    pub range: DateRange,
    pub dates_found: usize,
    pub files_missing: usize,
    pub masking: MaskingReport,
    pub observations: u32,
    pub output: PathBuf,
    pub intermediates: Option<PathBuf>,
}

/// Outcome of a multi-tile run
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<TileReport>,
    pub failed: Vec<(TileCode, HunterError)>,
}

impl BatchReport {
    pub fn outputs(&self) -> Vec<&Path> {
        self.completed.iter().map(|r| r.output.as_path()).collect()
    }
}

/// Runs the full per-tile workflow against a catalog and an archive
pub struct TileProcessor {
    config: PipelineConfig,
    inventory: Box<dyn SceneInventory>,
    retriever: Box<dyn Retriever>,
    work_dir: PathBuf,
}

impl TileProcessor {
    pub fn new(
        config: PipelineConfig,
        inventory: Box<dyn SceneInventory>,
        retriever: Box<dyn Retriever>,
        work_dir: impl Into<PathBuf>,
    ) -> HunterResult<Self> {
        config.validate()?;
        let work_dir = work_dir.into();
        std::fs::create_dir_all(&work_dir)?;
        Ok(Self {
            config,
            inventory,
            retriever,
            work_dir,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// `{tile}_{start}{end}_complete.tif`
    pub fn output_name(tile: &TileCode, range: &DateRange) -> String {
        format!("{}_{}_complete.tif", tile, range.compact())
    }

    /// Produce the occurrence surface for one tile.
    ///
    /// The tile workspace is removed on every exit path.
    pub fn process_tile(&self, tile: &TileCode, range: &DateRange) -> HunterResult<TileReport> {
        log::info!("Processing tile {} for {}", tile, range);

        let records = self.inventory.query(tile, range)?;
        log::info!("Tile {}: {} scenes in catalog", tile, records.len());

        let workspace = TileWorkspace::create(&self.work_dir, tile)?;
        let entries = recall_list(&records, tile);
        let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();

        let retrieval = self.retriever.retrieve(&names, workspace.recall_dir())?;
        if retrieval.is_empty() {
            return Err(HunterError::Retrieval {
                tile: tile.to_string(),
                message: format!("none of the {} requested files could be retrieved", names.len()),
            });
        }
        if !retrieval.missing.is_empty() {
            log::warn!(
                "Tile {}: {} of {} files missing from the archive",
                tile,
                retrieval.missing.len(),
                names.len()
            );
        }

        let manifest = SceneManifest::from_recall(
            tile.clone(),
            &entries,
            workspace.recall_dir(),
            &retrieval.retrieved_set(),
        );

        let masking = self.config.masking_stage().run(&manifest, workspace.temp_dir());
        let masked = OccurrenceAggregator::find_masked_rasters(workspace.temp_dir())?;
        let reported = masking.masked_paths().len();
        if masked.len() != reported {
            log::warn!(
                "Tile {}: {} masked rasters on disk, {} reported by masking",
                tile,
                masked.len(),
                reported
            );
        }
        log::info!(
            "Tile {}: {} dates masked, {} skipped, {} unmatched, {} invalid",
            tile,
            masked.len(),
            masking.count_skipped(),
            masking.count_unmatched(),
            masking.count_invalid()
        );

        let aggregation = self.config.aggregator().aggregate_files(tile.as_str(), &masked)?;

        let output = self.work_dir.join(Self::output_name(tile, range));
        RasterWriter::write(&output, &aggregation.surface, self.config.compression.as_deref())?;
        log::info!("Tile {}: wrote {}", tile, output.display());

        // The output is committed; housekeeping failures no longer fail the tile
        let intermediates = if self.config.keep_intermediates {
            match self.keep_intermediates(tile, &masked) {
                Ok(dir) => Some(dir),
                Err(e) => {
                    log::warn!("Tile {}: masked rasters not kept: {}", tile, e);
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = workspace.close() {
            log::warn!("Tile {}: cannot remove workspace: {}", tile, e);
        }

        Ok(TileReport {
            tile: tile.clone(),
            range: *range,
            dates_found: manifest.len(),
            files_missing: retrieval.missing.len(),
            masking,
            observations: aggregation.observations,
            output,
            intermediates,
        })
    }

    fn keep_intermediates(&self, tile: &TileCode, masked: &[PathBuf]) -> HunterResult<PathBuf> {
        let dir = self.work_dir.join(format!("{}_intermediates", tile));
        std::fs::create_dir_all(&dir)?;
        for path in masked {
            if let Some(name) = path.file_name() {
                std::fs::copy(path, dir.join(name))?;
            }
        }
        log::info!("Tile {}: kept {} masked rasters in {}", tile, masked.len(), dir.display());
        Ok(dir)
    }

    /// Process tiles one after another; a failing tile does not stop the batch
    pub fn process_batch(&self, tiles: &[TileCode], range: &DateRange) -> BatchReport {
        let mut report = BatchReport::default();

        for tile in tiles {
            match self.process_tile(tile, range) {
                Ok(tile_report) => report.completed.push(tile_report),
                Err(e) => {
                    if e.is_tile_fatal() {
                        log::error!("Tile {} ({}) failed: {}", tile, range, e);
                    } else {
                        log::warn!("Tile {} ({}) has no usable reference raster: {}", tile, range, e);
                    }
                    report.failed.push((tile.clone(), e));
                }
            }
        }

        log::info!(
            "Batch finished: {} tiles completed, {} failed",
            report.completed.len(),
            report.failed.len()
        );
        report
    }

    /// Mosaic the per-tile outputs for `range` sitting in the working directory
    pub fn compose_mosaic(&self, range: &DateRange) -> HunterResult<Option<PathBuf>> {
        MosaicComposer::new(self.config.compression.clone()).compose(&self.work_dir, range)
    }
}
