use crate::core::reproject::reproject_nearest;
use crate::io::raster::RasterReader;
use crate::types::{GridSpec, HunterError, HunterResult, RasterGrid};
use ndarray::{Array2, Zip};
use std::path::{Path, PathBuf};

/// Proportions strictly below this are treated as spurious detections
pub const DEFAULT_MIN_FREQUENCY: f64 = 0.08;

/// Binary presence: 1 where the masked value is >= 1 and not nodata
pub fn presence_layer(masked: &RasterGrid<f32>) -> HunterResult<RasterGrid<u32>> {
    let presence = masked
        .data()
        .mapv(|v| if v >= 1.0 && !masked.is_nodata(v) { 1u32 } else { 0u32 });
    masked.with_data(presence, None)
}

/// Count / observations, with proportions below `min_frequency` set to `nodata`
pub fn occurrence_proportion(counts: &Array2<u32>, observations: u32, min_frequency: f64, nodata: f32) -> Array2<f32> {
    let n = observations.max(1) as f64;
    counts.mapv(|count| {
        let proportion = count as f64 / n;
        if proportion < min_frequency {
            nodata
        } else {
            proportion as f32
        }
    })
}

/// Running sum of per-date presence on a fixed reference grid
#[derive(Debug, Clone, Default)]
pub struct OccurrenceAccumulator {
    reference: Option<GridSpec>,
    counts: Option<Array2<u32>>,
    observations: u32,
}

impl OccurrenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one date. The first contribution fixes the reference grid;
    /// later ones are resampled onto it when they are not aligned.
    pub fn add(&mut self, presence: &RasterGrid<u32>) -> HunterResult<()> {
        match (&self.reference, &mut self.counts) {
            (Some(reference), Some(counts)) => {
                let spec = presence.spec();
                if spec.is_aligned_with(reference) {
                    *counts += presence.data();
                } else {
                    log::info!(
                        "Resampling presence layer from {:?} to reference {:?}",
                        spec.shape(),
                        reference.shape()
                    );
                    let aligned = reproject_nearest(presence, reference, 0u32)?;
                    Zip::from(counts).and(&aligned).for_each(|c, &p| *c += p);
                }
            }
            _ => {
                self.reference = Some(presence.spec());
                self.counts = Some(presence.data().clone());
            }
        }
        self.observations += 1;
        Ok(())
    }

    pub fn observations(&self) -> u32 {
        self.observations
    }

    pub fn reference(&self) -> Option<&GridSpec> {
        self.reference.as_ref()
    }

    pub fn counts(&self) -> Option<&Array2<u32>> {
        self.counts.as_ref()
    }

    /// Convert the counts into the thresholded proportion surface
    pub fn finalize(self, min_frequency: f64, nodata: f32) -> HunterResult<RasterGrid<f32>> {
        let (reference, counts) = match (self.reference, self.counts) {
            (Some(reference), Some(counts)) => (reference, counts),
            _ => return Err(HunterError::Processing("Occurrence accumulator is empty".to_string())),
        };

        let proportion = occurrence_proportion(&counts, self.observations, min_frequency, nodata);
        RasterGrid::new(proportion, reference.transform, reference.crs, Some(nodata as f64))
    }
}

/// Occurrence surface plus what went into it
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub surface: RasterGrid<f32>,
    pub observations: u32,
    pub rejected: Vec<(PathBuf, String)>,
}

/// Turns a tile's masked rasters into one occurrence-proportion surface
#[derive(Debug, Clone, Copy)]
pub struct OccurrenceAggregator {
    min_frequency: f64,
    output_nodata: f32,
}

impl Default for OccurrenceAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FREQUENCY, 0.0)
    }
}

impl OccurrenceAggregator {
    pub fn new(min_frequency: f64, output_nodata: f32) -> Self {
        Self {
            min_frequency,
            output_nodata,
        }
    }

    /// Aggregate in-memory masked rasters; the first one is the reference grid
    pub fn aggregate_grids(&self, tile: &str, masked: &[RasterGrid<f32>]) -> HunterResult<RasterGrid<f32>> {
        if masked.is_empty() {
            return Err(HunterError::NoInputRasters { tile: tile.to_string() });
        }

        let mut accumulator = OccurrenceAccumulator::new();
        for grid in masked {
            accumulator.add(&presence_layer(grid)?)?;
        }
        accumulator.finalize(self.min_frequency, self.output_nodata)
    }

    /// Aggregate masked rasters on disk, earliest file name first.
    ///
    /// An unreadable first raster is fatal because it would define the
    /// reference grid; later unreadable rasters are left out of the count.
    pub fn aggregate_files(&self, tile: &str, paths: &[PathBuf]) -> HunterResult<Aggregation> {
        if paths.is_empty() {
            return Err(HunterError::NoInputRasters { tile: tile.to_string() });
        }

        let mut ordered = paths.to_vec();
        ordered.sort();

        let mut accumulator = OccurrenceAccumulator::new();
        let mut rejected = Vec::new();

        for path in &ordered {
            let contribution = RasterReader::read::<f32, _>(path).and_then(|grid| presence_layer(&grid));
            match contribution {
                Ok(presence) => accumulator.add(&presence)?,
                Err(e) if accumulator.observations() == 0 || e.is_tile_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("Tile {}: leaving {} out of the occurrence count: {}", tile, path.display(), e);
                    rejected.push((path.clone(), e.to_string()));
                }
            }
        }

        let observations = accumulator.observations();
        log::info!("Tile {}: {} observations accumulated", tile, observations);

        Ok(Aggregation {
            surface: accumulator.finalize(self.min_frequency, self.output_nodata)?,
            observations,
            rejected,
        })
    }

    /// Masked rasters in a directory, skipping auxiliary sidecars
    pub fn find_masked_rasters(dir: &Path) -> HunterResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if name.starts_with("masked_") && !name.contains("aux") {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}
