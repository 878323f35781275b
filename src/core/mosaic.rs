//! Spatial composite of per-tile occurrence surfaces for one date range

use crate::core::reproject::reproject_nearest;
use crate::io::raster::{RasterReader, RasterWriter};
use crate::types::{Crs, DateRange, GeoTransform, GridSpec, HunterError, HunterResult, RasterGrid};
use ndarray::{Array2, Zip};
use regex::Regex;
use std::path::{Path, PathBuf};

/// A per-tile surface and the file it came from
#[derive(Debug, Clone)]
pub struct MosaicInput {
    pub path: PathBuf,
    pub grid: RasterGrid<f32>,
}

/// Merges per-tile outputs into `{start}{end}_mosaic.tif`.
///
/// Overlapping pixels are resolved first-non-nodata-wins, with inputs
/// taken in file name order.
#[derive(Debug, Clone, Default)]
pub struct MosaicComposer {
    compression: Option<String>,
}

impl MosaicComposer {
    pub fn new(compression: Option<String>) -> Self {
        Self { compression }
    }

    /// Glob-style description of the inputs, used in messages
    pub fn input_pattern(range: &DateRange) -> String {
        format!("*{}_complete.tif", range.compact())
    }

    pub fn output_name(range: &DateRange) -> String {
        format!("{}_mosaic.tif", range.compact())
    }

    /// Per-tile outputs for `range` in `dir`, sidecars excluded, sorted by name
    pub fn find_inputs(dir: &Path, range: &DateRange) -> HunterResult<Vec<PathBuf>> {
        let pattern = Regex::new(&format!(r"^.*{}_complete\.tif$", regex::escape(&range.compact())))
            .map_err(|e| HunterError::Processing(format!("Invalid mosaic input pattern: {}", e)))?;

        let mut inputs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if pattern.is_match(name) && !name.contains("aux") {
                inputs.push(path);
            }
        }
        inputs.sort();
        Ok(inputs)
    }

    /// Union the inputs on one grid at the first input's resolution
    pub fn merge(inputs: &[MosaicInput]) -> HunterResult<RasterGrid<f32>> {
        let first = inputs
            .first()
            .ok_or_else(|| HunterError::InvalidInput("Nothing to merge".to_string()))?;

        let crs = Self::common_crs(inputs)?;

        for input in inputs {
            if !input.grid.transform().is_north_up() {
                return Err(HunterError::invalid_raster(
                    &input.path,
                    "mosaic inputs must have north-up transforms",
                ));
            }
        }

        let pixel_x = first.grid.transform().pixel_width;
        let pixel_y = -first.grid.transform().pixel_height;

        let bounds = inputs
            .iter()
            .map(|input| input.grid.spec().bounds())
            .reduce(|acc, b| acc.union(&b))
            .ok_or_else(|| HunterError::InvalidInput("Nothing to merge".to_string()))?;

        // Tolerate float noise in extents that are whole multiples of the pixel size
        let width = (((bounds.max_x - bounds.min_x) / pixel_x) - 1e-6).ceil().max(1.0) as usize;
        let height = (((bounds.max_y - bounds.min_y) / pixel_y) - 1e-6).ceil().max(1.0) as usize;

        let target = GridSpec {
            transform: GeoTransform::north_up(bounds.min_x, bounds.max_y, pixel_x, pixel_y),
            crs,
            width,
            height,
        };
        let nodata = first.grid.nodata().unwrap_or(0.0) as f32;

        log::info!(
            "Merging {} rasters onto a {}x{} grid",
            inputs.len(),
            target.width,
            target.height
        );

        let mut merged = Array2::from_elem(target.shape(), nodata);
        let mut filled = Array2::from_elem(target.shape(), false);

        for input in inputs {
            let resampled = reproject_nearest(&input.grid, &target, f32::NAN)?;
            Zip::from(&mut merged)
                .and(&mut filled)
                .and(&resampled)
                .for_each(|out, done, &value| {
                    if !*done && !input.grid.is_nodata(value) {
                        *out = value;
                        *done = true;
                    }
                });
        }

        RasterGrid::new(merged, target.transform, target.crs, Some(nodata as f64))
    }

    /// All inputs must share one CRS; rasters without a CRS adopt it
    fn common_crs(inputs: &[MosaicInput]) -> HunterResult<Crs> {
        let mut common: Option<&Crs> = None;
        for input in inputs {
            let crs = input.grid.crs();
            if crs.is_unknown() {
                log::warn!("{} has no CRS, assuming it matches the other inputs", input.path.display());
                continue;
            }
            match common {
                None => common = Some(crs),
                Some(expected) if !expected.is_equivalent(crs) => {
                    return Err(HunterError::CrsMismatch {
                        expected: expected.to_string(),
                        found: crs.to_string(),
                        path: input.path.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(common.cloned().unwrap_or_default())
    }

    /// Mosaic every per-tile output for `range` in `dir`.
    ///
    /// Returns `Ok(None)` when no input qualifies; nothing is written then.
    pub fn compose(&self, dir: &Path, range: &DateRange) -> HunterResult<Option<PathBuf>> {
        let paths = Self::find_inputs(dir, range)?;
        if paths.is_empty() {
            let reason = HunterError::NoMosaicInputs {
                pattern: Self::input_pattern(range),
            };
            log::warn!("{} in {}, no mosaic written", reason, dir.display());
            return Ok(None);
        }

        let inputs = paths
            .into_iter()
            .map(|path| {
                let grid = RasterReader::read::<f32, _>(&path)?;
                Ok(MosaicInput { path, grid })
            })
            .collect::<HunterResult<Vec<_>>>()?;

        let mosaic = Self::merge(&inputs)?;
        let output = dir.join(Self::output_name(range));
        RasterWriter::write(&output, &mosaic, self.compression.as_deref())?;

        log::info!("Wrote mosaic of {} tiles to {}", inputs.len(), output.display());
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn input(name: &str, data: Array2<f32>, x: f64, y: f64, crs: Crs) -> MosaicInput {
        MosaicInput {
            path: PathBuf::from(name),
            grid: RasterGrid::new(data, GeoTransform::north_up(x, y, 10.0, 10.0), crs, Some(0.0)).unwrap(),
        }
    }

    #[test]
    fn test_disjoint_tiles_union_footprint() {
        let west = input("a", array![[0.5, 0.25], [1.0, 0.0]], 0.0, 20.0, Crs::from_epsg(32755));
        let east = input("b", array![[0.75], [0.5]], 30.0, 20.0, Crs::from_epsg(32755));

        let mosaic = MosaicComposer::merge(&[west, east]).unwrap();
        assert_eq!(mosaic.shape(), (2, 4));
        assert_eq!(
            *mosaic.data(),
            array![[0.5, 0.25, 0.0, 0.75], [1.0, 0.0, 0.0, 0.5]]
        );
        assert_eq!(mosaic.nodata(), Some(0.0));
    }

    #[test]
    fn test_overlap_first_non_nodata_wins() {
        let a = input("a", array![[0.0, 0.5]], 0.0, 10.0, Crs::from_epsg(32755));
        let b = input("b", array![[0.9, 0.9]], 0.0, 10.0, Crs::from_epsg(32755));

        let mosaic = MosaicComposer::merge(&[a, b]).unwrap();
        assert_eq!(*mosaic.data(), array![[0.9, 0.5]]);
    }

    #[test]
    fn test_crs_mismatch_is_rejected() {
        let a = input("a", array![[1.0]], 0.0, 10.0, Crs::from_epsg(32755));
        let b = input("b", array![[1.0]], 10.0, 10.0, Crs::from_epsg(32756));

        let err = MosaicComposer::merge(&[a, b]).unwrap_err();
        assert!(matches!(err, HunterError::CrsMismatch { .. }));
    }

    #[test]
    fn test_names_follow_date_range() {
        let range = DateRange::parse("20230101", "20231231").unwrap();
        assert_eq!(MosaicComposer::output_name(&range), "2023010120231231_mosaic.tif");
        assert_eq!(MosaicComposer::input_pattern(&range), "*2023010120231231_complete.tif");
    }
}
