use ndarray::{array, Array2};
use puddle_hunter::core::occurrence::OccurrenceAggregator;
use puddle_hunter::io::raster::{RasterReader, RasterWriter};
use puddle_hunter::types::{Crs, GeoTransform, HunterError, RasterGrid};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_masked(dir: &Path, date: &str, data: Array2<f32>, pixel: f64) -> PathBuf {
    let grid = RasterGrid::new(
        data,
        GeoTransform::north_up(300000.0, 6000020.0, pixel, pixel),
        Crs::from_epsg(32755),
        Some(0.0),
    )
    .unwrap();
    let path = dir.join(format!("masked_{}.tif", date));
    RasterWriter::write(&path, &grid, None).expect("Failed to write masked raster");
    path
}

#[test]
fn test_earliest_date_defines_the_reference_grid() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();

    // Later date at half the resolution, same footprint
    let coarse = write_masked(dir.path(), "20230111", array![[1.0]], 20.0);
    let fine = write_masked(dir.path(), "20230101", array![[1.0, 0.0], [0.0, 0.0]], 10.0);

    let aggregation = OccurrenceAggregator::default()
        .aggregate_files("55kcb", &[coarse, fine])
        .expect("Aggregation failed");

    assert_eq!(aggregation.observations, 2);
    assert_eq!(aggregation.surface.shape(), (2, 2));
    assert_eq!(aggregation.surface.transform().pixel_width, 10.0);
    assert_eq!(*aggregation.surface.data(), array![[1.0, 0.5], [0.5, 0.5]]);
}

#[test]
fn test_unreadable_later_raster_is_left_out() {
    let dir = TempDir::new().unwrap();

    let good = write_masked(dir.path(), "20230101", array![[1.0, 0.0]], 10.0);
    let broken = dir.path().join("masked_20230111.tif");
    std::fs::write(&broken, b"this is not a GeoTIFF").unwrap();

    let aggregation = OccurrenceAggregator::default()
        .aggregate_files("55kcb", &[good, broken.clone()])
        .unwrap();

    assert_eq!(aggregation.observations, 1);
    assert_eq!(aggregation.rejected.len(), 1);
    assert_eq!(aggregation.rejected[0].0, broken);
    assert_eq!(*aggregation.surface.data(), array![[1.0, 0.0]]);
}

#[test]
fn test_unreadable_reference_raster_fails_the_tile() {
    let dir = TempDir::new().unwrap();

    let broken = dir.path().join("masked_20230101.tif");
    std::fs::write(&broken, b"garbage").unwrap();
    let good = write_masked(dir.path(), "20230111", array![[1.0]], 10.0);

    let err = OccurrenceAggregator::default()
        .aggregate_files("55kcb", &[broken, good])
        .unwrap_err();
    assert!(matches!(err, HunterError::InvalidRaster { .. }));
}

fn write_geographic(dir: &Path, date: &str, data: Array2<f32>, west: f64, north: f64, degrees: f64) -> PathBuf {
    let grid = RasterGrid::new(
        data,
        GeoTransform::north_up(west, north, degrees, degrees),
        Crs::from_epsg(4326),
        Some(0.0),
    )
    .unwrap();
    let path = dir.join(format!("masked_{}.tif", date));
    RasterWriter::write(&path, &grid, None).expect("Failed to write geographic raster");
    path
}

#[test]
fn test_later_dates_in_another_crs_are_reprojected_onto_reference() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();

    // Reference sits near 144.8E 36.1S in UTM zone 55S
    let reference = write_masked(dir.path(), "20230101", array![[1.0, 0.0], [0.0, 0.0]], 10.0);
    // One geographic cell covering the whole reference footprint, all water
    let covering = write_geographic(dir.path(), "20230111", array![[1.0]], 143.0, -34.0, 4.0);
    // Water on the other side of the world contributes an observation but no presence
    let elsewhere = write_geographic(dir.path(), "20230121", array![[1.0]], 10.0, 44.0, 4.0);

    let aggregation = OccurrenceAggregator::default()
        .aggregate_files("55kcb", &[reference, covering, elsewhere])
        .expect("Aggregation failed");

    assert_eq!(aggregation.observations, 3);
    assert!(aggregation.rejected.is_empty());
    assert_eq!(aggregation.surface.shape(), (2, 2));
    assert!(aggregation.surface.crs().is_equivalent(&Crs::from_epsg(32755)));

    let expected = array![[2.0 / 3.0, 1.0 / 3.0], [1.0 / 3.0, 1.0 / 3.0]];
    for (value, want) in aggregation.surface.data().iter().zip(expected.iter()) {
        approx::assert_abs_diff_eq!(*value, *want as f32, epsilon = 1e-6);
    }
}

#[test]
fn test_raster_with_unreadable_band_is_left_out() {
    let dir = TempDir::new().unwrap();

    let good = write_masked(dir.path(), "20230101", array![[1.0, 1.0]], 10.0);
    // Valid container whose only band points at a file that does not exist
    let dangling = dir.path().join("masked_20230111.vrt");
    std::fs::write(
        &dangling,
        r#"<VRTDataset rasterXSize="2" rasterYSize="1">
  <VRTRasterBand dataType="Float32" band="1">
    <SimpleSource>
      <SourceFilename relativeToVRT="1">missing_source.tif</SourceFilename>
      <SourceBand>1</SourceBand>
    </SimpleSource>
  </VRTRasterBand>
</VRTDataset>
"#,
    )
    .unwrap();

    let err = RasterReader::read::<f32, _>(&dangling).unwrap_err();
    assert!(matches!(err, HunterError::InvalidRaster { .. }));
    assert!(!err.is_tile_fatal());

    let aggregation = OccurrenceAggregator::default()
        .aggregate_files("55kcb", &[good, dangling.clone()])
        .unwrap();
    assert_eq!(aggregation.observations, 1);
    assert_eq!(aggregation.rejected.len(), 1);
    assert_eq!(aggregation.rejected[0].0, dangling);
    assert_eq!(*aggregation.surface.data(), array![[1.0, 1.0]]);
}

#[test]
fn test_masked_rasters_are_discovered_in_date_order() {
    let dir = TempDir::new().unwrap();

    write_masked(dir.path(), "20230111", array![[1.0]], 10.0);
    write_masked(dir.path(), "20230101", array![[1.0]], 10.0);
    std::fs::write(dir.path().join("masked_20230101.tif.aux.xml"), "<PAMDataset/>").unwrap();

    let found = OccurrenceAggregator::find_masked_rasters(dir.path()).unwrap();
    let names: Vec<_> = found
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["masked_20230101.tif", "masked_20230111.tif"]);
}
