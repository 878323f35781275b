use crate::types::{Crs, GeoTransform, GridSpec, HunterError, HunterResult, PixelType, RasterGrid};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// GDAL-backed single-band raster reader
pub struct RasterReader;

impl RasterReader {
    /// Read band 1 of a raster as `T`, together with its georeferencing
    pub fn read<T: PixelType, P: AsRef<Path>>(path: P) -> HunterResult<RasterGrid<T>> {
        let path = path.as_ref();
        log::debug!("Reading raster: {}", path.display());

        let dataset = Dataset::open(path)
            .map_err(|e| HunterError::invalid_raster(path, format!("cannot open: {}", e)))?;

        if dataset.raster_count() < 1 {
            return Err(HunterError::invalid_raster(path, "raster has no bands"));
        }

        let spec = Self::spec_of(&dataset, path)?;
        let (width, height) = (spec.width, spec.height);

        let rasterband = dataset
            .rasterband(1)
            .map_err(|e| HunterError::invalid_raster(path, format!("cannot access band 1: {}", e)))?;
        // Nodata that does not survive the cast (e.g. -9999 on a byte band) is dropped
        let nodata = match rasterband.no_data_value() {
            Some(value) if !RasterGrid::<T>::nodata_fits(value) => {
                log::warn!(
                    "Nodata {} of {} is not representable as {}, ignoring it",
                    value,
                    path.display(),
                    std::any::type_name::<T>()
                );
                None
            }
            other => other,
        };
        let band_data = rasterband
            .read_as::<T>((0, 0), (width, height), (width, height), None)
            .map_err(|e| HunterError::invalid_raster(path, format!("cannot read band 1: {}", e)))?;

        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| HunterError::invalid_raster(path, format!("band shape mismatch: {}", e)))?;
        let grid = RasterGrid::new(data, spec.transform, spec.crs, nodata)
            .map_err(|e| HunterError::invalid_raster(path, e.to_string()))?;

        log::debug!("Raster {}: {}x{}, nodata {:?}", path.display(), width, height, grid.nodata());
        Ok(grid)
    }

    /// Georeferencing only, without reading pixels
    pub fn read_spec<P: AsRef<Path>>(path: P) -> HunterResult<GridSpec> {
        let path = path.as_ref();
        let dataset = Dataset::open(path)
            .map_err(|e| HunterError::invalid_raster(path, format!("cannot open: {}", e)))?;
        Self::spec_of(&dataset, path)
    }

    fn spec_of(dataset: &Dataset, path: &Path) -> HunterResult<GridSpec> {
        let (width, height) = dataset.raster_size();
        if width == 0 || height == 0 {
            return Err(HunterError::invalid_raster(path, "raster has zero extent"));
        }

        let transform = match dataset.geo_transform() {
            Ok(gt) => GeoTransform::from_gdal(gt),
            Err(e) => {
                log::warn!("{} has no geotransform ({}), using pixel coordinates", path.display(), e);
                GeoTransform::from_gdal([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
            }
        };

        Ok(GridSpec {
            transform,
            crs: Crs::new(dataset.projection()),
            width,
            height,
        })
    }
}

/// GDAL-backed GeoTIFF writer
pub struct RasterWriter;

impl RasterWriter {
    /// Write a grid as a single-band GeoTIFF of its element type
    pub fn write<T: PixelType, P: AsRef<Path>>(
        path: P,
        grid: &RasterGrid<T>,
        compression: Option<&str>,
    ) -> HunterResult<()> {
        let path = path.as_ref();
        log::debug!("Writing raster: {}", path.display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = grid.shape();

        let options: Vec<RasterCreationOption> = compression
            .map(|c| vec![RasterCreationOption { key: "COMPRESS", value: c }])
            .unwrap_or_default();

        let mut dataset = driver.create_with_band_type_with_options::<T, _>(
            path,
            width as isize,
            height as isize,
            1,
            &options,
        )?;

        dataset.set_geo_transform(&grid.transform().to_gdal())?;
        if !grid.crs().is_unknown() {
            let srs = grid.crs().to_spatial_ref()?;
            dataset.set_projection(&srs.to_wkt()?)?;
        }

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<T> = grid.data().iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        if let Some(nodata) = grid.nodata() {
            rasterband.set_no_data_value(Some(nodata))?;
        }

        Ok(())
    }
}
