use crate::io::raster::RasterReader;
use crate::types::{HunterResult, PixelType, RasterGrid};
use num_traits::ToPrimitive;
use std::path::Path;

/// Class code marking water in the classified products
pub const DEFAULT_WATER_CLASS: f64 = 2.0;

/// Converts a multi-class raster into a binary water layer
#[derive(Debug, Clone, Copy)]
pub struct WaterClassifier {
    water_code: f64,
}

impl Default for WaterClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_WATER_CLASS)
    }
}

impl WaterClassifier {
    pub fn new(water_code: f64) -> Self {
        Self { water_code }
    }

    pub fn water_code(&self) -> f64 {
        self.water_code
    }

    /// 1.0 where the pixel equals the water code, 0.0 everywhere else.
    /// Georeferencing and nodata are carried over from the input.
    pub fn classify<T: PixelType>(&self, raw: &RasterGrid<T>) -> HunterResult<RasterGrid<f32>> {
        let code = self.water_code;
        let binary = raw.data().mapv(|v| match v.to_f64() {
            Some(value) if value == code => 1.0f32,
            _ => 0.0f32,
        });

        let nodata = raw.nodata().filter(|&nd| RasterGrid::<f32>::nodata_fits(nd));
        raw.with_data(binary, nodata)
    }

    /// Read a classified product from disk and binarise it
    pub fn classify_file<P: AsRef<Path>>(&self, path: P) -> HunterResult<RasterGrid<f32>> {
        let raw = RasterReader::read::<f64, _>(path.as_ref())?;
        let water = self.classify(&raw)?;
        log::debug!(
            "Classified {}: {} water pixels",
            path.as_ref().display(),
            water.data().iter().filter(|&&v| v == 1.0).count()
        );
        Ok(water)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};
    use ndarray::array;

    fn raw_grid() -> RasterGrid<u8> {
        RasterGrid::new(
            array![[0, 2, 1], [2, 3, 2]],
            GeoTransform::north_up(0.0, 20.0, 10.0, 10.0),
            Crs::from_epsg(32755),
            Some(255.0),
        )
        .unwrap()
    }

    #[test]
    fn test_water_code_becomes_one() {
        let water = WaterClassifier::default().classify(&raw_grid()).unwrap();
        assert_eq!(*water.data(), array![[0.0, 1.0, 0.0], [1.0, 0.0, 1.0]]);
        assert_eq!(water.nodata(), Some(255.0));
        assert_eq!(water.transform(), raw_grid().transform());
    }

    #[test]
    fn test_binary_layer_is_fixed_point() {
        let first = WaterClassifier::default().classify(&raw_grid()).unwrap();
        let second = WaterClassifier::new(1.0).classify(&first).unwrap();
        assert_eq!(first.data(), second.data());
    }

    #[test]
    fn test_missing_code_gives_empty_layer() {
        let water = WaterClassifier::new(7.0).classify(&raw_grid()).unwrap();
        assert!(water.data().iter().all(|&v| v == 0.0));
    }
}
