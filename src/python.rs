//! Python bindings

use crate::config::Settings;
use crate::core::classify::{WaterClassifier, DEFAULT_WATER_CLASS};
use crate::core::occurrence::{OccurrenceAggregator, DEFAULT_MIN_FREQUENCY};
use crate::types::{Crs, DateRange, GeoTransform, RasterGrid, TileCode};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

/// Convert PyReadonlyArray2 to ndarray Array2
fn numpy_to_array2<T>(arr: PyReadonlyArray2<T>) -> ndarray::Array2<T>
where
    T: Copy + numpy::Element,
{
    arr.as_array().to_owned()
}

/// Arrays from Python carry no georeferencing; give them a pixel grid
fn pixel_grid<T: crate::types::PixelType>(data: ndarray::Array2<T>) -> PyResult<RasterGrid<T>> {
    RasterGrid::new(
        data,
        GeoTransform::north_up(0.0, 0.0, 1.0, 1.0),
        Crs::default(),
        None,
    )
    .map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Binary water layer (1.0 water, 0.0 otherwise) from a classified scene
#[pyfunction]
fn classify_water(py: Python, data: PyReadonlyArray2<f64>, water_code: Option<f64>) -> PyResult<PyObject> {
    let grid = pixel_grid(numpy_to_array2(data))?;
    let classifier = WaterClassifier::new(water_code.unwrap_or(DEFAULT_WATER_CLASS));
    let water = classifier
        .classify(&grid)
        .map_err(|e| PyValueError::new_err(format!("Classification failed: {}", e)))?;
    Ok(water.into_data().to_pyarray(py).into())
}

/// Thresholded occurrence proportion over a stack of masked water layers
#[pyfunction]
fn occurrence_proportion(
    py: Python,
    masked: Vec<PyReadonlyArray2<f32>>,
    min_frequency: Option<f64>,
    nodata: Option<f32>,
) -> PyResult<PyObject> {
    let grids = masked
        .into_iter()
        .map(|arr| pixel_grid(numpy_to_array2(arr)))
        .collect::<PyResult<Vec<_>>>()?;

    if let Some(first) = grids.first() {
        if grids.iter().any(|g| g.shape() != first.shape()) {
            return Err(PyValueError::new_err("All masked layers must have the same shape"));
        }
    }

    let aggregator = OccurrenceAggregator::new(
        min_frequency.unwrap_or(DEFAULT_MIN_FREQUENCY),
        nodata.unwrap_or(0.0),
    );
    let surface = aggregator
        .aggregate_grids("python", &grids)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(surface.into_data().to_pyarray(py).into())
}

/// Run the full pipeline; returns the per-tile output paths that were written
#[pyfunction]
fn process_tiles(settings_json: String, tiles: Vec<String>, start: String, end: String) -> PyResult<Vec<String>> {
    let settings = Settings::from_json(&settings_json).map_err(|e| PyValueError::new_err(e.to_string()))?;
    let range = DateRange::parse(&start, &end).map_err(|e| PyValueError::new_err(e.to_string()))?;
    let tiles = tiles
        .iter()
        .map(|t| TileCode::parse(t))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let processor = settings
        .build_processor()
        .map_err(|e| PyRuntimeError::new_err(format!("Setup failed: {}", e)))?;
    let report = processor.process_batch(&tiles, &range);

    Ok(report
        .outputs()
        .iter()
        .map(|p| p.display().to_string())
        .collect())
}

#[pymodule]
fn puddle_hunter(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(classify_water, m)?)?;
    m.add_function(wrap_pyfunction!(occurrence_proportion, m)?)?;
    m.add_function(wrap_pyfunction!(process_tiles, m)?)?;
    Ok(())
}
