use crate::types::{GridSpec, HunterError, HunterResult, PixelType, RasterGrid};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use ndarray::Array2;

/// Resample `source` onto `target` with nearest-neighbour lookup.
///
/// Target pixels whose centre falls outside the source take `fill`.
/// Categorical layers (masks, presence) stay categorical because no
/// value is ever interpolated.
pub fn reproject_nearest<T: PixelType>(
    source: &RasterGrid<T>,
    target: &GridSpec,
    fill: T,
) -> HunterResult<Array2<T>> {
    let source_spec = source.spec();

    if source_spec.is_aligned_with(target) {
        return Ok(source.data().clone());
    }

    resample_nearest(source, target, fill)
}

/// Per-pixel lookup without the aligned-grid shortcut
fn resample_nearest<T: PixelType>(source: &RasterGrid<T>, target: &GridSpec, fill: T) -> HunterResult<Array2<T>> {
    let source_spec = source.spec();
    log::debug!(
        "Reprojecting {}x{} grid onto {}x{} target",
        source_spec.width,
        source_spec.height,
        target.width,
        target.height
    );

    let transform = if source_spec.crs.definition() == target.crs.definition()
        || source_spec.crs.is_unknown()
        || target.crs.is_unknown()
    {
        None
    } else {
        Some(build_transform(target.crs.to_spatial_ref()?, source_spec.crs.to_spatial_ref()?)?)
    };

    let src = source.data();
    let (src_height, src_width) = src.dim();
    let mut resampled = Array2::from_elem((target.height, target.width), fill);

    let mut xs = vec![0.0; target.width];
    let mut ys = vec![0.0; target.width];
    let mut zs = vec![0.0; target.width];

    for row in 0..target.height {
        for col in 0..target.width {
            let (x, y) = target.transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
            xs[col] = x;
            ys[col] = y;
            zs[col] = 0.0;
        }

        if let Some(ct) = &transform {
            ct.transform_coords(&mut xs, &mut ys, &mut zs)?;
        }

        for col in 0..target.width {
            let (src_col, src_row) = match source_spec.transform.world_to_pixel(xs[col], ys[col]) {
                Some(p) => p,
                None => {
                    return Err(HunterError::Processing(
                        "Source geotransform is not invertible".to_string(),
                    ))
                }
            };

            if !(src_col.is_finite() && src_row.is_finite()) {
                continue;
            }

            let (c, r) = (src_col.floor(), src_row.floor());
            if c >= 0.0 && r >= 0.0 && (c as usize) < src_width && (r as usize) < src_height {
                resampled[[row, col]] = src[[r as usize, c as usize]];
            }
        }
    }

    Ok(resampled)
}

/// Coordinate transform from `from` to `to` in x/y (easting/northing, lon/lat) order
#[allow(unused_mut)]
fn build_transform(mut from: SpatialRef, mut to: SpatialRef) -> HunterResult<CoordTransform> {
    from.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    to.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(CoordTransform::new(&from, &to)?)
}
