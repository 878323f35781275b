use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use num_traits::ToPrimitive;

/// Element types a single raster band can hold
pub trait PixelType:
    gdal::raster::GdalType
    + num_traits::NumCast
    + Copy
    + PartialOrd
    + Default
    + Send
    + Sync
    + fmt::Debug
    + 'static
{
}

impl<T> PixelType for T where
    T: gdal::raster::GdalType
        + num_traits::NumCast
        + Copy
        + PartialOrd
        + Default
        + Send
        + Sync
        + fmt::Debug
        + 'static
{
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square or rectangular pixels.
    /// `pixel_size_y` is the positive ground size; the stored height is negated.
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size_x: f64, pixel_size_y: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size_x,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size_y,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// World coordinates of a (fractional) pixel position.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Fractional pixel position of a world coordinate, `None` for a degenerate transform.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (self.pixel_width * dy - self.rotation_y * dx) / det;
        Some((col, row))
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0 && self.pixel_width > 0.0 && self.pixel_height < 0.0
    }

    /// Component-wise comparison scaled to the pixel size
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let tol = 1e-6 * self.pixel_width.abs().max(self.pixel_height.abs()).max(1e-12);
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }
}

/// Axis-aligned bounds in CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Coordinate reference system definition (WKT, PROJ string or `EPSG:n`).
/// An empty definition means the raster carried no CRS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(String);

impl Crs {
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into().trim().to_string())
    }

    pub fn from_epsg(code: u32) -> Self {
        Self(format!("EPSG:{}", code))
    }

    pub fn definition(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_spatial_ref(&self) -> HunterResult<gdal::spatial_ref::SpatialRef> {
        if self.is_unknown() {
            return Err(HunterError::Processing("Cannot build a spatial reference from an empty CRS".to_string()));
        }
        Ok(gdal::spatial_ref::SpatialRef::from_definition(&self.0)?)
    }

    /// True when both definitions describe the same CRS.
    /// A missing CRS is treated as matching anything.
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        if self.0 == other.0 || self.is_unknown() || other.is_unknown() {
            return true;
        }
        match (self.to_spatial_ref(), other.to_spatial_ref()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown CRS>")
        } else if self.0.chars().count() > 60 {
            write!(f, "{}...", self.0.chars().take(60).collect::<String>())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Georeferencing of a raster without its pixels
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub crs: Crs,
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Same shape, same transform and an equivalent CRS
    pub fn is_aligned_with(&self, other: &GridSpec) -> bool {
        self.shape() == other.shape()
            && self.transform.approx_eq(&other.transform)
            && self.crs.is_equivalent(&other.crs)
    }

    pub fn bounds(&self) -> Bounds {
        let corners = [
            self.transform.pixel_to_world(0.0, 0.0),
            self.transform.pixel_to_world(self.width as f64, 0.0),
            self.transform.pixel_to_world(0.0, self.height as f64),
            self.transform.pixel_to_world(self.width as f64, self.height as f64),
        ];
        let mut bounds = Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        bounds
    }
}

/// Single-band raster held in memory.
///
/// Width and height are always the array's dimensions; the nodata value,
/// when present, is guaranteed to be representable in `T`.
#[derive(Debug, Clone)]
pub struct RasterGrid<T> {
    data: Array2<T>,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f64>,
}

impl<T: PixelType> RasterGrid<T> {
    pub fn new(data: Array2<T>, transform: GeoTransform, crs: Crs, nodata: Option<f64>) -> HunterResult<Self> {
        if let Some(value) = nodata {
            if !Self::nodata_fits(value) {
                return Err(HunterError::Processing(format!(
                    "Nodata value {} is not representable in {}",
                    value,
                    std::any::type_name::<T>()
                )));
            }
        }
        Ok(Self { data, transform, crs, nodata })
    }

    /// Whether `value` survives a round trip through `T`
    pub fn nodata_fits(value: f64) -> bool {
        match <T as num_traits::NumCast>::from(value) {
            Some(cast) => match cast.to_f64() {
                Some(back) => back == value || (back.is_nan() && value.is_nan()),
                None => false,
            },
            None => false,
        }
    }

    /// New grid on the same georeferencing with different pixels
    pub fn with_data<U: PixelType>(&self, data: Array2<U>, nodata: Option<f64>) -> HunterResult<RasterGrid<U>> {
        if data.dim() != self.data.dim() {
            return Err(HunterError::Processing(format!(
                "Replacement array shape {:?} does not match grid shape {:?}",
                data.dim(),
                self.data.dim()
            )));
        }
        RasterGrid::new(data, self.transform, self.crs.clone(), nodata)
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn into_data(self) -> Array2<T> {
        self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn spec(&self) -> GridSpec {
        GridSpec {
            transform: self.transform,
            crs: self.crs.clone(),
            width: self.width(),
            height: self.height(),
        }
    }

    /// Whether a pixel value is the nodata sentinel (NaN always is)
    pub fn is_nodata(&self, value: T) -> bool {
        let v = match value.to_f64() {
            Some(v) => v,
            None => return false,
        };
        if v.is_nan() {
            return true;
        }
        matches!(self.nodata, Some(nd) if nd == v)
    }
}

/// Acquisition date, the join key across a tile's rasters (YYYYMMDD)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SceneDate(NaiveDate);

impl SceneDate {
    pub fn parse(s: &str) -> HunterResult<Self> {
        let s = s.trim();
        if s.len() != 8 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(HunterError::InvalidInput(format!("Expected an 8-digit YYYYMMDD date, got '{}'", s)));
        }
        NaiveDate::parse_from_str(s, "%Y%m%d")
            .map(SceneDate)
            .map_err(|e| HunterError::InvalidInput(format!("Invalid date '{}': {}", s, e)))
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        SceneDate(date)
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for SceneDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

impl FromStr for SceneDate {
    type Err = HunterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SceneDate::parse(s)
    }
}

impl TryFrom<String> for SceneDate {
    type Error = HunterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SceneDate::parse(&value)
    }
}

impl From<SceneDate> for String {
    fn from(date: SceneDate) -> Self {
        date.to_string()
    }
}

/// Inclusive acquisition date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: SceneDate,
    pub end: SceneDate,
}

impl DateRange {
    pub fn new(start: SceneDate, end: SceneDate) -> HunterResult<Self> {
        if start > end {
            return Err(HunterError::InvalidInput(format!("Start date {} is after end date {}", start, end)));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> HunterResult<Self> {
        Self::new(SceneDate::parse(start)?, SceneDate::parse(end)?)
    }

    pub fn contains(&self, date: SceneDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// `{start}{end}`, the key used in output file names
    pub fn compact(&self) -> String {
        format!("{}{}", self.start, self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Fixed-grid tile identifier (scene code)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileCode(String);

impl TileCode {
    pub fn parse(s: &str) -> HunterResult<Self> {
        let s = s.trim();
        if s.chars().count() < 3 || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(HunterError::InvalidInput(format!(
                "Tile code '{}' must be at least 3 alphanumeric characters",
                s
            )));
        }
        Ok(TileCode(s.to_string()))
    }

    /// Product suffix carried in every file name: the tile code's third character
    pub fn suffix(&self) -> char {
        // parse() guarantees three ASCII characters
        self.0.as_bytes()[2] as char
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TileCode {
    type Error = HunterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TileCode::parse(&value)
    }
}

impl From<TileCode> for String {
    fn from(tile: TileCode) -> Self {
        tile.0
    }
}

/// Quality mask categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MaskKind {
    Cloud,
    CloudShadow,
    TopoShadow,
}

impl MaskKind {
    pub fn is_shadow(&self) -> bool {
        match self {
            MaskKind::Cloud => false,
            MaskKind::CloudShadow | MaskKind::TopoShadow => true,
        }
    }

    pub fn role(&self) -> RasterRole {
        match self {
            MaskKind::Cloud => RasterRole::Cloud,
            MaskKind::CloudShadow => RasterRole::CloudShadow,
            MaskKind::TopoShadow => RasterRole::TopoShadow,
        }
    }
}

impl fmt::Display for MaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskKind::Cloud => write!(f, "cloud"),
            MaskKind::CloudShadow => write!(f, "cloud-shadow"),
            MaskKind::TopoShadow => write!(f, "topo-shadow"),
        }
    }
}

/// Role of a retrieved raster, assigned when the file name is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RasterRole {
    Water,
    Cloud,
    CloudShadow,
    TopoShadow,
}

impl RasterRole {
    pub const ALL: [RasterRole; 4] = [
        RasterRole::Water,
        RasterRole::Cloud,
        RasterRole::CloudShadow,
        RasterRole::TopoShadow,
    ];

    /// Stage token used in archive file names
    pub fn file_token(&self) -> &'static str {
        match self {
            RasterRole::Water => "water",
            RasterRole::Cloud => "cloudm",
            RasterRole::CloudShadow => "cloudshadowm",
            RasterRole::TopoShadow => "toposhadowm",
        }
    }

    pub fn mask_kind(&self) -> Option<MaskKind> {
        match self {
            RasterRole::Water => None,
            RasterRole::Cloud => Some(MaskKind::Cloud),
            RasterRole::CloudShadow => Some(MaskKind::CloudShadow),
            RasterRole::TopoShadow => Some(MaskKind::TopoShadow),
        }
    }
}

/// Error types for water occurrence processing
#[derive(Debug, thiserror::Error)]
pub enum HunterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Catalog error for tile {tile} ({range}): {message}")]
    Catalog { tile: String, range: String, message: String },

    #[error("Retrieval error for tile {tile}: {message}")]
    Retrieval { tile: String, message: String },

    #[error("Invalid raster {}: {reason}", path.display())]
    InvalidRaster { path: PathBuf, reason: String },

    #[error("No masked input rasters for tile {tile}")]
    NoInputRasters { tile: String },

    #[error("No mosaic inputs matching {pattern}")]
    NoMosaicInputs { pattern: String },

    #[error("CRS mismatch in {}: expected {expected}, found {found}", path.display())]
    CrsMismatch { expected: String, found: String, path: PathBuf },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl HunterError {
    pub fn invalid_raster(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HunterError::InvalidRaster {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error ends a tile rather than just one of its dates
    pub fn is_tile_fatal(&self) -> bool {
        !matches!(self, HunterError::InvalidRaster { .. } | HunterError::CrsMismatch { .. })
    }
}

/// Result type for water occurrence operations
pub type HunterResult<T> = Result<T, HunterError>;
