use ndarray::Array2;
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Single-band raster buffer (rows x columns)
pub type Raster<T> = Array2<T>;

/// Sample data type declared by a pixel source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Size of one sample in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::UInt8 | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::UInt8 => write!(f, "uint8"),
            DataType::Int8 => write!(f, "int8"),
            DataType::UInt16 => write!(f, "uint16"),
            DataType::Int16 => write!(f, "int16"),
            DataType::UInt32 => write!(f, "uint32"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
        }
    }
}

/// Pixel sample stored in tiles and composed rasters
pub trait Sample: Copy + Default + PartialOrd + NumCast + Debug + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    /// Sample value as f64, used for threshold comparisons
    fn as_f64(self) -> Option<f64> {
        <f64 as NumCast>::from(self)
    }

    /// Converts a configured value (background, threshold) into this sample type
    fn from_f64_lossy(value: f64) -> Self {
        <Self as NumCast>::from(value).unwrap_or_default()
    }
}

macro_rules! impl_sample {
    ($($ty:ty => $data_type:ident),* $(,)?) => {
        $(
            impl Sample for $ty {
                const DATA_TYPE: DataType = DataType::$data_type;
            }
        )*
    };
}

impl_sample! {
    u8 => UInt8,
    i8 => Int8,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i32 => Int32,
    f32 => Float32,
    f64 => Float64,
}

/// Integer rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rectangle {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Create a read-bounds rectangle, rejecting empty extents
    pub fn read_bounds(x: usize, y: usize, width: usize, height: usize) -> MosaicResult<Self> {
        let bounds = Self::new(x, y, width, height);
        bounds.validate_read_bounds()?;
        Ok(bounds)
    }

    pub fn validate_read_bounds(&self) -> MosaicResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MosaicError::Geometry(format!(
                "Read bounds must have a positive size, got {}x{} at ({}, {})",
                self.width, self.height, self.x, self.y
            )));
        }
        if self.x.checked_add(self.width).is_none() || self.y.checked_add(self.height).is_none() {
            return Err(MosaicError::Geometry(format!(
                "Read bounds {}x{} at ({}, {}) overflow the pixel coordinate range",
                self.width, self.height, self.x, self.y
            )));
        }
        Ok(())
    }

    /// Exclusive right edge, saturating at `usize::MAX`
    pub fn right(&self) -> usize {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge, saturating at `usize::MAX`
    pub fn bottom(&self) -> usize {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Overlapping part of two rectangles, `None` when they do not intersect
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right <= x || bottom <= y {
            return None;
        }

        Some(Rectangle::new(x, y, right - x, bottom - y))
    }

    pub fn contains(&self, other: &Rectangle) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

impl std::fmt::Display for Rectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[x={}, y={}, {}x{}]", self.x, self.y, self.width, self.height)
    }
}

/// Image-to-model affine transformation (GDAL coefficient order)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn identity() -> Self {
        Self {
            top_left_x: 0.0,
            pixel_width: 1.0,
            rotation_x: 0.0,
            top_left_y: 0.0,
            rotation_y: 0.0,
            pixel_height: 1.0,
        }
    }

    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        Self {
            top_left_x: coefficients[0],
            pixel_width: coefficients[1],
            rotation_x: coefficients[2],
            top_left_y: coefficients[3],
            rotation_y: coefficients[4],
            pixel_height: coefficients[5],
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

    /// Transform scaled so one pixel covers `scale` x `scale` source pixels
    pub fn scaled(&self, scale: f64) -> Self {
        Self {
            top_left_x: self.top_left_x,
            pixel_width: self.pixel_width * scale,
            rotation_x: self.rotation_x * scale,
            top_left_y: self.top_left_y,
            rotation_y: self.rotation_y * scale,
            pixel_height: self.pixel_height * scale,
        }
    }

    /// Model coordinates of an image position
    pub fn apply(&self, pixel_x: f64, pixel_y: f64) -> (f64, f64) {
        (
            self.top_left_x + pixel_x * self.pixel_width + pixel_y * self.rotation_x,
            self.top_left_y + pixel_x * self.rotation_y + pixel_y * self.pixel_height,
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Error types for mosaic assembly
#[derive(Debug, thiserror::Error)]
pub enum MosaicError {
    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Incomplete matrix: {filled} of {capacity} cells assigned")]
    IncompleteMatrix { filled: usize, capacity: usize },

    #[error("Matrix is full: all {capacity} cells are assigned")]
    Capacity { capacity: usize },

    #[error("Matrix cell ({row}, {column}) is already assigned")]
    OccupiedSlot { row: usize, column: usize },

    #[error("No tiles to mosaic on level {level}")]
    EmptyMosaic { level: usize },

    #[error("Pixel source error: {0}")]
    PixelSource(String),
}

/// Result type for mosaic operations
pub type MosaicResult<T> = Result<T, MosaicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_intersection() {
        let a = Rectangle::new(0, 0, 100, 50);
        let b = Rectangle::new(80, 40, 100, 100);

        assert_eq!(a.intersection(&b), Some(Rectangle::new(80, 40, 20, 10)));
        assert_eq!(b.intersection(&a), Some(Rectangle::new(80, 40, 20, 10)));

        // Touching edges do not intersect
        let c = Rectangle::new(100, 0, 10, 10);
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn test_read_bounds_rejects_empty() {
        assert!(Rectangle::read_bounds(0, 0, 0, 10).is_err());
        assert!(Rectangle::read_bounds(5, 5, 10, 0).is_err());
        assert!(Rectangle::read_bounds(5, 5, 1, 1).is_ok());
    }

    #[test]
    fn test_read_bounds_rejects_overflowing_extent() {
        assert!(matches!(
            Rectangle::read_bounds(usize::MAX - 5, 0, 10, 10),
            Err(MosaicError::Geometry(_))
        ));
        assert!(Rectangle::read_bounds(0, usize::MAX, 1, 1).is_err());
        assert!(Rectangle::read_bounds(usize::MAX - 10, 0, 10, 10).is_ok());

        let far = Rectangle::new(usize::MAX - 5, usize::MAX - 5, 10, 10);
        assert_eq!(far.right(), usize::MAX);
        assert_eq!(far.bottom(), usize::MAX);
        assert_eq!(far.intersection(&Rectangle::new(0, 0, 100, 100)), None);
    }

    #[test]
    fn test_geo_transform_scaling() {
        let transform = GeoTransform::from_gdal([500000.0, 10.0, 0.0, 4600000.0, 0.0, -10.0]);
        let level2 = transform.scaled(4.0);

        assert_eq!(level2.to_gdal(), [500000.0, 40.0, 0.0, 4600000.0, 0.0, -40.0]);
        assert_eq!(level2.apply(1.0, 1.0), (500040.0, 4599960.0));
    }

    #[test]
    fn test_sample_conversions() {
        assert_eq!(u8::from_f64_lossy(300.0), 0); // out of range falls back to default
        assert_eq!(u16::from_f64_lossy(42.0), 42);
        assert_eq!((-3i16).as_f64(), Some(-3.0));
        assert_eq!(<f32 as Sample>::DATA_TYPE.size_bytes(), 4);
    }
}
