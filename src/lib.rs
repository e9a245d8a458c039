//! mosaic-pyramid: multi-resolution mosaics over tiled rasters
//!
//! A logical image is stitched from one raster region or from a matrix of
//! rasters, and rendered on demand at any pyramid level. Each level halves the
//! resolution of the previous one. Tiles are read per level from a
//! [`io::PixelSource`], placed by a [`core::TileBuilder`] strategy and overlaid
//! by the [`core::MosaicComposer`].

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use crate::types::{
    DataType, GeoTransform, MosaicError, MosaicResult, Raster, Rectangle, Sample
};

pub use crate::io::{PixelSource, ArrayPixelSource, ChunkedArraySource};
pub use crate::core::{
    MultiLevelModel, MosaicMatrix, MatrixCell, TileSource, MosaicSourceConfig,
    MosaicSubsetSource, MatrixMosaicSubsetSource, UncompressedTileBuilder, ChunkedTileBuilder,
    CompositionPolicy,
};
