//! Core mosaic modules: pyramid geometry, tile building and composition

pub mod level;
pub mod matrix;
pub mod tile;
pub mod tile_builder;
pub mod composer;
pub mod mosaic_source;

// Re-export main types
pub use level::{level_size, level_size_f64, level_offset, level_offset_f64, tile_count, MultiLevelModel};
pub use matrix::{MatrixCell, MosaicMatrix};
pub use tile::{TileImage, TileImageDisposer};
pub use tile_builder::{TileBuilder, UncompressedTileBuilder, ChunkedTileBuilder, ChunkSegment};
pub use composer::{CompositionPolicy, MosaicComposer};
pub use mosaic_source::{MosaicSourceConfig, TileSource, MosaicEngine, MosaicSubsetSource, MatrixMosaicSubsetSource};
