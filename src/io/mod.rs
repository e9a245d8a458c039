//! Pixel sources feeding the tile builders

pub mod pixel_source;

pub use pixel_source::{PixelSource, TileRequest, ChunkLocation, ArrayPixelSource, ChunkedArraySource};
