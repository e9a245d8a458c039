use crate::core::level::level_size;
use crate::core::matrix::MatrixCell;
use crate::types::{DataType, MosaicError, MosaicResult, Raster, Rectangle, Sample};
use ndarray::{s, Array2};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Position of a requested region inside a storage chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Chunk column in the source chunk grid
    pub column: usize,
    /// Chunk row in the source chunk grid
    pub row: usize,
    /// Row-major linear chunk index
    pub index: usize,
    pub chunk_width: usize,
    pub chunk_height: usize,
    /// Offset of the region inside the chunk
    pub offset_x: usize,
    pub offset_y: usize,
}

/// Pixels requested for one tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub level: usize,
    /// Region in level-0 source coordinates
    pub region: Rectangle,
    /// Set when the tile is aligned to a storage chunk
    pub chunk: Option<ChunkLocation>,
}

impl TileRequest {
    /// Width of the raster the source must return
    pub fn level_width(&self) -> usize {
        level_size(self.region.width, self.level)
    }

    /// Height of the raster the source must return
    pub fn level_height(&self) -> usize {
        level_size(self.region.height, self.level)
    }
}

/// Decoder side of the mosaic: supplies level-scaled pixels for a region.
///
/// The returned raster must be exactly `level_width() x level_height()` of the
/// request; builders reject anything else.
pub trait PixelSource {
    type Sample: Sample;

    fn data_type(&self) -> DataType {
        <Self::Sample as Sample>::DATA_TYPE
    }

    /// Level-0 raster width
    fn raster_width(&self) -> usize;

    /// Level-0 raster height
    fn raster_height(&self) -> usize;

    fn read_tile(&self, request: &TileRequest) -> MosaicResult<Raster<Self::Sample>>;
}

impl<P: PixelSource + ?Sized> PixelSource for &P {
    type Sample = P::Sample;

    fn raster_width(&self) -> usize {
        (**self).raster_width()
    }

    fn raster_height(&self) -> usize {
        (**self).raster_height()
    }

    fn read_tile(&self, request: &TileRequest) -> MosaicResult<Raster<Self::Sample>> {
        (**self).read_tile(request)
    }
}

/// Nearest-neighbour decimation of a region: every `2^level`-th sample
fn decimate<T: Sample>(data: &Array2<T>, region: &Rectangle, level: usize) -> MosaicResult<Array2<T>> {
    let full = Rectangle::new(0, 0, data.ncols(), data.nrows());
    if region.is_empty() || !full.contains(region) {
        return Err(MosaicError::PixelSource(format!(
            "Region {} is outside the {}x{} raster",
            region,
            data.ncols(),
            data.nrows()
        )));
    }
    if level >= isize::BITS as usize - 1 {
        return Err(MosaicError::PixelSource(format!("Unsupported level {}", level)));
    }

    let step = 1isize << level;
    let window = data.slice(s![
        region.y..region.bottom();step,
        region.x..region.right();step
    ]);
    Ok(window.to_owned())
}

/// In-memory raster, sampled per level by nearest-neighbour decimation
#[derive(Debug, Clone)]
pub struct ArrayPixelSource<T> {
    data: Array2<T>,
}

impl<T: Sample> ArrayPixelSource<T> {
    pub fn new(data: Array2<T>) -> Self {
        Self { data }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0, 0, self.width(), self.height())
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }
}

impl<T: Sample> PixelSource for ArrayPixelSource<T> {
    type Sample = T;

    fn raster_width(&self) -> usize {
        self.width()
    }

    fn raster_height(&self) -> usize {
        self.height()
    }

    fn read_tile(&self, request: &TileRequest) -> MosaicResult<Raster<T>> {
        decimate(&self.data, &request.region, request.level)
    }
}

impl<T: Sample> MatrixCell for ArrayPixelSource<T> {
    fn cell_width(&self) -> usize {
        self.width()
    }

    fn cell_height(&self) -> usize {
        self.height()
    }
}

/// In-memory raster stored in fixed-size chunks.
///
/// Every request must name the chunk it reads from and stay inside it. The
/// number of level-0 samples touched is counted, so callers can check that only
/// the needed part of each chunk was decoded.
#[derive(Debug)]
pub struct ChunkedArraySource<T> {
    data: Array2<T>,
    chunk_width: usize,
    chunk_height: usize,
    decoded_samples: AtomicUsize,
    chunk_reads: AtomicUsize,
}

impl<T: Sample> ChunkedArraySource<T> {
    pub fn new(data: Array2<T>, chunk_width: usize, chunk_height: usize) -> MosaicResult<Self> {
        if chunk_width == 0 || chunk_height == 0 {
            return Err(MosaicError::Geometry(format!(
                "Invalid chunk size {}x{}",
                chunk_width, chunk_height
            )));
        }

        Ok(Self {
            data,
            chunk_width,
            chunk_height,
            decoded_samples: AtomicUsize::new(0),
            chunk_reads: AtomicUsize::new(0),
        })
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn chunk_width(&self) -> usize {
        self.chunk_width
    }

    pub fn chunk_height(&self) -> usize {
        self.chunk_height
    }

    /// Level-0 samples read so far
    pub fn decoded_samples(&self) -> usize {
        self.decoded_samples.load(Ordering::Relaxed)
    }

    /// Chunk reads served so far
    pub fn chunk_reads(&self) -> usize {
        self.chunk_reads.load(Ordering::Relaxed)
    }
}

impl<T: Sample> PixelSource for ChunkedArraySource<T> {
    type Sample = T;

    fn raster_width(&self) -> usize {
        self.width()
    }

    fn raster_height(&self) -> usize {
        self.height()
    }

    fn read_tile(&self, request: &TileRequest) -> MosaicResult<Raster<T>> {
        let chunk = request.chunk.ok_or_else(|| {
            MosaicError::PixelSource("Chunked source requires a chunk location".to_string())
        })?;

        let chunk_bounds = Rectangle::new(
            chunk.column * self.chunk_width,
            chunk.row * self.chunk_height,
            self.chunk_width,
            self.chunk_height,
        );
        if !chunk_bounds.contains(&request.region) {
            return Err(MosaicError::PixelSource(format!(
                "Region {} is not inside chunk {} {}",
                request.region, chunk.index, chunk_bounds
            )));
        }
        if request.region.x - chunk_bounds.x != chunk.offset_x
            || request.region.y - chunk_bounds.y != chunk.offset_y
        {
            return Err(MosaicError::PixelSource(format!(
                "Chunk offset ({}, {}) does not match region {}",
                chunk.offset_x, chunk.offset_y, request.region
            )));
        }

        let tile = decimate(&self.data, &request.region, request.level)?;
        self.decoded_samples
            .fetch_add(request.region.area(), Ordering::Relaxed);
        self.chunk_reads.fetch_add(1, Ordering::Relaxed);
        Ok(tile)
    }
}
