use crate::core::level::{level_size, level_size_f64, tile_count};
use crate::core::tile::{TileImage, TileImageDisposer};
use crate::io::pixel_source::{ChunkLocation, PixelSource, TileRequest};
use crate::types::{MosaicError, MosaicResult, Rectangle};

/// Strategy that slices a read window into level tiles.
///
/// Every built tile is validated against its expected level size and
/// registered with the disposer before the call returns.
pub trait TileBuilder {
    /// Build the tiles covering `read_bounds` (source coordinates) on `level`.
    ///
    /// `level_offset` is added to every tile translation; it places this read
    /// window inside the composed level raster. Returns the number of tiles
    /// registered.
    fn build_tiles<P: PixelSource>(
        &self,
        level: usize,
        read_bounds: &Rectangle,
        level_offset: (f64, f64),
        source: &P,
        disposer: &mut TileImageDisposer<P::Sample>,
    ) -> MosaicResult<usize>;
}

fn check_within_source<P: PixelSource>(read_bounds: &Rectangle, source: &P) -> MosaicResult<()> {
    read_bounds.validate_read_bounds()?;
    let raster = Rectangle::new(0, 0, source.raster_width(), source.raster_height());
    if !raster.contains(read_bounds) {
        return Err(MosaicError::Geometry(format!(
            "Read bounds {} exceed the {}x{} source raster",
            read_bounds, raster.width, raster.height
        )));
    }
    Ok(())
}

// Level translations are sums of size / 2^level, which are exact in f64 for
// raster sizes; the tolerance only absorbs representation noise.
fn same_extent(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9
}

// A row or column of tiles ends on the fractional level total, or past it by
// less than the rounding of that total when a tile is wider than the total.
fn ends_on_extent(level_total: f64, level_end: f64) -> bool {
    same_extent(level_total, level_end)
        || (level_end > level_total && level_end <= level_total.ceil() + 1e-9)
}

/// Fixed logical tile grid laid over the read window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncompressedTileBuilder {
    tile_width: usize,
    tile_height: usize,
}

impl UncompressedTileBuilder {
    pub fn new(tile_width: usize, tile_height: usize) -> MosaicResult<Self> {
        if tile_width == 0 || tile_height == 0 {
            return Err(MosaicError::Geometry(format!(
                "Invalid tile size {}x{}",
                tile_width, tile_height
            )));
        }
        Ok(Self {
            tile_width,
            tile_height,
        })
    }

    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    pub fn tile_height(&self) -> usize {
        self.tile_height
    }
}

/// Level extent of a read window split into `tile_count` tiles.
///
/// A single tile spans the rounded-up level size; several tiles are placed on
/// fractional translations, so their extent is the exact fractional size.
pub fn level_image_extent(size: usize, tile_count: usize, level: usize) -> MosaicResult<f64> {
    match tile_count {
        0 => Err(MosaicError::Geometry(format!("Invalid tile count: {}", tile_count))),
        1 => Ok(level_size(size, level) as f64),
        _ => Ok(level_size_f64(size, level)),
    }
}

/// Translation of the tile at `tile_index` along one axis.
///
/// Tiles are placed every `level_translate_size`. Individually rounded tile
/// sizes can overshoot the level total near the end of a row or column; the
/// last two tiles are pulled back so they end exactly on the total, or start
/// at the origin when a tile is wider than the total. An overshoot anywhere
/// earlier means the tile grid does not fit the level.
pub fn uncompressed_translate_offset(
    tile_index: usize,
    tile_count: usize,
    level_translate_size: f64,
    level_tile_size: usize,
    level_total_size: f64,
) -> MosaicResult<f64> {
    let tile_size = level_tile_size as f64;
    let mut translate_offset = tile_index as f64 * level_translate_size;

    if translate_offset + tile_size > level_total_size {
        if tile_index + 2 < tile_count {
            return Err(MosaicError::Geometry(format!(
                "Invalid values: translateSize={}, translateOffset={}, tileSize={}, levelTotalSize={}, tileIndex={}/{}",
                level_translate_size, translate_offset, tile_size, level_total_size, tile_index, tile_count
            )));
        }
        // A tile rounded up past a short level total starts at the origin
        translate_offset = (level_total_size - tile_size).max(0.0);
    }

    if translate_offset < 0.0 {
        return Err(MosaicError::Geometry(format!(
            "The translate offset is negative: {}",
            translate_offset
        )));
    }
    Ok(translate_offset)
}

impl TileBuilder for UncompressedTileBuilder {
    fn build_tiles<P: PixelSource>(
        &self,
        level: usize,
        read_bounds: &Rectangle,
        level_offset: (f64, f64),
        source: &P,
        disposer: &mut TileImageDisposer<P::Sample>,
    ) -> MosaicResult<usize> {
        check_within_source(read_bounds, source)?;

        let column_tile_count = tile_count(read_bounds.width, self.tile_width);
        let row_tile_count = tile_count(read_bounds.height, self.tile_height);
        let level_image_width = level_image_extent(read_bounds.width, column_tile_count, level)?;
        let level_image_height = level_image_extent(read_bounds.height, row_tile_count, level)?;

        let level_translate_width = level_size_f64(self.tile_width, level);
        let level_translate_height = level_size_f64(self.tile_height, level);
        let mut level_total_translate = (0.0f64, 0.0f64);
        let mut built = 0;

        for tile_row in 0..row_tile_count {
            let tile_offset_y = tile_row * self.tile_height;
            let is_last_row = tile_row == row_tile_count - 1;
            let tile_height = if is_last_row {
                read_bounds.height - tile_offset_y
            } else {
                self.tile_height
            };
            let level_tile_height = level_size(tile_height, level);
            let translate_y = uncompressed_translate_offset(
                tile_row,
                row_tile_count,
                level_translate_height,
                level_tile_height,
                level_image_height,
            )?;

            for tile_column in 0..column_tile_count {
                let tile_offset_x = tile_column * self.tile_width;
                let is_last_column = tile_column == column_tile_count - 1;
                let tile_width = if is_last_column {
                    read_bounds.width - tile_offset_x
                } else {
                    self.tile_width
                };
                let level_tile_width = level_size(tile_width, level);

                let request = TileRequest {
                    level,
                    region: Rectangle::new(
                        read_bounds.x + tile_offset_x,
                        read_bounds.y + tile_offset_y,
                        tile_width,
                        tile_height,
                    ),
                    chunk: None,
                };
                let data = source.read_tile(&request)?;

                let translate_x = uncompressed_translate_offset(
                    tile_column,
                    column_tile_count,
                    level_translate_width,
                    level_tile_width,
                    level_image_width,
                )?;

                let tile = TileImage::new(
                    level,
                    level_offset.0 + translate_x,
                    level_offset.1 + translate_y,
                    data,
                )?;
                tile.validate_size(level_tile_width, level_tile_height)?;

                log::trace!(
                    "Tile ({}, {}) {} -> level {} at ({:.3}, {:.3})",
                    tile_row,
                    tile_column,
                    request.region,
                    level,
                    tile.translate_x(),
                    tile.translate_y()
                );
                disposer.register_for_disposal(tile);
                built += 1;

                if is_last_row && is_last_column {
                    level_total_translate = (
                        translate_x + level_tile_width as f64,
                        translate_y + level_tile_height as f64,
                    );
                }
            }
        }

        if !ends_on_extent(level_image_width, level_total_translate.0) {
            return Err(MosaicError::Geometry(format!(
                "Invalid translate width: levelImageWidth={}, totalTranslateWidth={}, level={}",
                level_image_width, level_total_translate.0, level
            )));
        }
        if !ends_on_extent(level_image_height, level_total_translate.1) {
            return Err(MosaicError::Geometry(format!(
                "Invalid translate height: levelImageHeight={}, totalTranslateHeight={}, level={}",
                level_image_height, level_total_translate.1, level
            )));
        }

        log::debug!(
            "Built {} uncompressed tiles ({}x{}) for {} on level {}",
            built,
            column_tile_count,
            row_tile_count,
            read_bounds,
            level
        );
        Ok(built)
    }
}

/// Part of one storage chunk covered by a read window, along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSegment {
    /// Chunk index along the axis
    pub chunk_index: usize,
    /// Offset of the segment inside the chunk
    pub offset_in_chunk: usize,
    /// Offset of the segment in source coordinates
    pub source_offset: usize,
    pub size: usize,
}

/// Index of the last chunk touched by `[read_offset, read_offset + read_size)`.
///
/// A window ending exactly on a chunk boundary does not touch the next chunk.
pub fn chunk_end_index(read_offset: usize, read_size: usize, chunk_size: usize) -> usize {
    let read_end = read_offset + read_size;
    let mut end_index = read_end / chunk_size;
    if read_end % chunk_size == 0 && end_index > 0 {
        end_index -= 1;
    }
    end_index
}

/// Chunk-aligned segments of a read window along one axis.
///
/// First and last segments may be partial; interior segments span whole chunks.
pub fn chunk_segments(
    read_offset: usize,
    read_size: usize,
    chunk_size: usize,
) -> MosaicResult<Vec<ChunkSegment>> {
    if read_size == 0 || chunk_size == 0 {
        return Err(MosaicError::Geometry(format!(
            "Invalid read size {} or chunk size {}",
            read_size, chunk_size
        )));
    }

    let read_end = read_offset + read_size;
    let start_index = read_offset / chunk_size;
    let end_index = chunk_end_index(read_offset, read_size, chunk_size);

    let mut segments = Vec::with_capacity(end_index - start_index + 1);
    let mut current = read_offset;
    for chunk_index in start_index..=end_index {
        let size = if chunk_index == end_index {
            read_end - current
        } else {
            (chunk_index + 1) * chunk_size - current
        };

        let offset_in_chunk = current.checked_sub(chunk_index * chunk_size).ok_or_else(|| {
            MosaicError::Geometry(format!(
                "The segment offset {} lies before chunk {} (chunk size {})",
                current, chunk_index, chunk_size
            ))
        })?;

        segments.push(ChunkSegment {
            chunk_index,
            offset_in_chunk,
            source_offset: current,
            size,
        });
        current += size;
    }

    Ok(segments)
}

/// Tiles aligned to the source's storage chunks.
///
/// Each tile covers only the part of its chunk inside the read window, so a
/// decoder never has to produce more of a chunk than the window needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedTileBuilder {
    chunk_width: usize,
    chunk_height: usize,
}

impl ChunkedTileBuilder {
    pub fn new(chunk_width: usize, chunk_height: usize) -> MosaicResult<Self> {
        if chunk_width == 0 || chunk_height == 0 {
            return Err(MosaicError::Geometry(format!(
                "Invalid chunk size {}x{}",
                chunk_width, chunk_height
            )));
        }
        Ok(Self {
            chunk_width,
            chunk_height,
        })
    }

    pub fn chunk_width(&self) -> usize {
        self.chunk_width
    }

    pub fn chunk_height(&self) -> usize {
        self.chunk_height
    }
}

impl TileBuilder for ChunkedTileBuilder {
    fn build_tiles<P: PixelSource>(
        &self,
        level: usize,
        read_bounds: &Rectangle,
        level_offset: (f64, f64),
        source: &P,
        disposer: &mut TileImageDisposer<P::Sample>,
    ) -> MosaicResult<usize> {
        check_within_source(read_bounds, source)?;

        let column_segments = chunk_segments(read_bounds.x, read_bounds.width, self.chunk_width)?;
        let row_segments = chunk_segments(read_bounds.y, read_bounds.height, self.chunk_height)?;
        let chunks_per_row = tile_count(source.raster_width(), self.chunk_width);

        let level_total_width = level_size_f64(read_bounds.width, level);
        let level_total_height = level_size_f64(read_bounds.height, level);

        let mut level_translate_y = 0.0f64;
        let mut built = 0;
        for row in &row_segments {
            let level_tile_height = level_size(row.size, level);

            let mut level_translate_x = 0.0f64;
            for column in &column_segments {
                let level_tile_width = level_size(column.size, level);

                let chunk = ChunkLocation {
                    column: column.chunk_index,
                    row: row.chunk_index,
                    index: column.chunk_index + row.chunk_index * chunks_per_row,
                    chunk_width: self.chunk_width,
                    chunk_height: self.chunk_height,
                    offset_x: column.offset_in_chunk,
                    offset_y: row.offset_in_chunk,
                };
                let request = TileRequest {
                    level,
                    region: Rectangle::new(column.source_offset, row.source_offset, column.size, row.size),
                    chunk: Some(chunk),
                };
                let data = source.read_tile(&request)?;

                let tile = TileImage::new(
                    level,
                    level_offset.0 + level_translate_x,
                    level_offset.1 + level_translate_y,
                    data,
                )?;
                tile.validate_size(level_tile_width, level_tile_height)?;

                log::trace!(
                    "Chunk {} ({}, {}) {} -> level {} at ({:.3}, {:.3})",
                    chunk.index,
                    chunk.row,
                    chunk.column,
                    request.region,
                    level,
                    tile.translate_x(),
                    tile.translate_y()
                );
                disposer.register_for_disposal(tile);
                built += 1;

                level_translate_x += level_size_f64(column.size, level);
            }

            if !same_extent(level_total_width, level_translate_x) {
                return Err(MosaicError::Geometry(format!(
                    "Invalid translate width: levelTotalWidth={}, levelTranslateX={}, level={}",
                    level_total_width, level_translate_x, level
                )));
            }
            level_translate_y += level_size_f64(row.size, level);
        }

        if !same_extent(level_total_height, level_translate_y) {
            return Err(MosaicError::Geometry(format!(
                "Invalid translate height: levelTotalHeight={}, levelTranslateY={}, level={}",
                level_total_height, level_translate_y, level
            )));
        }

        log::debug!(
            "Built {} chunk-aligned tiles ({}x{} chunks) for {} on level {}",
            built,
            column_segments.len(),
            row_segments.len(),
            read_bounds,
            level
        );
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::pixel_source::{ArrayPixelSource, ChunkedArraySource};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn ramp(width: usize, height: usize) -> Array2<u32> {
        Array2::from_shape_fn((height, width), |(r, c)| (r * 1000 + c) as u32)
    }

    #[test]
    fn test_uncompressed_splits_with_remainder() {
        let source = ArrayPixelSource::new(ramp(257, 120));
        let builder = UncompressedTileBuilder::new(100, 100).unwrap();
        let mut disposer = TileImageDisposer::new();

        let read_bounds = Rectangle::new(0, 0, 257, 120);
        let built = builder
            .build_tiles(0, &read_bounds, (0.0, 0.0), &source, &mut disposer)
            .unwrap();

        assert_eq!(built, 6);
        let first_row: Vec<_> = disposer.tiles().iter().take(3).collect();
        let widths: Vec<usize> = first_row.iter().map(|tile| tile.width()).collect();
        assert_eq!(widths, vec![100, 100, 57]);
        assert_eq!(widths.iter().sum::<usize>(), 257);
        assert_eq!(first_row[2].placement(), (200, 0));
        assert_eq!(disposer.tiles()[3].height(), 20);
        assert_eq!(disposer.tiles()[5].data()[[0, 0]], ramp(257, 120)[[100, 200]]);
    }

    #[test]
    fn test_uncompressed_pulls_back_last_tile() {
        let source = ArrayPixelSource::new(ramp(257, 10));
        let builder = UncompressedTileBuilder::new(100, 10).unwrap();
        let mut disposer = TileImageDisposer::new();

        builder
            .build_tiles(1, &Rectangle::new(0, 0, 257, 10), (0.0, 0.0), &source, &mut disposer)
            .unwrap();

        let tiles = disposer.tiles();
        assert_eq!(tiles.len(), 3);
        assert_eq!(tiles[2].width(), 29);
        assert_relative_eq!(tiles[1].translate_x(), 50.0);
        assert_relative_eq!(tiles[2].translate_x(), 99.5);
    }

    #[test]
    fn test_uncompressed_pulls_back_penultimate_tile() {
        let source = ArrayPixelSource::new(ramp(201, 8));
        let builder = UncompressedTileBuilder::new(100, 8).unwrap();
        let mut disposer = TileImageDisposer::new();

        builder
            .build_tiles(3, &Rectangle::new(0, 0, 201, 8), (0.0, 0.0), &source, &mut disposer)
            .unwrap();

        let tiles = disposer.tiles();
        assert_relative_eq!(tiles[1].translate_x(), 25.125 - 13.0);
        assert_relative_eq!(tiles[2].translate_x(), 25.125 - 1.0);
    }

    #[test]
    fn test_translate_offset_overflow_is_fatal() {
        assert_eq!(uncompressed_translate_offset(0, 5, 0.5, 1, 2.5).unwrap(), 0.0);
        // Overshoot on the second of five tiles
        assert!(matches!(
            uncompressed_translate_offset(1, 5, 0.5, 1, 1.0),
            Err(MosaicError::Geometry(_))
        ));
        assert!(uncompressed_translate_offset(4, 5, 10.0, 12, 45.0).is_ok());
        assert_eq!(uncompressed_translate_offset(0, 1, 10.0, 12, 5.0).unwrap(), 0.0);
    }

    #[test]
    fn test_translate_offset_tile_wider_than_total() {
        // 101 pixels as tiles of 100 + 1 on level 3: the first tile is 13 wide, the total 12.625
        assert_eq!(uncompressed_translate_offset(0, 2, 12.5, 13, 12.625).unwrap(), 0.0);
        assert_relative_eq!(uncompressed_translate_offset(1, 2, 12.5, 1, 12.625).unwrap(), 11.625);
    }

    #[test]
    fn test_uncompressed_window_just_over_one_tile() {
        let source = ArrayPixelSource::new(ramp(300, 20));
        let builder = UncompressedTileBuilder::new(100, 20).unwrap();
        let read_bounds = Rectangle::new(199, 0, 101, 20);

        for level in 0..8 {
            let mut disposer = TileImageDisposer::new();
            let built = builder
                .build_tiles(level, &read_bounds, (0.0, 0.0), &source, &mut disposer)
                .unwrap();
            assert_eq!(built, 2);

            let tiles = disposer.tiles();
            assert_eq!(tiles[0].data()[[0, 0]], ramp(300, 20)[[0, 199]]);
            assert_eq!(tiles[1].data()[[0, 0]], ramp(300, 20)[[0, 299]]);
            let end = tiles
                .iter()
                .map(|tile| tile.placement().0 + tile.width())
                .max()
                .unwrap();
            assert!(end <= level_size(101, level), "level {} ends at {}", level, end);
        }
    }

    #[test]
    fn test_chunk_segments() {
        let segments = chunk_segments(10, 240, 100).unwrap();
        let indices: Vec<usize> = segments.iter().map(|s| s.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(segments[0].offset_in_chunk, 10);
        assert_eq!(segments[0].size, 90);
        assert_eq!(segments[1].size, 100);
        assert_eq!(segments[2].size, 50);

        // Ends on a chunk boundary: chunk 2 is not touched
        let segments = chunk_segments(10, 190, 100).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].size, 100);

        // Smaller than a chunk but straddling a boundary
        let segments = chunk_segments(95, 10, 100).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!((segments[0].size, segments[1].size), (5, 5));
        assert_eq!(segments[1].offset_in_chunk, 0);

        assert_eq!(chunk_end_index(0, 100, 100), 0);
        assert_eq!(chunk_end_index(0, 101, 100), 1);
    }

    #[test]
    fn test_chunked_builder_reads_partial_chunks() {
        let source = ChunkedArraySource::new(ramp(300, 300), 100, 100).unwrap();
        let builder = ChunkedTileBuilder::new(100, 100).unwrap();
        let mut disposer = TileImageDisposer::new();

        let read_bounds = Rectangle::new(10, 20, 240, 60);
        let built = builder
            .build_tiles(0, &read_bounds, (0.0, 0.0), &source, &mut disposer)
            .unwrap();

        assert_eq!(built, 3);
        assert_eq!(source.chunk_reads(), 3);
        assert_eq!(source.decoded_samples(), read_bounds.area());

        let tiles = disposer.tiles();
        assert_eq!((tiles[0].width(), tiles[0].height()), (90, 60));
        assert_eq!(tiles[0].data()[[0, 0]], ramp(300, 300)[[20, 10]]);
        assert_eq!(tiles[1].placement(), (90, 0));
        assert_eq!(tiles[2].placement(), (190, 0));
    }

    #[test]
    fn test_chunked_builder_level_translation() {
        let source = ChunkedArraySource::new(ramp(300, 300), 100, 100).unwrap();
        let builder = ChunkedTileBuilder::new(100, 100).unwrap();
        let mut disposer = TileImageDisposer::new();

        builder
            .build_tiles(1, &Rectangle::new(10, 10, 240, 190), (3.5, 0.0), &source, &mut disposer)
            .unwrap();

        let tiles = disposer.tiles();
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles[0].width(), 45);
        assert_relative_eq!(tiles[1].translate_x(), 3.5 + 45.0);
        assert_relative_eq!(tiles[2].translate_x(), 3.5 + 95.0);
        assert_eq!(tiles[2].width(), 25);
        assert_relative_eq!(tiles[3].translate_y(), 45.0);
    }

    #[test]
    fn test_builders_reject_bounds_outside_source() {
        let source = ArrayPixelSource::new(ramp(50, 50));
        let mut disposer = TileImageDisposer::new();
        let builder = UncompressedTileBuilder::new(16, 16).unwrap();

        let result = builder.build_tiles(0, &Rectangle::new(40, 0, 20, 10), (0.0, 0.0), &source, &mut disposer);
        assert!(matches!(result, Err(MosaicError::Geometry(_))));
        assert!(disposer.is_empty());
    }
}
