use crate::types::{MosaicError, MosaicResult, Raster, Sample};

/// A raster built for one pyramid level, placed at a translation in level space
#[derive(Debug, Clone)]
pub struct TileImage<T> {
    level: usize,
    translate_x: f64,
    translate_y: f64,
    data: Raster<T>,
}

impl<T: Sample> TileImage<T> {
    pub fn new(level: usize, translate_x: f64, translate_y: f64, data: Raster<T>) -> MosaicResult<Self> {
        if !(translate_x >= 0.0 && translate_y >= 0.0) {
            return Err(MosaicError::Geometry(format!(
                "Tile translation ({}, {}) is negative on level {}",
                translate_x, translate_y, level
            )));
        }
        if data.is_empty() {
            return Err(MosaicError::Geometry(format!(
                "Tile raster is empty on level {}",
                level
            )));
        }

        Ok(Self {
            level,
            translate_x,
            translate_y,
            data,
        })
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn translate_x(&self) -> f64 {
        self.translate_x
    }

    pub fn translate_y(&self) -> f64 {
        self.translate_y
    }

    /// Integer placement of the tile's top-left pixel in the composed raster.
    ///
    /// Fractional translations are snapped down; with level sizes rounded up this
    /// keeps `placement + size` within the rounded-up level total.
    pub fn placement(&self) -> (usize, usize) {
        (self.translate_x.floor() as usize, self.translate_y.floor() as usize)
    }

    pub fn data(&self) -> &Raster<T> {
        &self.data
    }

    /// Size of the backing buffer in bytes
    pub fn byte_size(&self) -> usize {
        self.data.len() * T::DATA_TYPE.size_bytes()
    }

    /// Fails when the tile does not have the expected level-scaled size
    pub fn validate_size(&self, expected_width: usize, expected_height: usize) -> MosaicResult<()> {
        if self.width() != expected_width {
            return Err(MosaicError::Geometry(format!(
                "The image tile width {} is different than the level tile width {} on level {}",
                self.width(),
                expected_width,
                self.level
            )));
        }
        if self.height() != expected_height {
            return Err(MosaicError::Geometry(format!(
                "The image tile height {} is different than the level tile height {} on level {}",
                self.height(),
                expected_height,
                self.level
            )));
        }
        Ok(())
    }
}

/// Ownership registry for the tiles built by one multi-level source.
///
/// Tiles are moved in when registered and are only released through
/// [`TileImageDisposer::dispose_all`] (or when the registry is dropped).
#[derive(Debug)]
pub struct TileImageDisposer<T> {
    tiles: Vec<TileImage<T>>,
}

impl<T: Sample> TileImageDisposer<T> {
    pub fn new() -> Self {
        Self { tiles: Vec::new() }
    }

    /// Take ownership of a tile; returns its registry index
    pub fn register_for_disposal(&mut self, tile: TileImage<T>) -> usize {
        self.tiles.push(tile);
        self.tiles.len() - 1
    }

    /// Release every registered tile, newest first. Returns the number released.
    pub fn dispose_all(&mut self) -> usize {
        self.dispose_from(0)
    }

    /// Release the tiles registered at or after `start`, newest first
    pub fn dispose_from(&mut self, start: usize) -> usize {
        let mut released = 0;
        while self.tiles.len() > start {
            if let Some(tile) = self.tiles.pop() {
                drop(tile);
                released += 1;
            }
        }
        if released > 0 {
            log::debug!("Disposed {} tile images", released);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles registered at or after `start`, in registration order
    pub fn tiles_since(&self, start: usize) -> &[TileImage<T>] {
        &self.tiles[start.min(self.tiles.len())..]
    }

    pub fn tiles(&self) -> &[TileImage<T>] {
        &self.tiles
    }

    /// Total size of all registered buffers in bytes
    pub fn registered_bytes(&self) -> usize {
        self.tiles.iter().map(TileImage::byte_size).sum()
    }
}

impl<T: Sample> Default for TileImageDisposer<T> {
    fn default() -> Self {
        Self::new()
    }
}
