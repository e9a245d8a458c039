use crate::types::{GeoTransform, MosaicError, MosaicResult, Rectangle};
use serde::{Deserialize, Serialize};

/// Levels are added while a level still holds at least this many pixels
pub const DEFAULT_MAX_LEVEL_PIXEL_COUNT: f64 = 256.0 * 256.0;

/// Number of samples at `level` covering `size` samples at level 0.
///
/// Power-of-two halving with the remainder rounded up, so
/// `level_size(n, 0) == n` and every non-empty extent keeps at least one sample.
pub fn level_size(size: usize, level: usize) -> usize {
    if level >= usize::BITS as usize {
        return usize::from(size > 0);
    }
    let mask = (1usize << level) - 1;
    (size >> level) + usize::from(size & mask != 0)
}

/// Fractional level size, used to accumulate translations without drift
pub fn level_size_f64(size: usize, level: usize) -> f64 {
    size as f64 / level_scale(level)
}

/// Level position of a level-0 offset (rounded down)
pub fn level_offset(offset: usize, level: usize) -> usize {
    if level >= usize::BITS as usize {
        return 0;
    }
    offset >> level
}

/// Fractional level position of a level-0 offset
pub fn level_offset_f64(offset: usize, level: usize) -> f64 {
    offset as f64 / level_scale(level)
}

/// Number of level-0 samples covered by one sample at `level`
pub fn level_scale(level: usize) -> f64 {
    2f64.powi(level.min(i32::MAX as usize) as i32)
}

/// Number of tiles of `tile_size` needed to cover `size` samples
pub fn tile_count(size: usize, tile_size: usize) -> usize {
    if tile_size == 0 {
        return 0;
    }
    size.div_ceil(tile_size)
}

/// Pyramid description of one logical raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiLevelModel {
    level_count: usize,
    image_to_model: GeoTransform,
    width: usize,
    height: usize,
}

impl MultiLevelModel {
    pub fn new(
        level_count: usize,
        image_to_model: GeoTransform,
        width: usize,
        height: usize,
    ) -> MosaicResult<Self> {
        if level_count == 0 {
            return Err(MosaicError::Geometry(
                "A multi-level model needs at least one level".to_string(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(MosaicError::Geometry(format!(
                "Invalid model size {}x{}",
                width, height
            )));
        }
        let max_level_count = Self::max_level_count(width, height);
        if level_count > max_level_count {
            return Err(MosaicError::Geometry(format!(
                "Level count {} exceeds {} levels for a {}x{} model",
                level_count, max_level_count, width, height
            )));
        }

        Ok(Self {
            level_count,
            image_to_model,
            width,
            height,
        })
    }

    /// Model for a read region, with the level count derived from its size
    pub fn for_bounds(bounds: &Rectangle, image_to_model: GeoTransform) -> MosaicResult<Self> {
        bounds.validate_read_bounds()?;
        Self::new(
            Self::level_count_for(bounds.width, bounds.height),
            image_to_model,
            bounds.width,
            bounds.height,
        )
    }

    /// Levels needed until a level drops below [`DEFAULT_MAX_LEVEL_PIXEL_COUNT`] pixels
    pub fn level_count_for(width: usize, height: usize) -> usize {
        let mut level_count = 1;
        let mut scale = 1.0f64;
        while (width as f64 * scale) * (height as f64 * scale) >= DEFAULT_MAX_LEVEL_PIXEL_COUNT {
            level_count += 1;
            scale /= 2.0;
        }
        level_count
    }

    /// Levels until both sides are down to a single pixel
    pub fn max_level_count(width: usize, height: usize) -> usize {
        let longest = width.max(height).max(1);
        (usize::BITS - (longest - 1).leading_zeros()) as usize + 1
    }

    pub fn level_count(&self) -> usize {
        self.level_count
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn image_to_model(&self) -> &GeoTransform {
        &self.image_to_model
    }

    pub fn level_width(&self, level: usize) -> usize {
        level_size(self.width, level)
    }

    pub fn level_height(&self, level: usize) -> usize {
        level_size(self.height, level)
    }

    /// Image-to-model transform for the given level
    pub fn level_image_to_model(&self, level: usize) -> MosaicResult<GeoTransform> {
        self.check_level(level)?;
        Ok(self.image_to_model.scaled(level_scale(level)))
    }

    pub fn check_level(&self, level: usize) -> MosaicResult<()> {
        if level >= self.level_count {
            return Err(MosaicError::Geometry(format!(
                "Level {} is outside the pyramid (level count {})",
                level, self.level_count
            )));
        }
        Ok(())
    }
}
