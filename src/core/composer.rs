use crate::core::tile::TileImage;
use crate::types::{MosaicError, MosaicResult, Raster, Sample};
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};

/// Decides which tile samples take part in the overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionPolicy {
    /// Give every tile a full-coverage region of interest: all samples are valid
    pub source_roi: bool,
    /// Without a region of interest, samples below this value are skipped
    pub source_threshold: Option<f64>,
    /// Value for composed pixels no valid sample covers
    pub background: f64,
}

impl Default for CompositionPolicy {
    fn default() -> Self {
        Self {
            source_roi: true,
            source_threshold: None,
            background: 0.0,
        }
    }
}

impl CompositionPolicy {
    fn is_valid<T: Sample>(&self, value: T) -> bool {
        if self.source_roi {
            return true;
        }
        match self.source_threshold {
            None => true,
            Some(threshold) => value.as_f64().map_or(false, |v| v >= threshold),
        }
    }
}

/// Overlays placed tiles into the raster of one pyramid level
#[derive(Debug, Clone, Default)]
pub struct MosaicComposer {
    policy: CompositionPolicy,
}

impl MosaicComposer {
    pub fn new(policy: CompositionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CompositionPolicy {
        &self.policy
    }

    /// Compose `tiles` into a raster of exactly `level_width` x `level_height`.
    ///
    /// Tiles are overlaid in order, so where they overlap the last valid sample
    /// wins. When the tiles end short of the level size (rounding on coarse
    /// levels) the result is padded on the right and bottom by repeating the
    /// edge pixels. Tiles reaching past the level size are an error.
    pub fn compose<T: Sample>(
        &self,
        level: usize,
        tiles: &[TileImage<T>],
        level_width: usize,
        level_height: usize,
    ) -> MosaicResult<Raster<T>> {
        if tiles.is_empty() {
            return Err(MosaicError::EmptyMosaic { level });
        }

        let (mosaic_width, mosaic_height) = tiles.iter().fold((0, 0), |(w, h), tile| {
            let (x, y) = tile.placement();
            (w.max(x + tile.width()), h.max(y + tile.height()))
        });

        if mosaic_width > level_width {
            return Err(MosaicError::Geometry(format!(
                "The mosaic width {} > than the image width {} on level {}",
                mosaic_width, level_width, level
            )));
        }
        if mosaic_height > level_height {
            return Err(MosaicError::Geometry(format!(
                "The mosaic height {} > than the image height {} on level {}",
                mosaic_height, level_height, level
            )));
        }

        let background = T::from_f64_lossy(self.policy.background);
        let mut mosaic = Array2::from_elem((mosaic_height, mosaic_width), background);

        for tile in tiles {
            let (x, y) = tile.placement();
            let mut target = mosaic.slice_mut(s![y..y + tile.height(), x..x + tile.width()]);
            if self.policy.source_roi || self.policy.source_threshold.is_none() {
                target.assign(tile.data());
            } else {
                Zip::from(&mut target).and(tile.data()).for_each(|dst, &src| {
                    if self.policy.is_valid(src) {
                        *dst = src;
                    }
                });
            }
        }

        if mosaic_width < level_width || mosaic_height < level_height {
            let right_pad = level_width - mosaic_width;
            let bottom_pad = level_height - mosaic_height;
            if right_pad > 1 || bottom_pad > 1 {
                log::warn!(
                    "Padding level {} mosaic by {} columns and {} rows",
                    level,
                    right_pad,
                    bottom_pad
                );
            } else {
                log::debug!(
                    "Padding level {} mosaic by {} columns and {} rows",
                    level,
                    right_pad,
                    bottom_pad
                );
            }
            mosaic = extend_border(&mosaic, level_width, level_height);
        }

        Ok(mosaic)
    }
}

/// Grow `raster` to `width` x `height` by copying its last column and row
pub fn extend_border<T: Sample>(raster: &Raster<T>, width: usize, height: usize) -> Raster<T> {
    let (rows, cols) = raster.dim();
    if rows == 0 || cols == 0 {
        return Array2::default((height, width));
    }
    Array2::from_shape_fn((height, width), |(r, c)| {
        raster[[r.min(rows - 1), c.min(cols - 1)]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(value: u8, x: f64, y: f64, width: usize, height: usize) -> TileImage<u8> {
        TileImage::new(0, x, y, Array2::from_elem((height, width), value)).unwrap()
    }

    #[test]
    fn test_empty_mosaic() {
        let composer = MosaicComposer::default();
        let tiles: Vec<TileImage<u8>> = Vec::new();
        assert!(matches!(
            composer.compose(2, &tiles, 10, 10),
            Err(MosaicError::EmptyMosaic { level: 2 })
        ));
    }

    #[test]
    fn test_last_tile_wins() {
        let composer = MosaicComposer::default();
        let tiles = vec![tile(1, 0.0, 0.0, 4, 4), tile(2, 2.0, 0.0, 4, 4)];

        let mosaic = composer.compose(0, &tiles, 6, 4).unwrap();
        assert_eq!(mosaic.dim(), (4, 6));
        assert_eq!(mosaic[[0, 1]], 1);
        assert_eq!(mosaic[[0, 2]], 2);
        assert_eq!(mosaic[[3, 5]], 2);
    }

    #[test]
    fn test_threshold_skips_low_samples() {
        let composer = MosaicComposer::new(CompositionPolicy {
            source_roi: false,
            source_threshold: Some(1.0),
            background: 9.0,
        });
        let tiles = vec![tile(5, 0.0, 0.0, 2, 2), tile(0, 0.0, 0.0, 2, 2), tile(7, 3.0, 0.0, 1, 2)];

        let mosaic = composer.compose(0, &tiles, 4, 2).unwrap();
        // Zero samples are below the threshold, the first tile survives
        assert_eq!(mosaic[[0, 0]], 5);
        // Gap between tiles keeps the background
        assert_eq!(mosaic[[0, 2]], 9);
        assert_eq!(mosaic[[1, 3]], 7);
    }

    #[test]
    fn test_pads_by_edge_replication() {
        let composer = MosaicComposer::default();
        let mut data = Array2::zeros((2, 2));
        data[[0, 1]] = 3u8;
        data[[1, 0]] = 4;
        data[[1, 1]] = 5;
        let tiles = vec![TileImage::new(0, 0.0, 0.0, data).unwrap()];

        let mosaic = composer.compose(0, &tiles, 4, 3).unwrap();
        assert_eq!(mosaic.dim(), (3, 4));
        assert_eq!(mosaic[[0, 3]], 3);
        assert_eq!(mosaic[[2, 0]], 4);
        assert_eq!(mosaic[[2, 3]], 5);
    }

    #[test]
    fn test_oversized_mosaic_is_rejected() {
        let composer = MosaicComposer::default();
        let tiles = vec![tile(1, 0.0, 0.0, 4, 4), tile(1, 2.5, 0.0, 3, 4)];

        // Second tile snaps to x=2 and ends at 5
        assert!(composer.compose(0, &tiles, 5, 4).is_ok());
        assert!(matches!(
            composer.compose(0, &tiles, 4, 4),
            Err(MosaicError::Geometry(_))
        ));
        assert!(matches!(
            composer.compose(0, &tiles, 5, 3),
            Err(MosaicError::Geometry(_))
        ));
    }
}
