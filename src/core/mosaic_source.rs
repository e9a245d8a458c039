use crate::core::composer::{CompositionPolicy, MosaicComposer};
use crate::core::level::{level_offset_f64, level_size, MultiLevelModel};
use crate::core::matrix::{MatrixCell, MosaicMatrix};
use crate::core::tile::TileImageDisposer;
use crate::core::tile_builder::TileBuilder;
use crate::io::pixel_source::PixelSource;
use crate::types::{GeoTransform, MosaicError, MosaicResult, Raster, Rectangle, Sample};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Settings shared by every multi-level mosaic source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicSourceConfig {
    /// Fixed number of pyramid levels; derived from the read bounds when unset
    pub level_count: Option<usize>,
    /// Keep built tiles registered until `reset()`; otherwise release them after each build
    pub retain_tiles: bool,
    /// Overlay rules used when composing tiles
    pub composition: CompositionPolicy,
}

impl Default for MosaicSourceConfig {
    fn default() -> Self {
        Self {
            level_count: None,
            retain_tiles: true,
            composition: CompositionPolicy::default(),
        }
    }
}

/// A logical raster that renders pyramid levels on demand
pub trait TileSource {
    type Sample: Sample;

    fn model(&self) -> &MultiLevelModel;

    /// Build and compose the raster for `level`.
    ///
    /// Returns `Ok(None)` when nothing inside the read bounds has data.
    ///
    /// Every call builds a fresh batch of tiles. With `retain_tiles` set, each
    /// batch stays registered until `reset()`, so repeated requests for a level
    /// should go through [`TileSource::get_image`].
    fn create_image(&self, level: usize) -> MosaicResult<Option<Raster<Self::Sample>>>;

    /// Cached variant of [`TileSource::create_image`], cleared by `reset()`
    fn get_image(&self, level: usize) -> MosaicResult<Option<Arc<Raster<Self::Sample>>>>;

    /// Release every tile and cached level. Safe to call at any time.
    fn reset(&self);

    /// Tiles currently owned by this source
    fn registered_tile_count(&self) -> usize;
}

#[derive(Debug)]
struct BuildState<T> {
    disposer: TileImageDisposer<T>,
    level_images: Vec<Option<Arc<Raster<T>>>>,
}

/// Shared machinery of the mosaic sources: pyramid model, tile builder strategy,
/// composer, and the lock-guarded tile registry.
///
/// Builds and resets both take the state lock for their whole duration, so a
/// reset never observes a half-built level.
#[derive(Debug)]
pub struct MosaicEngine<T, B> {
    read_bounds: Rectangle,
    model: MultiLevelModel,
    builder: B,
    composer: MosaicComposer,
    retain_tiles: bool,
    state: Mutex<BuildState<T>>,
}

impl<T: Sample, B: TileBuilder> MosaicEngine<T, B> {
    pub fn new(
        read_bounds: Rectangle,
        builder: B,
        image_to_model: GeoTransform,
        config: MosaicSourceConfig,
    ) -> MosaicResult<Self> {
        read_bounds.validate_read_bounds()?;
        let model = match config.level_count {
            Some(level_count) => {
                MultiLevelModel::new(level_count, image_to_model, read_bounds.width, read_bounds.height)?
            }
            None => MultiLevelModel::for_bounds(&read_bounds, image_to_model)?,
        };

        log::info!(
            "Mosaic source over {} with {} levels",
            read_bounds,
            model.level_count()
        );

        let level_images = vec![None; model.level_count()];
        Ok(Self {
            read_bounds,
            model,
            builder,
            composer: MosaicComposer::new(config.composition),
            retain_tiles: config.retain_tiles,
            state: Mutex::new(BuildState {
                disposer: TileImageDisposer::new(),
                level_images,
            }),
        })
    }

    pub fn read_bounds(&self) -> &Rectangle {
        &self.read_bounds
    }

    pub fn model(&self) -> &MultiLevelModel {
        &self.model
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    fn lock_state(&self) -> MutexGuard<'_, BuildState<T>> {
        // A poisoned lock still guards a valid registry
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `build` under the state lock and compose whatever tiles it registered.
    ///
    /// `build` receives the builder strategy and the tile registry; returning
    /// without registering tiles yields `Ok(None)`.
    pub fn build_level<F>(&self, level: usize, build: F) -> MosaicResult<Option<Raster<T>>>
    where
        F: FnOnce(&B, &mut TileImageDisposer<T>) -> MosaicResult<()>,
    {
        let mut state = self.lock_state();
        self.build_level_locked(&mut state, level, build)
    }

    /// Cached [`MosaicEngine::build_level`]
    pub fn cached_level<F>(&self, level: usize, build: F) -> MosaicResult<Option<Arc<Raster<T>>>>
    where
        F: FnOnce(&B, &mut TileImageDisposer<T>) -> MosaicResult<()>,
    {
        self.model.check_level(level)?;
        let mut state = self.lock_state();
        if let Some(image) = state.level_images[level].as_ref() {
            return Ok(Some(Arc::clone(image)));
        }

        let image = self.build_level_locked(&mut state, level, build)?.map(Arc::new);
        if let Some(image) = image.as_ref() {
            state.level_images[level] = Some(Arc::clone(image));
        }
        Ok(image)
    }

    fn build_level_locked<F>(
        &self,
        state: &mut BuildState<T>,
        level: usize,
        build: F,
    ) -> MosaicResult<Option<Raster<T>>>
    where
        F: FnOnce(&B, &mut TileImageDisposer<T>) -> MosaicResult<()>,
    {
        self.model.check_level(level)?;

        let start = state.disposer.len();
        if let Err(err) = build(&self.builder, &mut state.disposer) {
            state.disposer.dispose_from(start);
            return Err(err);
        }

        let tiles = state.disposer.tiles_since(start);
        if tiles.is_empty() {
            log::debug!("No tiles intersect {} on level {}", self.read_bounds, level);
            return Ok(None);
        }

        let level_width = level_size(self.read_bounds.width, level);
        let level_height = level_size(self.read_bounds.height, level);
        let tile_count = tiles.len();
        let composed = self.composer.compose(level, tiles, level_width, level_height);

        if !self.retain_tiles || composed.is_err() {
            state.disposer.dispose_from(start);
        }
        let mosaic = composed?;

        log::debug!(
            "Composed level {} ({}x{}) from {} tiles, {} tiles / {} bytes registered",
            level,
            level_width,
            level_height,
            tile_count,
            state.disposer.len(),
            state.disposer.registered_bytes()
        );
        Ok(Some(mosaic))
    }

    pub fn reset(&self) {
        let mut state = self.lock_state();
        let released = state.disposer.dispose_all();
        for image in state.level_images.iter_mut() {
            *image = None;
        }
        log::info!("Mosaic source reset, released {} tile images", released);
    }

    pub fn registered_tile_count(&self) -> usize {
        self.lock_state().disposer.len()
    }
}

/// Multi-level source over one raster region
#[derive(Debug)]
pub struct MosaicSubsetSource<P: PixelSource, B> {
    source: P,
    engine: MosaicEngine<P::Sample, B>,
}

impl<P: PixelSource, B: TileBuilder> MosaicSubsetSource<P, B> {
    pub fn new(
        source: P,
        read_bounds: Rectangle,
        builder: B,
        image_to_model: GeoTransform,
        config: MosaicSourceConfig,
    ) -> MosaicResult<Self> {
        let raster = Rectangle::new(0, 0, source.raster_width(), source.raster_height());
        if !raster.contains(&read_bounds) {
            return Err(MosaicError::Geometry(format!(
                "Read bounds {} exceed the {}x{} source raster",
                read_bounds, raster.width, raster.height
            )));
        }

        let engine = MosaicEngine::new(read_bounds, builder, image_to_model, config)?;
        Ok(Self { source, engine })
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn engine(&self) -> &MosaicEngine<P::Sample, B> {
        &self.engine
    }

    fn build(
        &self,
        level: usize,
    ) -> impl FnOnce(&B, &mut TileImageDisposer<P::Sample>) -> MosaicResult<()> + '_ {
        move |builder, disposer| {
            builder.build_tiles(
                level,
                self.engine.read_bounds(),
                (0.0, 0.0),
                &self.source,
                disposer,
            )?;
            Ok(())
        }
    }
}

impl<P: PixelSource, B: TileBuilder> TileSource for MosaicSubsetSource<P, B> {
    type Sample = P::Sample;

    fn model(&self) -> &MultiLevelModel {
        self.engine.model()
    }

    fn create_image(&self, level: usize) -> MosaicResult<Option<Raster<P::Sample>>> {
        self.engine.build_level(level, self.build(level))
    }

    fn get_image(&self, level: usize) -> MosaicResult<Option<Arc<Raster<P::Sample>>>> {
        self.engine.cached_level(level, self.build(level))
    }

    fn reset(&self) {
        self.engine.reset();
    }

    fn registered_tile_count(&self) -> usize {
        self.engine.registered_tile_count()
    }
}

/// Multi-level source stitching a matrix of cells into one raster.
///
/// The read bounds are expressed in stitched-raster coordinates. Each cell
/// that intersects them contributes the tiles of its intersecting part.
#[derive(Debug)]
pub struct MatrixMosaicSubsetSource<C: PixelSource, B> {
    matrix: MosaicMatrix<C>,
    engine: MosaicEngine<C::Sample, B>,
}

impl<C, B> MatrixMosaicSubsetSource<C, B>
where
    C: MatrixCell + PixelSource,
    B: TileBuilder,
{
    pub fn new(
        matrix: MosaicMatrix<C>,
        read_bounds: Rectangle,
        builder: B,
        image_to_model: GeoTransform,
        config: MosaicSourceConfig,
    ) -> MosaicResult<Self> {
        matrix.ensure_consistent()?;
        for (row, column, cell) in matrix.iter() {
            if cell.raster_width() < cell.cell_width() || cell.raster_height() < cell.cell_height() {
                return Err(MosaicError::Geometry(format!(
                    "Cell ({}, {}) declares {}x{} but its raster is {}x{}",
                    row,
                    column,
                    cell.cell_width(),
                    cell.cell_height(),
                    cell.raster_width(),
                    cell.raster_height()
                )));
            }
        }

        log::info!(
            "🧩 Matrix mosaic {}x{} cells, total {}x{}",
            matrix.row_count(),
            matrix.column_count(),
            matrix.compute_total_width()?,
            matrix.compute_total_height()?
        );

        let engine = MosaicEngine::new(read_bounds, builder, image_to_model, config)?;
        Ok(Self { matrix, engine })
    }

    pub fn matrix(&self) -> &MosaicMatrix<C> {
        &self.matrix
    }

    pub fn engine(&self) -> &MosaicEngine<C::Sample, B> {
        &self.engine
    }

    fn build(
        &self,
        level: usize,
    ) -> impl FnOnce(&B, &mut TileImageDisposer<C::Sample>) -> MosaicResult<()> + '_ {
        move |builder, disposer| {
            let read_bounds = *self.engine.read_bounds();
            let mut cell_y = 0;
            for row in 0..self.matrix.row_count() {
                let mut cell_x = 0;
                let mut row_height = 0;
                for column in 0..self.matrix.column_count() {
                    let cell = self.matrix.cell_at(row, column).ok_or(MosaicError::IncompleteMatrix {
                        filled: self.matrix.filled(),
                        capacity: self.matrix.capacity(),
                    })?;
                    if column == 0 {
                        row_height = cell.cell_height();
                    }

                    let cell_bounds = Rectangle::new(cell_x, cell_y, cell.cell_width(), cell.cell_height());
                    if let Some(visible) = read_bounds.intersection(&cell_bounds) {
                        let cell_read_bounds = Rectangle::new(
                            visible.x - cell_x,
                            visible.y - cell_y,
                            visible.width,
                            visible.height,
                        );
                        let level_offset = (
                            level_offset_f64(visible.x - read_bounds.x, level),
                            level_offset_f64(visible.y - read_bounds.y, level),
                        );
                        log::trace!(
                            "Cell ({}, {}) contributes {} on level {}",
                            row,
                            column,
                            cell_read_bounds,
                            level
                        );
                        builder.build_tiles(level, &cell_read_bounds, level_offset, cell, disposer)?;
                    }

                    cell_x += cell.cell_width();
                }
                cell_y += row_height;
            }
            Ok(())
        }
    }
}

impl<C, B> TileSource for MatrixMosaicSubsetSource<C, B>
where
    C: MatrixCell + PixelSource,
    B: TileBuilder,
{
    type Sample = C::Sample;

    fn model(&self) -> &MultiLevelModel {
        self.engine.model()
    }

    fn create_image(&self, level: usize) -> MosaicResult<Option<Raster<C::Sample>>> {
        self.engine.build_level(level, self.build(level))
    }

    fn get_image(&self, level: usize) -> MosaicResult<Option<Arc<Raster<C::Sample>>>> {
        self.engine.cached_level(level, self.build(level))
    }

    fn reset(&self) {
        self.engine.reset();
    }

    fn registered_tile_count(&self) -> usize {
        self.engine.registered_tile_count()
    }
}
