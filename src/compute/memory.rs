//! In-memory raster engine
//!
//! Evaluates every capability eagerly on `ndarray` rasters that share a
//! single geographic grid. Used to exercise the flood pipeline offline and
//! in tests; semantics follow the remote engine (masked pixels are excluded
//! from every reduction, division by zero masks the pixel).

use crate::compute::{
    CollectionQuery, Comparison, GeoCompute, KernelShape, ReduceOptions, VisParams,
};
use crate::types::{
    Feature, FeatureCollection, FloodError, FloodResult, Geometry, PassDirection, Polarization,
    RegionOfInterest, TileReference, TimePeriod, EARTH_RADIUS_M, METERS_PER_DEGREE,
};
use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// North-up geographic grid shared by all rasters of an engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterGrid {
    /// Longitude of the western edge (degrees)
    pub west: f64,
    /// Latitude of the northern edge (degrees)
    pub north: f64,
    /// Pixel width (degrees of longitude)
    pub pixel_width: f64,
    /// Pixel height (degrees of latitude, positive)
    pub pixel_height: f64,
    pub rows: usize,
    pub cols: usize,
}

impl RasterGrid {
    /// Smallest grid of the given pixel size covering `region`
    pub fn covering(region: &RegionOfInterest, pixel_width: f64, pixel_height: f64) -> Self {
        // tolerate float noise so exact multiples don't gain a column
        let cols = ((region.xmax() - region.xmin()) / pixel_width - 1e-9).ceil().max(1.0) as usize;
        let rows = ((region.ymax() - region.ymin()) / pixel_height - 1e-9).ceil().max(1.0) as usize;
        Self {
            west: region.xmin(),
            north: region.ymax(),
            pixel_width,
            pixel_height,
            rows,
            cols,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Geographic centre of pixel `(row, col)` as `(lon, lat)`
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.west + (col as f64 + 0.5) * self.pixel_width,
            self.north - (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Spherical area of a pixel in row `row` (square meters)
    pub fn pixel_area_m2(&self, row: usize) -> f64 {
        let top = self.north - row as f64 * self.pixel_height;
        let bottom = top - self.pixel_height;
        EARTH_RADIUS_M
            * EARTH_RADIUS_M
            * self.pixel_width.to_radians()
            * (top.to_radians().sin() - bottom.to_radians().sin()).abs()
    }

    /// Ground pixel spacing `(x, y)` in meters at the grid's central latitude
    pub fn pixel_spacing_m(&self) -> (f64, f64) {
        let center_lat = self.north - self.rows as f64 * self.pixel_height / 2.0;
        (
            self.pixel_width * METERS_PER_DEGREE * center_lat.to_radians().cos(),
            self.pixel_height * METERS_PER_DEGREE,
        )
    }

    /// Rectangle covering columns `col_start..=col_end` of one row
    fn run_ring(&self, row: usize, col_start: usize, col_end: usize) -> Vec<[f64; 2]> {
        let left = self.west + col_start as f64 * self.pixel_width;
        let right = self.west + (col_end + 1) as f64 * self.pixel_width;
        let top = self.north - row as f64 * self.pixel_height;
        let bottom = top - self.pixel_height;
        vec![
            [left, bottom],
            [right, bottom],
            [right, top],
            [left, top],
            [left, bottom],
        ]
    }
}

/// Single-band raster with an explicit validity mask
#[derive(Debug, Clone)]
pub struct Raster {
    pub band: String,
    pub data: Array2<f32>,
    pub valid: Array2<bool>,
}

impl Raster {
    /// Raster whose validity is derived from finiteness of `data`
    pub fn from_data(band: impl Into<String>, data: Array2<f32>) -> Self {
        let valid = data.mapv(|v| v.is_finite());
        Self {
            band: band.into(),
            data,
            valid,
        }
    }

    /// Raster with no valid pixels
    pub fn empty(band: impl Into<String>, dim: (usize, usize)) -> Self {
        Self {
            band: band.into(),
            data: Array2::zeros(dim),
            valid: Array2::from_elem(dim, false),
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Value at `(row, col)` when the pixel is valid
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if self.valid[[row, col]] {
            Some(self.data[[row, col]])
        } else {
            None
        }
    }
}

pub type MemoryImage = Arc<Raster>;

/// One source acquisition of the in-memory catalog
#[derive(Debug, Clone)]
pub struct SceneRecord {
    pub id: String,
    pub instrument_mode: String,
    pub pass_direction: PassDirection,
    pub resolution_meters: u32,
    pub acquired: NaiveDate,
    pub footprint: RegionOfInterest,
    /// Backscatter (dB) per polarization, on the engine grid
    pub bands: HashMap<Polarization, Array2<f32>>,
}

impl SceneRecord {
    /// IW / descending / 10 m scene carrying one polarization band
    pub fn new(
        id: impl Into<String>,
        acquired: NaiveDate,
        footprint: RegionOfInterest,
        polarization: Polarization,
        data: Array2<f32>,
    ) -> Self {
        let mut bands = HashMap::new();
        bands.insert(polarization, data);
        Self {
            id: id.into(),
            instrument_mode: "IW".to_string(),
            pass_direction: PassDirection::Descending,
            resolution_meters: 10,
            acquired,
            footprint,
            bands,
        }
    }

    fn matches(&self, query: &CollectionQuery, region: &RegionOfInterest) -> bool {
        self.instrument_mode == query.instrument_mode
            && self.bands.contains_key(&query.polarization)
            && self.pass_direction == query.pass_direction
            && self.resolution_meters == query.resolution_meters
            && self.footprint.intersects(region)
    }
}

/// Filtered view over the scene catalog
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    scenes: Vec<Arc<SceneRecord>>,
    band: Polarization,
}

impl MemoryCollection {
    pub fn scene_ids(&self) -> Vec<&str> {
        self.scenes.iter().map(|s| s.id.as_str()).collect()
    }
}

/// Eager `GeoCompute` implementation over `ndarray`
pub struct InMemoryCompute {
    grid: RasterGrid,
    scenes: Vec<Arc<SceneRecord>>,
    assets: HashMap<(String, String), Array2<f32>>,
    tile_counter: AtomicUsize,
}

impl InMemoryCompute {
    pub fn new(grid: RasterGrid) -> Self {
        Self {
            grid,
            scenes: Vec::new(),
            assets: HashMap::new(),
            tile_counter: AtomicUsize::new(0),
        }
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    /// Add a scene to the catalog; band arrays must match the grid
    pub fn with_scene(mut self, scene: SceneRecord) -> FloodResult<Self> {
        for (pol, data) in &scene.bands {
            self.check_dim(data.dim(), &format!("scene {} band {}", scene.id, pol))?;
        }
        self.scenes.push(Arc::new(scene));
        Ok(self)
    }

    /// Register a static single-band asset (seasonality, elevation, ...)
    pub fn with_asset(
        mut self,
        asset_id: impl Into<String>,
        band: impl Into<String>,
        data: Array2<f32>,
    ) -> FloodResult<Self> {
        let asset_id = asset_id.into();
        self.check_dim(data.dim(), &asset_id)?;
        self.assets.insert((asset_id, band.into()), data);
        Ok(self)
    }

    fn check_dim(&self, dim: (usize, usize), what: &str) -> FloodResult<()> {
        if dim != self.grid.dim() {
            return Err(FloodError::InvalidParameter(format!(
                "{} has shape {:?}, engine grid is {:?}",
                what,
                dim,
                self.grid.dim()
            )));
        }
        Ok(())
    }

    fn binary_op(
        &self,
        a: &Raster,
        b: &Raster,
        op: impl Fn(f32, f32) -> Option<f32> + Sync,
    ) -> Raster {
        let mut data = Array2::<f32>::zeros(self.grid.dim());
        let mut valid = Array2::<bool>::from_elem(self.grid.dim(), false);
        Zip::from(&mut data)
            .and(&mut valid)
            .and(&a.data)
            .and(&a.valid)
            .and(&b.data)
            .and(&b.valid)
            .par_for_each(|out, ok, &x, &vx, &y, &vy| {
                if vx && vy {
                    if let Some(v) = op(x, y) {
                        *out = v;
                        *ok = true;
                    }
                }
            });
        Raster {
            band: a.band.clone(),
            data,
            valid,
        }
    }

    /// Pixels of `raster` that are valid and whose centre lies in `region`
    fn region_mask(&self, raster: &Raster, region: &RegionOfInterest) -> Array2<bool> {
        let mut inside = raster.valid.clone();
        Zip::indexed(&mut inside).for_each(|(i, j), ok| {
            if *ok {
                let (lon, lat) = self.grid.pixel_center(i, j);
                *ok = region.contains(lon, lat);
            }
        });
        inside
    }
}

/// 8-connected components of equal value among `include`d pixels
fn label_components(data: &Array2<f32>, include: &Array2<bool>) -> Vec<Vec<(usize, usize)>> {
    let (rows, cols) = data.dim();
    let mut visited = Array2::<bool>::from_elem((rows, cols), false);
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for i in 0..rows {
        for j in 0..cols {
            if !include[[i, j]] || visited[[i, j]] {
                continue;
            }
            let value = data[[i, j]];
            let mut component = Vec::new();
            visited[[i, j]] = true;
            queue.push_back((i, j));

            while let Some((ci, cj)) = queue.pop_front() {
                component.push((ci, cj));
                for di in -1i64..=1 {
                    for dj in -1i64..=1 {
                        if di == 0 && dj == 0 {
                            continue;
                        }
                        let ni = ci as i64 + di;
                        let nj = cj as i64 + dj;
                        if ni < 0 || nj < 0 || ni >= rows as i64 || nj >= cols as i64 {
                            continue;
                        }
                        let (ni, nj) = (ni as usize, nj as usize);
                        if include[[ni, nj]] && !visited[[ni, nj]] && data[[ni, nj]] == value {
                            visited[[ni, nj]] = true;
                            queue.push_back((ni, nj));
                        }
                    }
                }
            }
            components.push(component);
        }
    }

    components
}

impl GeoCompute for InMemoryCompute {
    type Collection = MemoryCollection;
    type Image = MemoryImage;

    fn filter_collection(
        &self,
        query: &CollectionQuery,
        region: &RegionOfInterest,
    ) -> FloodResult<MemoryCollection> {
        let mut scenes: Vec<Arc<SceneRecord>> = self
            .scenes
            .iter()
            .filter(|s| s.matches(query, region))
            .cloned()
            .collect();
        scenes.sort_by_key(|s| s.acquired);
        log::debug!(
            "Filtered {} of {} scenes for {}",
            scenes.len(),
            self.scenes.len(),
            query.collection_id
        );
        Ok(MemoryCollection {
            scenes,
            band: query.polarization,
        })
    }

    fn filter_date(
        &self,
        collection: &MemoryCollection,
        period: &TimePeriod,
    ) -> FloodResult<MemoryCollection> {
        Ok(MemoryCollection {
            scenes: collection
                .scenes
                .iter()
                .filter(|s| period.contains(s.acquired))
                .cloned()
                .collect(),
            band: collection.band,
        })
    }

    fn collection_size(&self, collection: &MemoryCollection) -> FloodResult<usize> {
        Ok(collection.scenes.len())
    }

    fn date_range(
        &self,
        collection: &MemoryCollection,
    ) -> FloodResult<Option<(NaiveDate, NaiveDate)>> {
        let min = collection.scenes.iter().map(|s| s.acquired).min();
        let max = collection.scenes.iter().map(|s| s.acquired).max();
        Ok(min.zip(max))
    }

    fn mosaic(&self, collection: &MemoryCollection) -> FloodResult<MemoryImage> {
        let band = collection.band.to_string();
        let mut mosaic = Raster::empty(band, self.grid.dim());

        // Scenes are in acquisition order, so later ones overwrite earlier ones
        for scene in &collection.scenes {
            let Some(data) = scene.bands.get(&collection.band) else {
                continue;
            };
            for ((i, j), &value) in data.indexed_iter() {
                let (lon, lat) = self.grid.pixel_center(i, j);
                if value.is_finite() && scene.footprint.contains(lon, lat) {
                    mosaic.data[[i, j]] = value;
                    mosaic.valid[[i, j]] = true;
                }
            }
        }

        log::debug!(
            "Mosaicked {} scenes, {} valid pixels",
            collection.scenes.len(),
            mosaic.valid_count()
        );
        Ok(Arc::new(mosaic))
    }

    fn clip(&self, image: &MemoryImage, region: &RegionOfInterest) -> FloodResult<MemoryImage> {
        let valid = self.region_mask(image, region);
        Ok(Arc::new(Raster {
            band: image.band.clone(),
            data: image.data.clone(),
            valid,
        }))
    }

    fn focal_mean(
        &self,
        image: &MemoryImage,
        radius_m: f64,
        shape: KernelShape,
    ) -> FloodResult<MemoryImage> {
        if !(radius_m >= 0.0) {
            return Err(FloodError::InvalidParameter(format!(
                "Focal radius must be non-negative, got {}",
                radius_m
            )));
        }
        let (dx, dy) = self.grid.pixel_spacing_m();
        let reach_i = (radius_m / dy).floor() as i64;
        let reach_j = (radius_m / dx).floor() as i64;

        let mut offsets = Vec::new();
        for di in -reach_i..=reach_i {
            for dj in -reach_j..=reach_j {
                let inside = match shape {
                    KernelShape::Square => true,
                    KernelShape::Circle => {
                        let (mx, my) = (dj as f64 * dx, di as f64 * dy);
                        mx * mx + my * my <= radius_m * radius_m
                    }
                };
                if inside {
                    offsets.push((di, dj));
                }
            }
        }
        log::debug!("Focal mean kernel: {} offsets", offsets.len());

        let (rows, cols) = self.grid.dim();
        let mut data = image.data.clone();
        Zip::indexed(&mut data).par_for_each(|(i, j), out| {
            if !image.valid[[i, j]] {
                return;
            }
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for &(di, dj) in &offsets {
                let ii = i as i64 + di;
                let jj = j as i64 + dj;
                if ii >= 0 && ii < rows as i64 && jj >= 0 && jj < cols as i64 {
                    let (ii, jj) = (ii as usize, jj as usize);
                    if image.valid[[ii, jj]] {
                        sum += image.data[[ii, jj]] as f64;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                *out = (sum / count as f64) as f32;
            }
        });

        Ok(Arc::new(Raster {
            band: image.band.clone(),
            data,
            valid: image.valid.clone(),
        }))
    }

    fn divide(&self, numerator: &MemoryImage, denominator: &MemoryImage) -> FloodResult<MemoryImage> {
        Ok(Arc::new(self.binary_op(numerator, denominator, |a, b| {
            let ratio = a / b;
            if b != 0.0 && ratio.is_finite() {
                Some(ratio)
            } else {
                None
            }
        })))
    }

    fn multiply(&self, a: &MemoryImage, b: &MemoryImage) -> FloodResult<MemoryImage> {
        Ok(Arc::new(self.binary_op(a, b, |x, y| Some(x * y))))
    }

    fn compare(&self, image: &MemoryImage, op: Comparison, value: f64) -> FloodResult<MemoryImage> {
        let data = image
            .data
            .mapv(|v| if op.apply(v as f64, value) { 1.0 } else { 0.0 });
        Ok(Arc::new(Raster {
            band: image.band.clone(),
            data,
            valid: image.valid.clone(),
        }))
    }

    fn where_(
        &self,
        image: &MemoryImage,
        condition: &MemoryImage,
        value: f64,
    ) -> FloodResult<MemoryImage> {
        let mut data = image.data.clone();
        Zip::from(&mut data)
            .and(&condition.data)
            .and(&condition.valid)
            .for_each(|out, &c, &vc| {
                if vc && c != 0.0 {
                    *out = value as f32;
                }
            });
        Ok(Arc::new(Raster {
            band: image.band.clone(),
            data,
            valid: image.valid.clone(),
        }))
    }

    fn update_mask(&self, image: &MemoryImage, mask: &MemoryImage) -> FloodResult<MemoryImage> {
        let mut valid = image.valid.clone();
        Zip::from(&mut valid)
            .and(&mask.data)
            .and(&mask.valid)
            .for_each(|ok, &m, &vm| {
                *ok = *ok && vm && m != 0.0;
            });
        Ok(Arc::new(Raster {
            band: image.band.clone(),
            data: image.data.clone(),
            valid,
        }))
    }

    fn connected_pixel_count(&self, image: &MemoryImage, max_size: u32) -> FloodResult<MemoryImage> {
        let mut data = Array2::<f32>::zeros(self.grid.dim());
        for component in label_components(&image.data, &image.valid) {
            let count = component.len().min(max_size as usize) as f32;
            for (i, j) in component {
                data[[i, j]] = count;
            }
        }
        Ok(Arc::new(Raster {
            band: "labels".to_string(),
            data,
            valid: image.valid.clone(),
        }))
    }

    fn load_image(&self, asset_id: &str, band: &str) -> FloodResult<MemoryImage> {
        let data = self
            .assets
            .get(&(asset_id.to_string(), band.to_string()))
            .ok_or_else(|| {
                FloodError::remote(format!("Image asset not found: {} (band {})", asset_id, band))
            })?;
        Ok(Arc::new(Raster::from_data(band, data.clone())))
    }

    fn slope(&self, elevation: &MemoryImage) -> FloodResult<MemoryImage> {
        let (rows, cols) = self.grid.dim();
        let mut slope = Array2::<f32>::zeros((rows, cols));
        let (dx, dy) = self.grid.pixel_spacing_m();
        let (dx, dy) = (dx as f32, dy as f32);

        if rows >= 3 && cols >= 3 {
            let dem = &elevation.data;
            for i in 1..rows - 1 {
                for j in 1..cols - 1 {
                    // Central differences
                    let dz_dx = (dem[[i, j + 1]] - dem[[i, j - 1]]) / (2.0 * dx);
                    let dz_dy = (dem[[i + 1, j]] - dem[[i - 1, j]]) / (2.0 * dy);
                    slope[[i, j]] = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees();
                }
            }
            fill_edges(&mut slope);
        }

        let mut valid = elevation.valid.clone();
        Zip::from(&mut valid).and(&slope).for_each(|ok, s| *ok = *ok && s.is_finite());
        Ok(Arc::new(Raster {
            band: "slope".to_string(),
            data: slope,
            valid,
        }))
    }

    fn pixel_area(&self) -> FloodResult<MemoryImage> {
        let data = Array2::from_shape_fn(self.grid.dim(), |(i, _)| self.grid.pixel_area_m2(i) as f32);
        Ok(Arc::new(Raster::from_data("area", data)))
    }

    fn select(&self, image: &MemoryImage, band: &str) -> FloodResult<MemoryImage> {
        if image.band != band {
            return Err(FloodError::remote(format!(
                "Band '{}' not found, image has '{}'",
                band, image.band
            )));
        }
        Ok(Arc::clone(image))
    }

    fn unmask(&self, image: &MemoryImage, value: f64) -> FloodResult<MemoryImage> {
        let mut data = image.data.clone();
        Zip::from(&mut data).and(&image.valid).for_each(|v, &ok| {
            if !ok {
                *v = value as f32;
            }
        });
        Ok(Arc::new(Raster {
            band: image.band.clone(),
            data,
            valid: Array2::from_elem(self.grid.dim(), true),
        }))
    }

    fn reduce_sum(
        &self,
        image: &MemoryImage,
        band: &str,
        region: &RegionOfInterest,
        options: &ReduceOptions,
    ) -> FloodResult<Option<f64>> {
        let image = self.select(image, band)?;
        log::debug!(
            "In-memory sum at native grid (requested scale {} m, best effort {})",
            options.scale,
            options.best_effort
        );
        let inside = self.region_mask(&image, region);
        let sum = Zip::from(&image.data)
            .and(&inside)
            .fold(0.0f64, |acc, &v, &ok| if ok { acc + v as f64 } else { acc });
        Ok(Some(sum))
    }

    fn reduce_to_vectors(
        &self,
        image: &MemoryImage,
        region: &RegionOfInterest,
        options: &ReduceOptions,
    ) -> FloodResult<FeatureCollection> {
        log::debug!(
            "In-memory vectorization at native grid (requested scale {} m)",
            options.scale
        );
        let inside = self.region_mask(image, region);
        let mut features = Vec::new();

        for mut component in label_components(&image.data, &inside) {
            let (i0, j0) = component[0];
            let label = image.data[[i0, j0]].round() as i64;
            component.sort_unstable();

            // Merge horizontal runs into rectangles
            let mut polygons = Vec::new();
            let mut run: Option<(usize, usize, usize)> = None;
            for (i, j) in component {
                run = match run {
                    Some((ri, start, end)) if ri == i && end + 1 == j => Some((ri, start, j)),
                    Some((ri, start, end)) => {
                        polygons.push(vec![self.grid.run_ring(ri, start, end)]);
                        Some((i, j, j))
                    }
                    None => Some((i, j, j)),
                };
            }
            if let Some((ri, start, end)) = run {
                polygons.push(vec![self.grid.run_ring(ri, start, end)]);
            }

            features.push(Feature::new(Geometry::MultiPolygon(polygons), label));
        }

        log::debug!("Vectorized {} features", features.len());
        Ok(FeatureCollection::new(features))
    }

    fn visualize(&self, image: &MemoryImage, params: &VisParams) -> FloodResult<TileReference> {
        let id = self.tile_counter.fetch_add(1, Ordering::SeqCst);
        log::debug!("Registered in-memory layer {} ({}) with {:?}", id, image.band, params);
        Ok(TileReference(format!(
            "memory://maps/{}/tiles/{{z}}/{{x}}/{{y}}",
            id
        )))
    }
}

/// Copy nearest interior values onto the border
fn fill_edges(array: &mut Array2<f32>) {
    let (rows, cols) = array.dim();
    if rows < 3 || cols < 3 {
        return;
    }
    for j in 0..cols {
        let jj = j.clamp(1, cols - 2);
        array[[0, j]] = array[[1, jj]];
        array[[rows - 1, j]] = array[[rows - 2, jj]];
    }
    for i in 1..rows - 1 {
        array[[i, 0]] = array[[i, 1]];
        array[[i, cols - 1]] = array[[i, cols - 2]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_engine() -> InMemoryCompute {
        let region = RegionOfInterest::new(0.0, 0.0, 0.01, 0.01).unwrap();
        InMemoryCompute::new(RasterGrid::covering(&region, 0.001, 0.001))
    }

    #[test]
    fn test_divide_masks_zero_divisor() {
        let engine = small_engine();
        let a = Arc::new(Raster::from_data("VH", Array2::from_elem((10, 10), 2.0)));
        let mut b_data = Array2::from_elem((10, 10), 1.0);
        b_data[[3, 3]] = 0.0;
        b_data[[4, 4]] = f32::NAN;
        let b = Arc::new(Raster::from_data("VH", b_data));

        let ratio = engine.divide(&a, &b).unwrap();
        assert_eq!(ratio.get(0, 0), Some(2.0));
        assert_eq!(ratio.get(3, 3), None);
        assert_eq!(ratio.get(4, 4), None);
        assert_eq!(ratio.band, "VH");
    }

    #[test]
    fn test_connected_pixel_count_is_capped() {
        let engine = small_engine();
        let mut data = Array2::<f32>::zeros((10, 10));
        // diagonal chain of 3 plus an isolated pixel
        data[[0, 0]] = 1.0;
        data[[1, 1]] = 1.0;
        data[[2, 2]] = 1.0;
        data[[7, 7]] = 1.0;
        let image = Arc::new(Raster::from_data("VH", data));
        let masked = engine.update_mask(&image, &image).unwrap();

        let counts = engine.connected_pixel_count(&masked, 100).unwrap();
        assert_eq!(counts.get(1, 1), Some(3.0));
        assert_eq!(counts.get(7, 7), Some(1.0));
        assert_eq!(counts.get(5, 5), None);

        let capped = engine.connected_pixel_count(&masked, 2).unwrap();
        assert_eq!(capped.get(0, 0), Some(2.0));
    }

    #[test]
    fn test_slope_of_flat_and_tilted_planes() {
        let engine = small_engine();
        let flat = Arc::new(Raster::from_data("elevation", Array2::from_elem((10, 10), 100.0)));
        let slope = engine.slope(&flat).unwrap();
        assert!(slope.data.iter().all(|s| *s == 0.0));

        let (dx, _) = engine.grid().pixel_spacing_m();
        // rise of one pixel width per column gives 45 degrees
        let tilted = Array2::from_shape_fn((10, 10), |(_, j)| (j as f64 * dx) as f32);
        let tilted = Arc::new(Raster::from_data("elevation", tilted));
        let slope = engine.slope(&tilted).unwrap();
        assert_relative_eq!(slope.data[[5, 5]], 45.0, epsilon = 0.01);
        assert_relative_eq!(slope.data[[0, 0]], 45.0, epsilon = 0.01);
    }

    #[test]
    fn test_focal_mean_ignores_masked_neighbors() {
        let engine = small_engine();
        let mut data = Array2::from_elem((10, 10), 1.0f32);
        data[[5, 6]] = f32::NAN;
        data[[5, 4]] = 3.0;
        let image = Arc::new(Raster::from_data("VH", data));

        // radius of one pixel (about 111 m), circle touches 4 neighbours
        let (dx, _) = engine.grid().pixel_spacing_m();
        let smoothed = engine.focal_mean(&image, dx * 1.01, KernelShape::Circle).unwrap();
        // centre 1.0, neighbours 1.0 (up), 1.0 (down), 3.0 (left), masked (right)
        assert_relative_eq!(smoothed.data[[5, 5]], 1.5, epsilon = 1e-6);
        assert_eq!(smoothed.get(5, 6), None);
    }

    #[test]
    fn test_vectorized_area_matches_pixel_area_sum() {
        let engine = small_engine();
        let mut data = Array2::<f32>::zeros((10, 10));
        for i in 2..6 {
            for j in 3..8 {
                data[[i, j]] = 1.0;
            }
        }
        let image = Arc::new(Raster::from_data("VH", data));
        let region = RegionOfInterest::new(0.0, 0.0, 0.01, 0.01).unwrap();

        let vectors = engine
            .reduce_to_vectors(&image, &region, &ReduceOptions::default())
            .unwrap();
        assert_eq!(vectors.len(), 2);
        let flooded = vectors.with_label(1);
        assert_eq!(flooded.len(), 1);

        let area = engine.pixel_area().unwrap();
        let masked = engine.update_mask(&image, &image).unwrap();
        let weighted = engine.multiply(&masked, &area).unwrap();
        let sum = engine
            .reduce_sum(&weighted, "VH", &region, &ReduceOptions::default())
            .unwrap()
            .unwrap();
        assert_relative_eq!(flooded.total_area_m2(), sum, max_relative = 1e-3);
    }
}
