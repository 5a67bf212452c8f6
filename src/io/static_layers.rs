//! Static ancillary layer loading
//!
//! One raster per theme per tile, found by a theme-specific file name pattern
//! under the theme's directory. Tiles in the exclusion rows (the polar rows
//! with no ancillary coverage) get a synthesized default raster instead of a
//! hard failure when a file is absent.

use crate::core::impervious::{ImperviousMask, ImperviousParams};
use crate::core::packed_codec::{
    AncillaryClass, AncillaryLayers, PackingParams, SevenClass, SEVEN_CLASS_NODATA,
};
use crate::io::raster::RasterReader;
use crate::types::{
    ClassRaster, GeoReference, SlopeRaster, Theme, TileGrid, TileId, WaterError, WaterResult,
};
use gdal::raster::GdalType;
use ndarray::Array2;
use num_traits::NumCast;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the static layers live and how tiles without coverage are handled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticLayerConfig {
    pub impervious_dir: PathBuf,
    pub permanent_water_dir: PathBuf,
    pub slope_dir: PathBuf,
    pub ancillary_dir: PathBuf,
    pub seven_class_dir: PathBuf,
    pub grid: TileGrid,
    /// Vertical tile indices (`v##`) with no ancillary coverage
    pub exclusion_rows: Vec<String>,
    pub impervious: ImperviousParams,
}

impl StaticLayerConfig {
    /// Every theme read from the same directory
    pub fn with_common_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            impervious_dir: root.clone(),
            permanent_water_dir: root.clone(),
            slope_dir: root.clone(),
            ancillary_dir: root.clone(),
            seven_class_dir: root,
            grid: TileGrid::default(),
            exclusion_rows: default_exclusion_rows(),
            impervious: ImperviousParams::default(),
        }
    }

    pub fn dir_for(&self, theme: Theme) -> &Path {
        match theme {
            Theme::Impervious => &self.impervious_dir,
            Theme::PermanentWater => &self.permanent_water_dir,
            Theme::Slope => &self.slope_dir,
            Theme::Ancillary => &self.ancillary_dir,
            Theme::SevenClass => &self.seven_class_dir,
        }
    }

    pub fn is_excluded(&self, tile: TileId) -> bool {
        let key = tile.vertical_key();
        self.exclusion_rows.iter().any(|row| *row == key)
    }
}

fn default_exclusion_rows() -> Vec<String> {
    ["v14", "v15", "v16", "v17"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}

/// Glob-style file name of a theme's raster for a tile
pub fn file_pattern(theme: Theme, tile: TileId) -> String {
    match theme {
        Theme::Impervious => format!("Imp_Surf_{}_250m.tif", tile),
        Theme::PermanentWater => format!("Water.{}*.tif", tile),
        Theme::Slope => format!("GMTED.{}.slope.tif", tile),
        Theme::Ancillary => format!("Dyn_Water_Ancillary_{}*.tif", tile),
        Theme::SevenClass => format!("Master_7class_maxextent_{}.tif", tile),
    }
}

/// Value a defaulted raster of `theme` is filled with
pub fn default_fill(theme: Theme) -> u8 {
    match theme {
        Theme::Impervious | Theme::PermanentWater | Theme::Slope => 0,
        Theme::Ancillary => AncillaryClass::Fill.value(),
        Theme::SevenClass => SEVEN_CLASS_NODATA,
    }
}

/// First entry of `dir` (sorted by name) matching a `*` glob pattern.
///
/// A missing directory matches nothing.
pub fn find_static_dataset(dir: &Path, pattern: &str) -> WaterResult<Option<PathBuf>> {
    let regex_src = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
    let regex = Regex::new(&regex_src)
        .map_err(|e| WaterError::Config(format!("Bad file pattern {}: {}", pattern, e)))?;

    if !dir.is_dir() {
        return Ok(None);
    }

    let mut matches = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if regex.is_match(name) {
                matches.push(entry.path());
            }
        }
    }
    matches.sort();

    Ok(matches.into_iter().next())
}

/// Raster of one theme, as read or as defaulted
#[derive(Debug, Clone)]
pub struct LoadedLayer<T> {
    pub theme: Theme,
    pub data: Array2<T>,
    pub used_default: bool,
    pub georef: Option<GeoReference>,
}

/// The five static themes of one tile, ready for packing
#[derive(Debug, Clone)]
pub struct StaticLayers {
    pub tile: TileId,
    /// Binary, already thresholded from the percentage source
    pub impervious: ClassRaster,
    pub permanent_water: ClassRaster,
    pub dem_slope: SlopeRaster,
    pub ancillary: ClassRaster,
    pub seven_class: ClassRaster,
    /// Georeference for derived products
    pub georef: Option<GeoReference>,
    /// Themes replaced by a default raster
    pub defaulted: Vec<Theme>,
}

impl StaticLayers {
    /// Derive the slope flag and assemble the layers the codec packs
    pub fn into_ancillary_layers(self, params: &PackingParams) -> WaterResult<AncillaryLayers> {
        AncillaryLayers::from_sources(
            self.impervious,
            self.permanent_water,
            &self.dem_slope,
            self.ancillary,
            self.seven_class,
            params,
        )
    }
}

/// Ancillary raster for a tile with no ancillary source, built from its
/// seven-class: nodata becomes out-of-projection, ocean classes become ocean,
/// everything else stays fill.
pub fn synthesize_polar_ancillary(seven_class: &ClassRaster) -> ClassRaster {
    seven_class.mapv(|sc| {
        if sc == SEVEN_CLASS_NODATA {
            AncillaryClass::OutOfProjection.value()
        } else if SevenClass::from_value(sc).map_or(false, SevenClass::is_ocean) {
            AncillaryClass::Ocean.value()
        } else {
            AncillaryClass::Fill.value()
        }
    })
}

/// Loads static layers for a tile
pub struct StaticLayerLoader {
    config: StaticLayerConfig,
}

impl StaticLayerLoader {
    pub fn new(config: StaticLayerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StaticLayerConfig {
        &self.config
    }

    /// Path of the theme's raster for `tile`, or `MissingAncillaryData`
    pub fn locate(&self, theme: Theme, tile: TileId) -> WaterResult<PathBuf> {
        let dir = self.config.dir_for(theme);
        let pattern = file_pattern(theme, tile);

        find_static_dataset(dir, &pattern)?.ok_or_else(|| WaterError::MissingAncillaryData {
            theme,
            tile,
            searched: dir.join(&pattern),
        })
    }

    /// Read a theme's raster as stored, substituting the theme default for
    /// excluded tiles whose file is absent.
    pub fn load_layer<T>(&self, theme: Theme, tile: TileId) -> WaterResult<LoadedLayer<T>>
    where
        T: GdalType + Copy + NumCast,
    {
        match self.read_layer::<T>(theme, tile) {
            Ok(layer) => Ok(layer),
            Err(WaterError::MissingAncillaryData { .. }) if self.config.is_excluded(tile) => {
                log::warn!(
                    "No {} raster for excluded tile {}; using default fill {}",
                    theme,
                    tile,
                    default_fill(theme)
                );
                self.default_layer(theme)
            }
            Err(e) => Err(e),
        }
    }

    fn read_layer<T>(&self, theme: Theme, tile: TileId) -> WaterResult<LoadedLayer<T>>
    where
        T: GdalType + Copy,
    {
        let path = self.locate(theme, tile)?;
        log::info!("Reading {} layer for {}: {}", theme, tile, path.display());

        let raster = RasterReader::read::<T, _>(&path)?;
        self.config
            .grid
            .ensure_shape(&format!("{} layer {}", theme, path.display()), raster.data.dim())?;

        Ok(LoadedLayer {
            theme,
            data: raster.data,
            used_default: false,
            georef: raster.georef,
        })
    }

    fn default_layer<T>(&self, theme: Theme) -> WaterResult<LoadedLayer<T>>
    where
        T: Copy + NumCast,
    {
        let fill = default_fill(theme);
        let value = <T as NumCast>::from(fill).ok_or_else(|| {
            WaterError::Config(format!(
                "Default {} for {} does not fit the raster type",
                fill, theme
            ))
        })?;

        Ok(LoadedLayer {
            theme,
            data: Array2::from_elem(self.config.grid.shape(), value),
            used_default: true,
            georef: None,
        })
    }

    /// Load every theme for a tile
    pub fn load_static_layers(&self, tile: TileId) -> WaterResult<StaticLayers> {
        log::info!("Loading static layers for tile {}", tile);

        let seven_class = self.load_layer::<u8>(Theme::SevenClass, tile)?;
        let mut ancillary = self.load_layer::<u8>(Theme::Ancillary, tile)?;
        let slope = self.load_layer::<f32>(Theme::Slope, tile)?;
        let permanent_water = self.load_layer::<u8>(Theme::PermanentWater, tile)?;
        let impervious_pct = self.load_layer::<u8>(Theme::Impervious, tile)?;

        if ancillary.used_default && !seven_class.used_default {
            ancillary.data = synthesize_polar_ancillary(&seven_class.data);
        }

        let impervious = if impervious_pct.used_default {
            impervious_pct.data
        } else {
            ImperviousMask::new(self.config.impervious.clone())
                .threshold_percentage(&impervious_pct.data)
        };

        let defaulted: Vec<Theme> = [
            (Theme::SevenClass, seven_class.used_default),
            (Theme::Ancillary, ancillary.used_default),
            (Theme::Slope, slope.used_default),
            (Theme::PermanentWater, permanent_water.used_default),
            (Theme::Impervious, impervious_pct.used_default),
        ]
        .iter()
        .filter(|(_, used)| *used)
        .map(|(theme, _)| *theme)
        .collect();

        let georef = seven_class
            .georef
            .clone()
            .or_else(|| ancillary.georef.clone())
            .or_else(|| slope.georef.clone())
            .or_else(|| permanent_water.georef.clone())
            .or_else(|| impervious_pct.georef.clone());

        Ok(StaticLayers {
            tile,
            impervious,
            permanent_water: permanent_water.data,
            dem_slope: slope.data,
            ancillary: ancillary.data,
            seven_class: seven_class.data,
            georef,
            defaulted,
        })
    }
}
