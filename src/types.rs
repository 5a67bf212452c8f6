use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Byte-valued categorical raster (classification, QA, thematic layers)
pub type ClassRaster = Array2<u8>;

/// Packed ancillary code raster, one 16-bit word per pixel
pub type PackedRaster = Array2<u16>;

/// Annual day-count raster (days classified water or land)
pub type CountRaster = Array2<i16>;

/// DEM slope raster
pub type SlopeRaster = Array2<f32>;

/// Annual classification value for land
pub const LAND: u8 = 0;

/// Annual classification value for water
pub const WATER: u8 = 1;

/// Annual classification sentinel for pixels outside the sinusoidal projection
pub const OUT_OF_PROJECTION: u8 = 250;

/// WKT of the MODIS sinusoidal grid projection
pub const MODIS_SINUSOIDAL_WKT: &str = r#"PROJCS["Sinusoidal",GEOGCS["GCS_Undefined",DATUM["Undefined",SPHEROID["User_Defined_Spheroid",6371007.181,0.0]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Sinusoidal"],PARAMETER["False_Easting",0.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",0.0],UNIT["Meter",1.0]]"#;

/// Raster grid shared by every layer of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub rows: usize,
    pub cols: usize,
}

impl TileGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Fail with `ShapeMismatch` unless `found` matches this grid
    pub fn ensure_shape(&self, name: &str, found: (usize, usize)) -> WaterResult<()> {
        if found != self.shape() {
            return Err(WaterError::ShapeMismatch {
                name: name.to_string(),
                expected: self.shape(),
                found,
            });
        }
        Ok(())
    }
}

impl Default for TileGrid {
    fn default() -> Self {
        // MODIS 250m tile
        Self::new(4800, 4800)
    }
}

/// MODIS sinusoidal tile identifier (`h##v##`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub h: u8,
    pub v: u8,
}

impl TileId {
    pub const MAX_H: u8 = 35;
    pub const MAX_V: u8 = 17;

    pub fn new(h: u8, v: u8) -> WaterResult<Self> {
        if h > Self::MAX_H || v > Self::MAX_V {
            return Err(WaterError::InvalidTile(format!("h{:02}v{:02}", h, v)));
        }
        Ok(Self { h, v })
    }

    /// Vertical index in its `v##` form, the key of the exclusion table
    pub fn vertical_key(&self) -> String {
        format!("v{:02}", self.v)
    }
}

impl std::str::FromStr for TileId {
    type Err = WaterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WaterError::InvalidTile(s.to_string());

        let rest = s.strip_prefix('h').ok_or_else(invalid)?;
        let (h_part, v_part) = rest.split_once('v').ok_or_else(invalid)?;
        let is_index = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
        if !is_index(h_part) || !is_index(v_part) {
            return Err(invalid());
        }

        let h = h_part.parse::<u8>().map_err(|_| invalid())?;
        let v = v_part.parse::<u8>().map_err(|_| invalid())?;
        Self::new(h, v).map_err(|_| invalid())
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{:02}v{:02}", self.h, self.v)
    }
}

/// MODIS instrument platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    /// Terra
    MOD,
    /// Aqua
    MYD,
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sensor::MOD => write!(f, "MOD"),
            Sensor::MYD => write!(f, "MYD"),
        }
    }
}

impl std::str::FromStr for Sensor {
    type Err = WaterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MOD" => Ok(Sensor::MOD),
            "MYD" => Ok(Sensor::MYD),
            _ => Err(WaterError::Config(format!("Invalid sensor: {}", s))),
        }
    }
}

/// Static ancillary themes multiplexed into the packed code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Theme {
    Impervious,
    PermanentWater,
    Slope,
    Ancillary,
    SevenClass,
}

impl Theme {
    pub const ALL: [Theme; 5] = [
        Theme::Impervious,
        Theme::PermanentWater,
        Theme::Slope,
        Theme::Ancillary,
        Theme::SevenClass,
    ];
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Theme::Impervious => write!(f, "impervious"),
            Theme::PermanentWater => write!(f, "permanent-water"),
            Theme::Slope => write!(f, "slope"),
            Theme::Ancillary => write!(f, "ancillary"),
            Theme::SevenClass => write!(f, "seven-class"),
        }
    }
}

/// Affine transform and projection carried with a raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    pub transform: [f64; 6],
    pub projection: String,
}

/// A decoded packed-code pixel that breaks the one-hot invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityViolation {
    pub row: usize,
    pub col: usize,
    pub code: u16,
}

/// Error types for water post-processing
#[derive(Debug, thiserror::Error)]
pub enum WaterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid tile identifier: {0}")]
    InvalidTile(String),

    #[error(
        "Missing {theme} ancillary data for tile {tile}: nothing matched {}",
        .searched.display()
    )]
    MissingAncillaryData {
        theme: Theme,
        tile: TileId,
        searched: PathBuf,
    },

    #[error("Shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Packed code integrity violated at {} pixel(s)", .violations.len())]
    DataIntegrity { violations: Vec<IntegrityViolation> },
}

/// Result type for water post-processing operations
pub type WaterResult<T> = Result<T, WaterError>;
