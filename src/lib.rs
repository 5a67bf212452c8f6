//! Tidemark: post-processing core for the annual MODIS surface-water product
//!
//! Packs a tile's static ancillary layers into one 16-bit code per pixel,
//! decodes it again, and runs the ordered QA corrections that turn a
//! provisional annual water/land classification into the final product and
//! its QA raster.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    ClassRaster, CountRaster, GeoReference, PackedRaster, Sensor, SlopeRaster, Theme,
    TileGrid, TileId, WaterError, WaterResult, LAND, OUT_OF_PROJECTION, WATER,
};

pub use crate::core::{
    AncillaryLayers, AnnualQaProcessor, PackedCodec, PackedMaskGenerator, QaRuleEngine,
    QaThresholds,
};
pub use crate::io::{AnnualProductKey, StaticLayerConfig, StaticLayerLoader};
