//! Raster I/O and input discovery

pub mod raster;
pub mod static_layers;
pub mod annual;

pub use raster::{Raster, RasterReader, RasterWriter, WriteOptions};
pub use static_layers::{LoadedLayer, StaticLayerConfig, StaticLayerLoader, StaticLayers};
pub use annual::{AnnualInputReader, AnnualInputs, AnnualProductKey};
