//! Tile-level pipelines: packed ancillary mask generation and annual QA

use crate::core::packed_codec::{PackedCodec, PackingParams};
use crate::core::qa_rules::{QaOutcome, QaRuleEngine, QaSummary, QaThresholds};
use crate::io::annual::{production_stamp, AnnualInputReader, AnnualInputs, AnnualProductKey};
use crate::io::raster::{RasterReader, RasterWriter, WriteOptions};
use crate::io::static_layers::{StaticLayerConfig, StaticLayerLoader};
use crate::types::{GeoReference, PackedRaster, Theme, TileId, WaterResult, OUT_OF_PROJECTION};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Band description of the packed-mask product
pub const PACKED_MASK_DESCRIPTION: &str = "MOD44W post-processing packed bit mask";

/// File name of a tile's packed-mask product
pub fn packed_mask_name(tile: TileId) -> String {
    format!("postprocess_water_{}.tif", tile)
}

/// Packed code raster for one tile
#[derive(Debug, Clone)]
pub struct PackedMask {
    pub tile: TileId,
    pub packed: PackedRaster,
    pub georef: Option<GeoReference>,
    /// Themes that came from a default raster
    pub defaulted: Vec<Theme>,
}

/// Loads a tile's static layers and packs them into one 16-bit raster
pub struct PackedMaskGenerator {
    loader: StaticLayerLoader,
    params: PackingParams,
}

impl PackedMaskGenerator {
    pub fn new(config: StaticLayerConfig, params: PackingParams) -> Self {
        Self {
            loader: StaticLayerLoader::new(config),
            params,
        }
    }

    /// Build the packed raster in memory
    pub fn build(&self, tile: TileId) -> WaterResult<PackedMask> {
        let layers = self.loader.load_static_layers(tile)?;
        let georef = layers.georef.clone();
        let defaulted = layers.defaulted.clone();

        let ancillary = layers.into_ancillary_layers(&self.params)?;
        let packed = PackedCodec::encode(&ancillary);

        log::info!(
            "Packed {} pixels for tile {} ({} defaulted theme(s))",
            packed.len(),
            tile,
            defaulted.len()
        );

        Ok(PackedMask {
            tile,
            packed,
            georef,
            defaulted,
        })
    }

    /// Build the packed raster and write it under `output_dir`
    pub fn generate(&self, tile: TileId, output_dir: &Path) -> WaterResult<(PathBuf, PackedMask)> {
        let mask = self.build(tile)?;
        let path = output_dir.join(packed_mask_name(tile));

        let options = WriteOptions {
            no_data: Some(f64::from(OUT_OF_PROJECTION)),
            description: Some(PACKED_MASK_DESCRIPTION.to_string()),
            ..WriteOptions::default()
        };
        RasterWriter::write_geotiff(&path, &mask.packed, mask.georef.as_ref(), &options)?;

        Ok((path, mask))
    }
}

/// Paths and diagnostics of one annual QA run
#[derive(Debug, Clone)]
pub struct AnnualQaProducts {
    pub product_path: PathBuf,
    pub qa_path: PathBuf,
    pub summary: QaSummary,
}

/// Runs the QA rules over an annual classification and writes the products
pub struct AnnualQaProcessor {
    engine: QaRuleEngine,
    reader: AnnualInputReader,
}

impl AnnualQaProcessor {
    pub fn new(config: &StaticLayerConfig, thresholds: QaThresholds) -> Self {
        Self {
            engine: QaRuleEngine::new(config.grid, thresholds),
            reader: AnnualInputReader::new(config.grid),
        }
    }

    /// Decode the packed code and apply every rule; no I/O
    pub fn apply(&self, packed: &PackedRaster, inputs: &AnnualInputs) -> WaterResult<QaOutcome> {
        self.engine.grid().ensure_shape("packed code", packed.dim())?;

        let decoded = PackedCodec::decode_all(packed);
        self.engine.run(
            &decoded,
            &inputs.provisional,
            &inputs.statistics,
            &inputs.burn_scar,
        )
    }

    /// Read the packed mask and the annual inputs, run QA and write the
    /// corrected classification and QA rasters to `output_dir`.
    pub fn process(
        &self,
        packed_path: &Path,
        annual_dir: &Path,
        key: &AnnualProductKey,
        burn_scar_path: &Path,
        output_dir: &Path,
        produced_at: DateTime<Utc>,
    ) -> WaterResult<AnnualQaProducts> {
        log::info!("Annual QA for {} {}", key.tile, key.year);

        let packed = RasterReader::read::<u16, _>(packed_path)?;
        let inputs = self.reader.read(annual_dir, key, burn_scar_path)?;

        let outcome = self.apply(&packed.data, &inputs)?;

        let stamp = production_stamp(produced_at);
        let product_path = output_dir.join(key.product_name("AnnualWaterProduct", &stamp));
        let qa_path = output_dir.join(key.product_name("AnnualWaterProductQA", &stamp));

        let georef = inputs.georef.as_ref().or(packed.georef.as_ref());
        let options = WriteOptions::default();
        RasterWriter::write_geotiff(&product_path, &outcome.classification, georef, &options)?;
        RasterWriter::write_geotiff(&qa_path, &outcome.qa, georef, &options)?;

        for (code, count) in &outcome.summary.qa_histogram {
            log::debug!("QA {:>3}: {} pixel(s)", code, count);
        }

        Ok(AnnualQaProducts {
            product_path,
            qa_path,
            summary: outcome.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packed_codec::{ANC_WATER_BIT, SC_LAND_BIT};
    use crate::core::qa_rules::{AnnualStatistics, QaRuleKind};
    use crate::types::{ClassRaster, CountRaster, TileGrid, WaterError, LAND, WATER};
    use ndarray::array;

    #[test]
    fn test_packed_mask_name() {
        let tile: TileId = "h09v05".parse().unwrap();
        assert_eq!(packed_mask_name(tile), "postprocess_water_h09v05.tif");
    }

    #[test]
    fn test_apply_uses_decoded_layers() {
        let mut config = StaticLayerConfig::with_common_root("/unused");
        config.grid = TileGrid::new(1, 2);
        let processor = AnnualQaProcessor::new(&config, QaThresholds::default());

        // inland water ancillary on land seven-class, both pixels land
        let code = ANC_WATER_BIT | SC_LAND_BIT;
        let packed = array![[code, code]];
        let inputs = AnnualInputs {
            provisional: array![[LAND, LAND]],
            statistics: AnnualStatistics {
                water_days: array![[4i16, 0]],
                land_days: array![[0i16, 8]],
            },
            burn_scar: ClassRaster::zeros((1, 2)),
            georef: None,
        };

        let outcome = processor.apply(&packed, &inputs).unwrap();
        assert_eq!(outcome.classification, array![[WATER, LAND]]);
        assert_eq!(outcome.summary.hits(QaRuleKind::LowConfidenceWater), 1);
    }

    #[test]
    fn test_apply_rejects_packed_raster_off_grid() {
        let mut config = StaticLayerConfig::with_common_root("/unused");
        config.grid = TileGrid::new(1, 2);
        let processor = AnnualQaProcessor::new(&config, QaThresholds::default());

        let inputs = AnnualInputs {
            provisional: ClassRaster::zeros((1, 2)),
            statistics: AnnualStatistics {
                water_days: CountRaster::zeros((1, 2)),
                land_days: CountRaster::zeros((1, 2)),
            },
            burn_scar: ClassRaster::zeros((1, 2)),
            georef: None,
        };

        match processor.apply(&PackedRaster::zeros((2, 2)), &inputs) {
            Err(WaterError::ShapeMismatch { name, found, .. }) => {
                assert_eq!(name, "packed code");
                assert_eq!(found, (2, 2));
            }
            other => panic!("Expected shape mismatch, got {:?}", other.map(|o| o.qa)),
        }
    }
}
