//! Annual compositor inputs and annual QA product naming

use crate::core::qa_rules::AnnualStatistics;
use crate::io::raster::{Raster, RasterReader};
use crate::types::{ClassRaster, GeoReference, Sensor, TileGrid, TileId, WaterResult};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Identifies one annual product run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualProductKey {
    pub year: u16,
    pub tile: TileId,
    pub sensor: Sensor,
    pub classifier: String,
}

impl AnnualProductKey {
    pub fn new(year: u16, tile: TileId, sensor: Sensor, classifier: impl Into<String>) -> Self {
        Self {
            year,
            tile,
            sensor,
            classifier: classifier.into(),
        }
    }

    /// Compositor output name, e.g. `2019-h18v04-MOD-rf-SumWater.tif`
    pub fn image_name(&self, suffix: &str) -> String {
        format!(
            "{}-{}-{}-{}-{}.tif",
            self.year, self.tile, self.sensor, self.classifier, suffix
        )
    }

    /// Final product name, e.g. `MOD.A2019.h18v04.rf.AnnualWaterProductQA.20262921530.tif`
    pub fn product_name(&self, product: &str, stamp: &str) -> String {
        format!(
            "{}.A{}.{}.{}.{}.{}.tif",
            self.sensor, self.year, self.tile, self.classifier, product, stamp
        )
    }
}

/// `{YYYY}{DDD}{HHMM}` production stamp
pub fn production_stamp(time: DateTime<Utc>) -> String {
    format!("{}{:03}{}", time.year(), time.ordinal(), time.format("%H%M"))
}

/// Everything the QA engine needs besides the packed code
#[derive(Debug, Clone)]
pub struct AnnualInputs {
    pub provisional: ClassRaster,
    pub statistics: AnnualStatistics,
    pub burn_scar: ClassRaster,
    pub georef: Option<GeoReference>,
}

/// Locates and reads the annual compositor outputs for one run
pub struct AnnualInputReader {
    grid: TileGrid,
}

impl AnnualInputReader {
    pub fn new(grid: TileGrid) -> Self {
        Self { grid }
    }

    pub fn read(
        &self,
        annual_dir: &Path,
        key: &AnnualProductKey,
        burn_scar_path: &Path,
    ) -> WaterResult<AnnualInputs> {
        log::info!(
            "Reading annual inputs for {} {} {} from {}",
            key.year,
            key.tile,
            key.sensor,
            annual_dir.display()
        );

        let mask: Raster<u8> = self.read_checked(&annual_dir.join(key.image_name("Mask")))?;
        let water: Raster<i16> = self.read_checked(&annual_dir.join(key.image_name("SumWater")))?;
        let land: Raster<i16> = self.read_checked(&annual_dir.join(key.image_name("SumLand")))?;
        let burn: Raster<u8> = self.read_checked(burn_scar_path)?;

        Ok(AnnualInputs {
            provisional: mask.data,
            statistics: AnnualStatistics {
                water_days: water.data,
                land_days: land.data,
            },
            burn_scar: burn.data,
            georef: mask.georef,
        })
    }

    fn read_checked<T>(&self, path: &Path) -> WaterResult<Raster<T>>
    where
        T: gdal::raster::GdalType + Copy,
    {
        let raster = RasterReader::read::<T, _>(path)?;
        self.grid
            .ensure_shape(&path.display().to_string(), raster.data.dim())?;
        Ok(raster)
    }
}
