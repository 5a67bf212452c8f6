use crate::types::{GeoReference, WaterError, WaterResult};
use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::Path;

/// Single-band raster with its georeferencing
#[derive(Debug, Clone)]
pub struct Raster<T> {
    pub data: Array2<T>,
    pub georef: Option<GeoReference>,
    pub no_data: Option<f64>,
    /// Band description, if one is set
    pub description: Option<String>,
}

/// Options for writing a single-band GeoTIFF
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub no_data: Option<f64>,
    pub description: Option<String>,
    /// GTiff `COMPRESS` creation option
    pub compress: Option<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            no_data: None,
            description: None,
            compress: Some("LZW".to_string()),
        }
    }
}

/// Reads band 1 of a GDAL dataset into an ndarray
pub struct RasterReader;

impl RasterReader {
    pub fn read<T, P>(path: P) -> WaterResult<Raster<T>>
    where
        T: GdalType + Copy,
        P: AsRef<Path>,
    {
        log::debug!("Reading raster: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let (width, height) = dataset.raster_size();

        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband.no_data_value();
        let description = rasterband.description().ok().filter(|d| !d.is_empty());
        let band_data = rasterband.read_as::<T>((0, 0), (width, height), (width, height), None)?;

        let data = Array2::from_shape_vec((height, width), band_data.data).map_err(|e| {
            WaterError::InvalidFormat(format!(
                "Failed to reshape {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        // Plain rasters without a transform are still usable
        let georef = dataset.geo_transform().ok().map(|transform| GeoReference {
            transform,
            projection: dataset.projection(),
        });

        Ok(Raster {
            data,
            georef,
            no_data,
            description,
        })
    }
}

/// Writes single-band GeoTIFFs
pub struct RasterWriter;

impl RasterWriter {
    pub fn write_geotiff<T, P>(
        path: P,
        data: &Array2<T>,
        georef: Option<&GeoReference>,
        options: &WriteOptions,
    ) -> WaterResult<()>
    where
        T: GdalType + Copy,
        P: AsRef<Path>,
    {
        log::info!("Writing GeoTIFF: {}", path.as_ref().display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = data.dim();

        let creation_options: Vec<RasterCreationOption> = options
            .compress
            .as_deref()
            .map(|value| RasterCreationOption {
                key: "COMPRESS",
                value,
            })
            .into_iter()
            .collect();

        let mut dataset = driver.create_with_band_type_with_options::<T, _>(
            path.as_ref(),
            width as isize,
            height as isize,
            1,
            &creation_options,
        )?;

        if let Some(georef) = georef {
            dataset.set_geo_transform(&georef.transform)?;
            dataset.set_projection(&georef.projection)?;
        }

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<T> = data.iter().copied().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        if let Some(no_data) = options.no_data {
            rasterband.set_no_data_value(Some(no_data))?;
        }
        if let Some(description) = &options.description {
            rasterband.set_description(description)?;
        }

        Ok(())
    }
}
