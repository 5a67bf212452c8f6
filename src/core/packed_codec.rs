//! Packed ancillary codec
//!
//! Six static layers share one 16-bit word per pixel:
//!
//! | bits          | layer                                   |
//! |---------------|-----------------------------------------|
//! | `0x0001`      | impervious surface                      |
//! | `0x0002`      | permanent water                         |
//! | `0x0004`      | DEM slope above cutoff (after override) |
//! | `0x0008-0040` | ancillary class, one-hot                |
//! | `0x0080-4000` | static seven-class, one-hot             |
//! | `0x8000`      | out of projection                       |
//!
//! Binary layers occupy one bit each. Categorical layers get one bit per
//! enumerated category, so decoding is a mask-equality test per category and
//! never arithmetic on the sub-range.

use crate::types::{
    ClassRaster, IntegrityViolation, PackedRaster, SlopeRaster, Theme, WaterError, WaterResult,
};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

pub const IMPERVIOUS_BIT: u16 = 0x0001;
pub const PERMANENT_WATER_BIT: u16 = 0x0002;
pub const SLOPE_BIT: u16 = 0x0004;

pub const ANC_LAND_BIT: u16 = 0x0008;
pub const ANC_WATER_BIT: u16 = 0x0010;
pub const ANC_OCEAN_BIT: u16 = 0x0020;
pub const ANC_NODATA_BIT: u16 = 0x0040;

pub const SC_SHALLOW_OCEAN_BIT: u16 = 0x0080;
pub const SC_LAND_BIT: u16 = 0x0100;
pub const SC_PARTIAL_LAND_0_BIT: u16 = 0x0200;
pub const SC_INLAND_BIT: u16 = 0x0400;
pub const SC_PARTIAL_LAND_1_BIT: u16 = 0x0800;
pub const SC_DEEP_INLAND_BIT: u16 = 0x1000;
pub const SC_MODERATE_OCEAN_BIT: u16 = 0x2000;
pub const SC_DEEP_OCEAN_BIT: u16 = 0x4000;

pub const OUT_OF_PROJECTION_BIT: u16 = 0x8000;

/// Sub-range holding the one-hot ancillary class
pub const ANCILLARY_MASK: u16 = 0x0078;

/// Sub-range holding the one-hot seven-class value
pub const SEVEN_CLASS_MASK: u16 = 0x7F80;

/// Seven-class value for pixels outside the projection
pub const SEVEN_CLASS_NODATA: u8 = 253;

/// Every theme mask in bit order
pub const ALL_MASKS: [u16; 16] = [
    IMPERVIOUS_BIT,
    PERMANENT_WATER_BIT,
    SLOPE_BIT,
    ANC_LAND_BIT,
    ANC_WATER_BIT,
    ANC_OCEAN_BIT,
    ANC_NODATA_BIT,
    SC_SHALLOW_OCEAN_BIT,
    SC_LAND_BIT,
    SC_PARTIAL_LAND_0_BIT,
    SC_INLAND_BIT,
    SC_PARTIAL_LAND_1_BIT,
    SC_DEEP_INLAND_BIT,
    SC_MODERATE_OCEAN_BIT,
    SC_DEEP_OCEAN_BIT,
    OUT_OF_PROJECTION_BIT,
];

/// Dynamic-water ancillary (biome) class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AncillaryClass {
    Land = 0,
    Water = 1,
    Ocean = 2,
    Fill = 9,
    OutOfProjection = 10,
}

impl AncillaryClass {
    /// Categories with a dedicated bit, in decode order
    pub const ENCODED: [AncillaryClass; 4] = [
        AncillaryClass::Land,
        AncillaryClass::Water,
        AncillaryClass::Ocean,
        AncillaryClass::OutOfProjection,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(AncillaryClass::Land),
            1 => Some(AncillaryClass::Water),
            2 => Some(AncillaryClass::Ocean),
            9 => Some(AncillaryClass::Fill),
            10 => Some(AncillaryClass::OutOfProjection),
            _ => None,
        }
    }

    /// Fill has no bit: it is what an empty sub-range decodes to
    pub fn bit(self) -> Option<u16> {
        match self {
            AncillaryClass::Land => Some(ANC_LAND_BIT),
            AncillaryClass::Water => Some(ANC_WATER_BIT),
            AncillaryClass::Ocean => Some(ANC_OCEAN_BIT),
            AncillaryClass::OutOfProjection => Some(ANC_NODATA_BIT),
            AncillaryClass::Fill => None,
        }
    }
}

/// Static seven-class water-body category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SevenClass {
    ShallowOcean = 0,
    Land = 1,
    PartialLand0 = 2,
    Inland = 3,
    PartialLand1 = 4,
    DeepInland = 5,
    ModerateOcean = 6,
    DeepOcean = 7,
}

impl SevenClass {
    pub const ALL: [SevenClass; 8] = [
        SevenClass::ShallowOcean,
        SevenClass::Land,
        SevenClass::PartialLand0,
        SevenClass::Inland,
        SevenClass::PartialLand1,
        SevenClass::DeepInland,
        SevenClass::ModerateOcean,
        SevenClass::DeepOcean,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn bit(self) -> u16 {
        SC_SHALLOW_OCEAN_BIT << (self as u16)
    }

    pub fn is_ocean(self) -> bool {
        matches!(
            self,
            SevenClass::ShallowOcean | SevenClass::ModerateOcean | SevenClass::DeepOcean
        )
    }
}

/// Parameters for building the packed layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingParams {
    /// DEM slope above which a pixel is flagged
    pub slope_cutoff: f32,
}

impl Default for PackingParams {
    fn default() -> Self {
        Self { slope_cutoff: 5.0 }
    }
}

/// The per-theme rasters a packed code is built from and decoded into
#[derive(Debug, Clone, PartialEq)]
pub struct AncillaryLayers {
    pub impervious: ClassRaster,
    pub permanent_water: ClassRaster,
    /// Slope-exceeds-cutoff flag, override already applied
    pub slope: ClassRaster,
    pub ancillary: ClassRaster,
    pub seven_class: ClassRaster,
    /// Derived from the seven-class nodata sentinel
    pub out_of_projection: ClassRaster,
}

impl AncillaryLayers {
    /// Assemble layers whose slope flag is already binary
    pub fn new(
        impervious: ClassRaster,
        permanent_water: ClassRaster,
        slope: ClassRaster,
        ancillary: ClassRaster,
        seven_class: ClassRaster,
    ) -> WaterResult<Self> {
        let shape = seven_class.dim();
        for (name, dim) in [
            ("impervious", impervious.dim()),
            ("permanent water", permanent_water.dim()),
            ("slope", slope.dim()),
            ("ancillary", ancillary.dim()),
        ] {
            if dim != shape {
                return Err(WaterError::ShapeMismatch {
                    name: name.to_string(),
                    expected: shape,
                    found: dim,
                });
            }
        }

        let out_of_projection = seven_class.mapv(|v| u8::from(v == SEVEN_CLASS_NODATA));

        Ok(Self {
            impervious,
            permanent_water,
            slope,
            ancillary,
            seven_class,
            out_of_projection,
        })
    }

    /// Assemble layers from a raw DEM slope raster
    pub fn from_sources(
        impervious: ClassRaster,
        permanent_water: ClassRaster,
        dem_slope: &SlopeRaster,
        ancillary: ClassRaster,
        seven_class: ClassRaster,
        params: &PackingParams,
    ) -> WaterResult<Self> {
        for (name, dim) in [("DEM slope", dem_slope.dim()), ("ancillary", ancillary.dim())] {
            if dim != seven_class.dim() {
                return Err(WaterError::ShapeMismatch {
                    name: name.to_string(),
                    expected: seven_class.dim(),
                    found: dim,
                });
            }
        }
        let slope = derive_slope_flag(dem_slope, &seven_class, &ancillary, params.slope_cutoff);
        Self::new(impervious, permanent_water, slope, ancillary, seven_class)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.seven_class.dim()
    }

    /// Raster of one theme
    pub fn theme(&self, theme: Theme) -> &ClassRaster {
        match theme {
            Theme::Impervious => &self.impervious,
            Theme::PermanentWater => &self.permanent_water,
            Theme::Slope => &self.slope,
            Theme::Ancillary => &self.ancillary,
            Theme::SevenClass => &self.seven_class,
        }
    }
}

/// Flag steep pixels, keeping the flag only where the static seven-class says
/// land and the ancillary says water.
pub fn derive_slope_flag(
    dem_slope: &SlopeRaster,
    seven_class: &ClassRaster,
    ancillary: &ClassRaster,
    cutoff: f32,
) -> ClassRaster {
    let land = SevenClass::Land.value();
    let water = AncillaryClass::Water.value();

    Zip::from(dem_slope)
        .and(seven_class)
        .and(ancillary)
        .map_collect(|&slope, &sc, &anc| {
            let steep = slope > cutoff;
            let overridden = sc != land || anc != water;
            u8::from(steep && !overridden)
        })
}

/// Result of decoding a packed raster
#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub layers: AncillaryLayers,
    /// Pixels whose code breaks the one-hot invariant
    pub violations: Vec<IntegrityViolation>,
}

impl DecodeReport {
    /// Per-pixel mask of integrity violations; coordinates off the raster
    /// are ignored
    pub fn violation_mask(&self) -> Array2<bool> {
        let mut mask = Array2::from_elem(self.layers.dim(), false);
        for v in &self.violations {
            if let Some(hit) = mask.get_mut([v.row, v.col]) {
                *hit = true;
            }
        }
        mask
    }

    /// Strict mode: turn any violation into an error
    pub fn ensure_clean(self) -> WaterResult<AncillaryLayers> {
        if self.violations.is_empty() {
            Ok(self.layers)
        } else {
            Err(WaterError::DataIntegrity {
                violations: self.violations,
            })
        }
    }
}

/// Encoder/decoder for the packed ancillary code
pub struct PackedCodec;

impl PackedCodec {
    /// Multiplex all layers into one packed raster
    pub fn encode(layers: &AncillaryLayers) -> PackedRaster {
        log::debug!("Encoding {:?} ancillary layers into packed codes", layers.dim());

        let mut packed = PackedRaster::zeros(layers.dim());

        or_positional(&mut packed, &layers.impervious, |v| binary_bit(v, IMPERVIOUS_BIT));
        or_positional(&mut packed, &layers.permanent_water, |v| {
            binary_bit(v, PERMANENT_WATER_BIT)
        });
        or_positional(&mut packed, &layers.slope, |v| binary_bit(v, SLOPE_BIT));

        // Values outside the enumerations are dropped
        or_positional(&mut packed, &layers.ancillary, |v| {
            AncillaryClass::from_value(v)
                .and_then(AncillaryClass::bit)
                .unwrap_or(0)
        });
        or_positional(&mut packed, &layers.seven_class, |v| {
            SevenClass::from_value(v).map(SevenClass::bit).unwrap_or(0)
        });

        or_positional(&mut packed, &layers.out_of_projection, |v| {
            binary_bit(v, OUT_OF_PROJECTION_BIT)
        });

        packed
    }

    /// 1 where every bit of `mask` is set, else 0
    pub fn decode_binary(packed: &PackedRaster, mask: u16) -> ClassRaster {
        map_codes(packed, move |code| u8::from(code & mask == mask))
    }

    /// Ancillary class per pixel; fails if any code has more than one
    /// ancillary bit set
    pub fn decode_ancillary(packed: &PackedRaster) -> WaterResult<ClassRaster> {
        ensure_one_hot(packed, ANCILLARY_MASK)?;
        Ok(decode_ancillary_lenient(packed))
    }

    /// Seven-class value per pixel; fails if any code has more than one
    /// seven-class bit set
    pub fn decode_seven_class(packed: &PackedRaster) -> WaterResult<ClassRaster> {
        ensure_one_hot(packed, SEVEN_CLASS_MASK)?;
        Ok(decode_seven_class_lenient(packed))
    }

    /// Decode a single theme
    pub fn decode_theme(packed: &PackedRaster, theme: Theme) -> WaterResult<ClassRaster> {
        match theme {
            Theme::Impervious => Ok(Self::decode_binary(packed, IMPERVIOUS_BIT)),
            Theme::PermanentWater => Ok(Self::decode_binary(packed, PERMANENT_WATER_BIT)),
            Theme::Slope => Ok(Self::decode_binary(packed, SLOPE_BIT)),
            Theme::Ancillary => Self::decode_ancillary(packed),
            Theme::SevenClass => Self::decode_seven_class(packed),
        }
    }

    /// Decode every theme and collect one-hot violations.
    ///
    /// Malformed pixels decode to the theme default (ancillary fill,
    /// seven-class 0) and are listed in the report.
    pub fn decode_all(packed: &PackedRaster) -> DecodeReport {
        let layers = AncillaryLayers {
            impervious: Self::decode_binary(packed, IMPERVIOUS_BIT),
            permanent_water: Self::decode_binary(packed, PERMANENT_WATER_BIT),
            slope: Self::decode_binary(packed, SLOPE_BIT),
            ancillary: decode_ancillary_lenient(packed),
            seven_class: decode_seven_class_lenient(packed),
            out_of_projection: Self::decode_binary(packed, OUT_OF_PROJECTION_BIT),
        };

        let violations = Self::find_violations(packed);
        if !violations.is_empty() {
            log::warn!(
                "{} packed code(s) break the one-hot invariant; first at ({}, {}) = {:#06x}",
                violations.len(),
                violations[0].row,
                violations[0].col,
                violations[0].code
            );
        }

        DecodeReport { layers, violations }
    }

    /// Pixels with more than one bit set inside a categorical sub-range
    pub fn find_violations(packed: &PackedRaster) -> Vec<IntegrityViolation> {
        let scan_row = |row: usize| {
            packed
                .row(row)
                .iter()
                .enumerate()
                .filter(|&(_, &code)| !is_well_formed(code))
                .map(move |(col, &code)| IntegrityViolation { row, col, code })
                .collect::<Vec<_>>()
        };

        #[cfg(feature = "parallel")]
        let violations = {
            use rayon::prelude::*;
            (0..packed.nrows())
                .into_par_iter()
                .flat_map_iter(scan_row)
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let violations = (0..packed.nrows()).flat_map(scan_row).collect();

        violations
    }
}

/// True when both categorical sub-ranges hold at most one set bit
pub fn is_well_formed(code: u16) -> bool {
    (code & ANCILLARY_MASK).count_ones() <= 1 && (code & SEVEN_CLASS_MASK).count_ones() <= 1
}

fn binary_bit(value: u8, bit: u16) -> u16 {
    if value == 1 {
        bit
    } else {
        0
    }
}

/// `None` when more than one ancillary bit is set
fn decode_ancillary_code(code: u16) -> Option<u8> {
    let bits = code & ANCILLARY_MASK;
    if bits == 0 {
        return Some(AncillaryClass::Fill.value());
    }
    AncillaryClass::ENCODED
        .iter()
        .find(|class| class.bit() == Some(bits))
        .map(|class| class.value())
}

/// `None` when more than one seven-class bit is set
fn decode_seven_class_code(code: u16) -> Option<u8> {
    let bits = code & SEVEN_CLASS_MASK;
    if bits == 0 {
        let oop = code & OUT_OF_PROJECTION_BIT == OUT_OF_PROJECTION_BIT;
        return Some(if oop { SEVEN_CLASS_NODATA } else { 0 });
    }
    SevenClass::ALL
        .iter()
        .find(|class| class.bit() == bits)
        .map(|class| class.value())
}

fn decode_ancillary_lenient(packed: &PackedRaster) -> ClassRaster {
    let fill = AncillaryClass::Fill.value();
    map_codes(packed, move |code| decode_ancillary_code(code).unwrap_or(fill))
}

fn decode_seven_class_lenient(packed: &PackedRaster) -> ClassRaster {
    map_codes(packed, |code| decode_seven_class_code(code).unwrap_or(0))
}

/// `DataIntegrity` listing every pixel with more than one bit inside `mask`
fn ensure_one_hot(packed: &PackedRaster, mask: u16) -> WaterResult<()> {
    let violations: Vec<IntegrityViolation> = packed
        .indexed_iter()
        .filter(|&(_, &code)| (code & mask).count_ones() > 1)
        .map(|((row, col), &code)| IntegrityViolation { row, col, code })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(WaterError::DataIntegrity { violations })
    }
}

fn or_positional<F>(packed: &mut PackedRaster, source: &ClassRaster, positional: F)
where
    F: Fn(u8) -> u16 + Sync + Send,
{
    let zip = Zip::from(packed).and(source);

    #[cfg(feature = "parallel")]
    zip.par_for_each(|code, &value| *code |= positional(value));

    #[cfg(not(feature = "parallel"))]
    zip.for_each(|code, &value| *code |= positional(value));
}

fn map_codes<F>(packed: &PackedRaster, decode: F) -> ClassRaster
where
    F: Fn(u16) -> u8 + Sync + Send,
{
    let zip = Zip::from(packed);

    #[cfg(feature = "parallel")]
    let decoded = zip.par_map_collect(|&code| decode(code));

    #[cfg(not(feature = "parallel"))]
    let decoded = zip.map_collect(|&code| decode(code));

    decoded
}
