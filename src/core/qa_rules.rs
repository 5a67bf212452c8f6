//! Annual QA rule engine
//!
//! Corrects the provisional annual water/land raster with the decoded static
//! layers, the annual observation counts and the fire-scar raster, and records
//! in a parallel QA raster which correction last touched each pixel.
//!
//! Rules run in a fixed order over whole-raster masks. Each rule reads the
//! *current* classification and QA state, so later rules see (and may undo)
//! what earlier rules wrote. The order in [`QA_RULES`] is part of the product
//! definition and must not change.

use crate::core::packed_codec::{AncillaryClass, AncillaryLayers, DecodeReport};
use crate::types::{
    ClassRaster, CountRaster, TileGrid, WaterError, WaterResult, LAND, OUT_OF_PROJECTION, WATER,
};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Diagnostic code written to the QA raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum QaCode {
    Unclassified = 0,
    HighConfidenceWater = 1,
    LowConfidenceWater = 2,
    LowConfidenceLand = 3,
    OceanMask = 4,
    OceanNoWater = 5,
    BurnScar = 6,
    Impervious = 7,
    Slope = 9,
    OutOfProjection = 10,
    /// Packed code broke the one-hot invariant; no rule was applied
    IntegrityViolation = 255,
}

impl QaCode {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Day-count thresholds used by the confidence rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaThresholds {
    /// Water days needed for low-confidence water
    pub low_confidence_water_days: i16,
    /// Water days needed for high-confidence water
    pub high_confidence_water_days: i16,
    /// Land days below which land is low-confidence
    pub low_confidence_land_days: i16,
}

impl Default for QaThresholds {
    fn default() -> Self {
        Self {
            low_confidence_water_days: 3,
            high_confidence_water_days: 6,
            low_confidence_land_days: 6,
        }
    }
}

/// Identity of each correction rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QaRuleKind {
    LowConfidenceWater,
    HighConfidenceWater,
    OceanMask,
    BurnScar,
    BurnScarFlipBack,
    SlopeCorrection,
    OceanNoWater,
    LowConfidenceLand,
    HighConfidenceLandFlipBack,
    ImperviousCorrection,
    OutOfProjection,
}

impl std::fmt::Display for QaRuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QaRuleKind::LowConfidenceWater => "low-confidence water",
            QaRuleKind::HighConfidenceWater => "high-confidence water",
            QaRuleKind::OceanMask => "ocean mask",
            QaRuleKind::BurnScar => "burn scar",
            QaRuleKind::BurnScarFlipBack => "burn-scar flip-back",
            QaRuleKind::SlopeCorrection => "slope correction",
            QaRuleKind::OceanNoWater => "ocean no-water",
            QaRuleKind::LowConfidenceLand => "low-confidence land",
            QaRuleKind::HighConfidenceLandFlipBack => "high-confidence land flip-back",
            QaRuleKind::ImperviousCorrection => "impervious correction",
            QaRuleKind::OutOfProjection => "out-of-projection",
        };
        write!(f, "{}", name)
    }
}

/// Everything a rule predicate can see for one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelState {
    /// Classification as corrected so far
    pub classification: u8,
    /// Classification as it stood before the burn-scar rule
    pub pre_burn_classification: u8,
    /// QA code as written so far
    pub qa_code: u8,
    pub water_days: i16,
    pub land_days: i16,
    pub burn_scar: bool,
    pub impervious: bool,
    pub slope: bool,
    pub ancillary: u8,
    pub out_of_projection: bool,
}

/// One correction step: a predicate plus the values it writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QaRule {
    pub kind: QaRuleKind,
    /// Classification written where the rule fires
    pub classification: Option<u8>,
    /// QA code written where the rule fires
    pub qa_code: Option<QaCode>,
}

impl QaRule {
    pub fn matches(&self, px: &PixelState, thresholds: &QaThresholds) -> bool {
        let anc_land = AncillaryClass::Land.value();
        let anc_water = AncillaryClass::Water.value();
        let anc_ocean = AncillaryClass::Ocean.value();

        match self.kind {
            QaRuleKind::LowConfidenceWater => {
                px.water_days >= thresholds.low_confidence_water_days && px.ancillary != anc_land
            }
            QaRuleKind::HighConfidenceWater => {
                px.classification == WATER
                    && px.water_days >= thresholds.high_confidence_water_days
                    && px.ancillary != anc_land
            }
            QaRuleKind::OceanMask => px.ancillary == anc_ocean,
            QaRuleKind::BurnScar => px.burn_scar,
            QaRuleKind::BurnScarFlipBack => {
                px.burn_scar && px.pre_burn_classification == WATER && px.ancillary == anc_water
            }
            QaRuleKind::SlopeCorrection => px.slope && px.classification == WATER,
            QaRuleKind::OceanNoWater => {
                px.classification == WATER
                    && px.water_days < thresholds.low_confidence_water_days
                    && px.ancillary == anc_ocean
            }
            // Only burn-scar and slope codes are protected here; codes 1-5 and
            // 7 are not.
            QaRuleKind::LowConfidenceLand => {
                px.classification == LAND
                    && px.land_days < thresholds.low_confidence_land_days
                    && px.ancillary != anc_ocean
                    && px.qa_code != QaCode::BurnScar.value()
                    && px.qa_code != QaCode::Slope.value()
            }
            QaRuleKind::HighConfidenceLandFlipBack => px.ancillary == anc_land,
            QaRuleKind::ImperviousCorrection => {
                px.impervious && px.classification == WATER && px.ancillary == anc_water
            }
            QaRuleKind::OutOfProjection => px.out_of_projection,
        }
    }
}

/// The correction sequence, in application order
pub const QA_RULES: [QaRule; 11] = [
    QaRule {
        kind: QaRuleKind::LowConfidenceWater,
        classification: Some(WATER),
        qa_code: Some(QaCode::LowConfidenceWater),
    },
    QaRule {
        kind: QaRuleKind::HighConfidenceWater,
        classification: Some(WATER),
        qa_code: Some(QaCode::HighConfidenceWater),
    },
    QaRule {
        kind: QaRuleKind::OceanMask,
        classification: Some(WATER),
        qa_code: Some(QaCode::OceanMask),
    },
    QaRule {
        kind: QaRuleKind::BurnScar,
        classification: Some(LAND),
        qa_code: Some(QaCode::BurnScar),
    },
    QaRule {
        kind: QaRuleKind::BurnScarFlipBack,
        classification: Some(WATER),
        qa_code: None,
    },
    QaRule {
        kind: QaRuleKind::SlopeCorrection,
        classification: Some(LAND),
        qa_code: Some(QaCode::Slope),
    },
    QaRule {
        kind: QaRuleKind::OceanNoWater,
        classification: None,
        qa_code: Some(QaCode::OceanNoWater),
    },
    QaRule {
        kind: QaRuleKind::LowConfidenceLand,
        classification: None,
        qa_code: Some(QaCode::LowConfidenceLand),
    },
    QaRule {
        kind: QaRuleKind::HighConfidenceLandFlipBack,
        classification: Some(LAND),
        qa_code: None,
    },
    QaRule {
        kind: QaRuleKind::ImperviousCorrection,
        classification: Some(LAND),
        qa_code: Some(QaCode::Impervious),
    },
    QaRule {
        kind: QaRuleKind::OutOfProjection,
        classification: Some(OUT_OF_PROJECTION),
        qa_code: Some(QaCode::OutOfProjection),
    },
];

/// Annual observation counts from the temporal compositor
#[derive(Debug, Clone)]
pub struct AnnualStatistics {
    pub water_days: CountRaster,
    pub land_days: CountRaster,
}

/// Per-run diagnostics
#[derive(Debug, Clone, Default)]
pub struct QaSummary {
    /// Pixels each rule fired on, in application order
    pub rule_hits: Vec<(QaRuleKind, usize)>,
    /// Final pixel count per QA code
    pub qa_histogram: BTreeMap<u8, usize>,
    pub integrity_violations: usize,
}

impl QaSummary {
    pub fn hits(&self, kind: QaRuleKind) -> usize {
        self.rule_hits
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Corrected classification and QA rasters
#[derive(Debug, Clone)]
pub struct QaOutcome {
    pub classification: ClassRaster,
    pub qa: ClassRaster,
    pub summary: QaSummary,
}

/// Read-only per-run inputs
struct RuleInputs<'a> {
    layers: &'a AncillaryLayers,
    stats: &'a AnnualStatistics,
    burn_scar: &'a ClassRaster,
    excluded: &'a Array2<bool>,
}

impl RuleInputs<'_> {
    fn pixel(
        &self,
        i: usize,
        j: usize,
        classification: &ClassRaster,
        pre_burn: &ClassRaster,
        qa: &ClassRaster,
    ) -> PixelState {
        PixelState {
            classification: classification[[i, j]],
            pre_burn_classification: pre_burn[[i, j]],
            qa_code: qa[[i, j]],
            water_days: self.stats.water_days[[i, j]],
            land_days: self.stats.land_days[[i, j]],
            burn_scar: self.burn_scar[[i, j]] == 1,
            impervious: self.layers.impervious[[i, j]] == 1,
            slope: self.layers.slope[[i, j]] == 1,
            ancillary: self.layers.ancillary[[i, j]],
            out_of_projection: self.layers.out_of_projection[[i, j]] == 1,
        }
    }
}

/// Applies [`QA_RULES`] to one tile
pub struct QaRuleEngine {
    grid: TileGrid,
    thresholds: QaThresholds,
}

impl QaRuleEngine {
    pub fn new(grid: TileGrid, thresholds: QaThresholds) -> Self {
        Self { grid, thresholds }
    }

    /// Engine with the production thresholds
    pub fn standard(grid: TileGrid) -> Self {
        Self::new(grid, QaThresholds::default())
    }

    pub fn rules(&self) -> &'static [QaRule] {
        &QA_RULES
    }

    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    pub fn thresholds(&self) -> &QaThresholds {
        &self.thresholds
    }

    /// Run every rule in order and return the corrected rasters.
    ///
    /// Inputs are not modified. Pixels listed in `decoded.violations` are left
    /// at their provisional classification and get
    /// [`QaCode::IntegrityViolation`].
    pub fn run(
        &self,
        decoded: &DecodeReport,
        provisional: &ClassRaster,
        stats: &AnnualStatistics,
        burn_scar: &ClassRaster,
    ) -> WaterResult<QaOutcome> {
        self.grid.ensure_shape("provisional classification", provisional.dim())?;
        self.ensure_decoded_shape(decoded)?;
        self.grid.ensure_shape("water day count", stats.water_days.dim())?;
        self.grid.ensure_shape("land day count", stats.land_days.dim())?;
        self.grid.ensure_shape("fire scar", burn_scar.dim())?;

        log::info!("Applying {} QA rules to {:?} grid", QA_RULES.len(), self.grid.shape());

        let excluded = decoded.violation_mask();
        let inputs = RuleInputs {
            layers: &decoded.layers,
            stats,
            burn_scar,
            excluded: &excluded,
        };

        let mut classification = provisional.clone();
        let mut qa = ClassRaster::zeros(provisional.dim());
        let mut pre_burn: Option<ClassRaster> = None;
        let mut rule_hits = Vec::with_capacity(QA_RULES.len());

        for (step, rule) in QA_RULES.iter().enumerate() {
            if rule.kind == QaRuleKind::BurnScar {
                pre_burn = Some(classification.clone());
            }

            let mask = self.rule_mask(
                rule,
                &inputs,
                &classification,
                pre_burn.as_ref().unwrap_or(&classification),
                &qa,
            );
            let hits = apply_rule(rule, &mask, &mut classification, &mut qa);

            log::debug!("QA rule {} ({}): {} pixel(s)", step + 1, rule.kind, hits);
            rule_hits.push((rule.kind, hits));
        }

        let integrity_code = QaCode::IntegrityViolation.value();
        Zip::from(&mut qa).and(&excluded).for_each(|q, &bad| {
            if bad {
                *q = integrity_code;
            }
        });

        let mut qa_histogram = BTreeMap::new();
        for &code in qa.iter() {
            *qa_histogram.entry(code).or_insert(0) += 1;
        }

        let summary = QaSummary {
            rule_hits,
            qa_histogram,
            integrity_violations: decoded.violations.len(),
        };

        if summary.integrity_violations > 0 {
            log::warn!(
                "{} pixel(s) skipped QA because their packed code is malformed",
                summary.integrity_violations
            );
        }

        Ok(QaOutcome {
            classification,
            qa,
            summary,
        })
    }

    /// Every decoded layer on the grid and every violation inside it
    fn ensure_decoded_shape(&self, decoded: &DecodeReport) -> WaterResult<()> {
        let layers = &decoded.layers;
        for (name, dim) in [
            ("decoded impervious", layers.impervious.dim()),
            ("decoded permanent water", layers.permanent_water.dim()),
            ("decoded slope", layers.slope.dim()),
            ("decoded ancillary", layers.ancillary.dim()),
            ("decoded seven-class", layers.seven_class.dim()),
            ("decoded out-of-projection", layers.out_of_projection.dim()),
        ] {
            self.grid.ensure_shape(name, dim)?;
        }

        let (rows, cols) = self.grid.shape();
        if let Some(v) = decoded.violations.iter().find(|v| v.row >= rows || v.col >= cols) {
            return Err(WaterError::ShapeMismatch {
                name: format!("integrity violation at ({}, {})", v.row, v.col),
                expected: (rows, cols),
                found: (v.row + 1, v.col + 1),
            });
        }
        Ok(())
    }

    /// Whole-raster boolean mask of where `rule` fires
    fn rule_mask(
        &self,
        rule: &QaRule,
        inputs: &RuleInputs<'_>,
        classification: &ClassRaster,
        pre_burn: &ClassRaster,
        qa: &ClassRaster,
    ) -> Array2<bool> {
        let thresholds = &self.thresholds;
        let mut mask = Array2::from_elem(classification.dim(), false);

        let evaluate = |(i, j): (usize, usize), hit: &mut bool| {
            if inputs.excluded[[i, j]] {
                return;
            }
            let px = inputs.pixel(i, j, classification, pre_burn, qa);
            *hit = rule.matches(&px, thresholds);
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut mask).par_for_each(evaluate);

        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut mask).for_each(evaluate);

        mask
    }
}

fn apply_rule(
    rule: &QaRule,
    mask: &Array2<bool>,
    classification: &mut ClassRaster,
    qa: &mut ClassRaster,
) -> usize {
    let mut hits = 0;
    Zip::from(classification)
        .and(qa)
        .and(mask)
        .for_each(|class, code, &hit| {
            if !hit {
                return;
            }
            hits += 1;
            if let Some(value) = rule.classification {
                *class = value;
            }
            if let Some(qa_code) = rule.qa_code {
                *code = qa_code.value();
            }
        });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packed_codec::{PackedCodec, SevenClass, SEVEN_CLASS_NODATA};
    use crate::types::IntegrityViolation;
    use ndarray::{array, Array2};

    const ANC_LAND: u8 = 0;
    const ANC_WATER: u8 = 1;
    const ANC_OCEAN: u8 = 2;

    #[derive(Clone, Copy)]
    struct Pixel {
        classification: u8,
        water_days: i16,
        land_days: i16,
        burn: u8,
        impervious: u8,
        slope: u8,
        ancillary: u8,
        seven_class: u8,
    }

    impl Default for Pixel {
        fn default() -> Self {
            Self {
                classification: LAND,
                water_days: 0,
                land_days: 20,
                burn: 0,
                impervious: 0,
                slope: 0,
                ancillary: ANC_WATER,
                seven_class: SevenClass::Land.value(),
            }
        }
    }

    fn row<T: Clone>(pixels: &[Pixel], f: impl Fn(&Pixel) -> T) -> Array2<T> {
        Array2::from_shape_vec((1, pixels.len()), pixels.iter().map(f).collect()).unwrap()
    }

    fn run(pixels: &[Pixel]) -> QaOutcome {
        run_with_violations(pixels, Vec::new())
    }

    fn run_with_violations(pixels: &[Pixel], violations: Vec<IntegrityViolation>) -> QaOutcome {
        let layers = AncillaryLayers::new(
            row(pixels, |p| p.impervious),
            row(pixels, |_| 0u8),
            row(pixels, |p| p.slope),
            row(pixels, |p| p.ancillary),
            row(pixels, |p| p.seven_class),
        )
        .unwrap();
        let decoded = DecodeReport { layers, violations };
        let stats = AnnualStatistics {
            water_days: row(pixels, |p| p.water_days),
            land_days: row(pixels, |p| p.land_days),
        };

        let engine = QaRuleEngine::standard(TileGrid::new(1, pixels.len()));
        engine
            .run(
                &decoded,
                &row(pixels, |p| p.classification),
                &stats,
                &row(pixels, |p| p.burn),
            )
            .unwrap()
    }

    fn single(pixel: Pixel) -> (u8, u8) {
        let outcome = run(&[pixel]);
        (outcome.classification[[0, 0]], outcome.qa[[0, 0]])
    }

    #[test]
    fn test_rule_order_is_fixed() {
        let kinds: Vec<QaRuleKind> = QA_RULES.iter().map(|r| r.kind).collect();
        assert_eq!(kinds.first(), Some(&QaRuleKind::LowConfidenceWater));
        assert_eq!(kinds.last(), Some(&QaRuleKind::OutOfProjection));

        let burn = kinds.iter().position(|k| *k == QaRuleKind::BurnScar).unwrap();
        let flip = kinds.iter().position(|k| *k == QaRuleKind::BurnScarFlipBack).unwrap();
        assert_eq!(flip, burn + 1);
    }

    #[test]
    fn test_untouched_land_pixel() {
        assert_eq!(single(Pixel::default()), (LAND, QaCode::Unclassified.value()));
    }

    #[test]
    fn test_low_confidence_water() {
        let px = Pixel {
            water_days: 4,
            ..Pixel::default()
        };
        assert_eq!(single(px), (WATER, QaCode::LowConfidenceWater.value()));

        // ancillary land blocks both water rules, then flips back to land
        let px = Pixel {
            water_days: 4,
            ancillary: ANC_LAND,
            ..Pixel::default()
        };
        assert_eq!(single(px), (LAND, QaCode::Unclassified.value()));
    }

    #[test]
    fn test_high_confidence_water() {
        let px = Pixel {
            classification: WATER,
            water_days: 6,
            ..Pixel::default()
        };
        assert_eq!(single(px), (WATER, QaCode::HighConfidenceWater.value()));
    }

    #[test]
    fn test_ocean_mask_and_ocean_no_water() {
        let confident = Pixel {
            water_days: 5,
            ancillary: ANC_OCEAN,
            seven_class: SevenClass::DeepOcean.value(),
            ..Pixel::default()
        };
        assert_eq!(single(confident), (WATER, QaCode::OceanMask.value()));

        let unobserved = Pixel {
            water_days: 1,
            ..confident
        };
        assert_eq!(single(unobserved), (WATER, QaCode::OceanNoWater.value()));
    }

    #[test]
    fn test_burn_scar_flip_back_overrides_burn_scar() {
        let px = Pixel {
            classification: WATER,
            water_days: 10,
            burn: 1,
            ..Pixel::default()
        };
        let outcome = run(&[px]);
        assert_eq!(outcome.classification[[0, 0]], WATER);
        assert_eq!(outcome.qa[[0, 0]], QaCode::BurnScar.value());
        assert_eq!(outcome.summary.hits(QaRuleKind::BurnScar), 1);
        assert_eq!(outcome.summary.hits(QaRuleKind::BurnScarFlipBack), 1);
    }

    #[test]
    fn test_burn_scar_without_flip_back() {
        // pre-burn classification is land, so the flip-back does not fire and
        // the burn-scar code also shields it from the low-confidence land rule
        let px = Pixel {
            land_days: 2,
            burn: 1,
            ..Pixel::default()
        };
        assert_eq!(single(px), (LAND, QaCode::BurnScar.value()));
    }

    #[test]
    fn test_slope_correction_keeps_its_code() {
        let px = Pixel {
            classification: WATER,
            water_days: 8,
            land_days: 1,
            slope: 1,
            ..Pixel::default()
        };
        assert_eq!(single(px), (LAND, QaCode::Slope.value()));
    }

    #[test]
    fn test_low_confidence_land() {
        let px = Pixel {
            land_days: 5,
            ..Pixel::default()
        };
        assert_eq!(single(px), (LAND, QaCode::LowConfidenceLand.value()));

        let confident = Pixel {
            land_days: 6,
            ..Pixel::default()
        };
        assert_eq!(single(confident), (LAND, QaCode::Unclassified.value()));
    }

    #[test]
    fn test_low_confidence_land_guard_is_asymmetric() {
        // The guard protects codes 6 and 9 only. A land pixel already coded 2
        // is still overwritten; kept as-is pending a product decision.
        let rule = QA_RULES
            .iter()
            .find(|r| r.kind == QaRuleKind::LowConfidenceLand)
            .unwrap();
        let thresholds = QaThresholds::default();
        let base = PixelState {
            classification: LAND,
            pre_burn_classification: LAND,
            qa_code: QaCode::LowConfidenceWater.value(),
            water_days: 0,
            land_days: 1,
            burn_scar: false,
            impervious: false,
            slope: false,
            ancillary: ANC_WATER,
            out_of_projection: false,
        };

        assert!(rule.matches(&base, &thresholds));
        for protected in [QaCode::BurnScar, QaCode::Slope] {
            let px = PixelState {
                qa_code: protected.value(),
                ..base
            };
            assert!(!rule.matches(&px, &thresholds));
        }
    }

    #[test]
    fn test_high_confidence_land_flip_back() {
        let px = Pixel {
            classification: WATER,
            water_days: 10,
            ancillary: ANC_LAND,
            ..Pixel::default()
        };
        assert_eq!(single(px), (LAND, QaCode::Unclassified.value()));
    }

    #[test]
    fn test_impervious_correction() {
        let px = Pixel {
            classification: WATER,
            water_days: 10,
            impervious: 1,
            ..Pixel::default()
        };
        assert_eq!(single(px), (LAND, QaCode::Impervious.value()));
    }

    #[test]
    fn test_out_of_projection_wins() {
        let px = Pixel {
            classification: WATER,
            water_days: 10,
            burn: 1,
            impervious: 1,
            slope: 1,
            ancillary: ANC_WATER,
            seven_class: SEVEN_CLASS_NODATA,
            ..Pixel::default()
        };
        assert_eq!(single(px), (OUT_OF_PROJECTION, QaCode::OutOfProjection.value()));
    }

    #[test]
    fn test_integrity_violation_skips_rules() {
        let px = Pixel {
            classification: WATER,
            water_days: 10,
            burn: 1,
            ..Pixel::default()
        };
        let violation = IntegrityViolation {
            row: 0,
            col: 1,
            code: 0x0018,
        };
        let outcome = run_with_violations(&[px, px], vec![violation]);

        assert_eq!(outcome.qa[[0, 0]], QaCode::BurnScar.value());
        assert_eq!(outcome.classification[[0, 1]], WATER);
        assert_eq!(outcome.qa[[0, 1]], QaCode::IntegrityViolation.value());
        assert_eq!(outcome.summary.integrity_violations, 1);
        assert_eq!(outcome.summary.hits(QaRuleKind::BurnScar), 1);
    }

    #[test]
    fn test_run_is_deterministic_and_pure() {
        let pixels = [
            Pixel::default(),
            Pixel {
                water_days: 7,
                classification: WATER,
                ..Pixel::default()
            },
            Pixel {
                ancillary: ANC_OCEAN,
                ..Pixel::default()
            },
        ];
        let first = run(&pixels);
        let second = run(&pixels);
        assert_eq!(first.classification, second.classification);
        assert_eq!(first.qa, second.qa);
        assert_eq!(first.summary.qa_histogram, second.summary.qa_histogram);
        assert_eq!(first.summary.qa_histogram.values().sum::<usize>(), pixels.len());
    }

    #[test]
    fn test_shape_mismatch_rejected_before_processing() {
        let layers = AncillaryLayers::new(
            ClassRaster::zeros((2, 2)),
            ClassRaster::zeros((2, 2)),
            ClassRaster::zeros((2, 2)),
            ClassRaster::zeros((2, 2)),
            ClassRaster::zeros((2, 2)),
        )
        .unwrap();
        let decoded = DecodeReport {
            layers,
            violations: Vec::new(),
        };
        let stats = AnnualStatistics {
            water_days: CountRaster::zeros((2, 2)),
            land_days: CountRaster::zeros((2, 2)),
        };

        let engine = QaRuleEngine::standard(TileGrid::new(2, 2));
        let result = engine.run(
            &decoded,
            &ClassRaster::zeros((2, 2)),
            &stats,
            &ClassRaster::zeros((3, 2)),
        );
        assert!(matches!(
            result,
            Err(WaterError::ShapeMismatch { .. })
        ));
    }

    fn clean_inputs(n: usize) -> (AnnualStatistics, ClassRaster) {
        let stats = AnnualStatistics {
            water_days: CountRaster::zeros((1, n)),
            land_days: CountRaster::zeros((1, n)),
        };
        (stats, ClassRaster::zeros((1, n)))
    }

    #[test]
    fn test_mis_shaped_decoded_layer_is_an_error() {
        let mut decoded = PackedCodec::decode_all(&array![[0u16, 0]]);
        decoded.layers.slope = ClassRaster::zeros((1, 3));
        let (stats, zeros) = clean_inputs(2);

        let engine = QaRuleEngine::standard(TileGrid::new(1, 2));
        let result = engine.run(&decoded, &zeros, &stats, &zeros);
        match result {
            Err(WaterError::ShapeMismatch { name, found, .. }) => {
                assert_eq!(name, "decoded slope");
                assert_eq!(found, (1, 3));
            }
            other => panic!("Expected shape mismatch, got {:?}", other.map(|o| o.qa)),
        }
    }

    #[test]
    fn test_violation_outside_grid_is_an_error() {
        let mut decoded = PackedCodec::decode_all(&array![[0u16, 0]]);
        decoded.violations.push(IntegrityViolation {
            row: 4,
            col: 0,
            code: 0x0018,
        });
        let (stats, zeros) = clean_inputs(2);

        // no panic from the violation mask either
        assert_eq!(decoded.violation_mask(), array![[false, false]]);

        let engine = QaRuleEngine::standard(TileGrid::new(1, 2));
        let result = engine.run(&decoded, &zeros, &stats, &zeros);
        assert!(matches!(result, Err(WaterError::ShapeMismatch { .. })));
    }
}
