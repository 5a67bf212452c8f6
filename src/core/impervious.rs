use crate::types::ClassRaster;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Parameters for turning an impervious-percentage raster into a binary mask
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImperviousParams {
    /// Lowest percentage counted as impervious (inclusive)
    pub floor_percent: u8,
    /// Highest percentage counted as impervious (inclusive)
    pub ceil_percent: u8,
}

impl Default for ImperviousParams {
    fn default() -> Self {
        Self {
            floor_percent: 75,
            ceil_percent: 100,
        }
    }
}

/// Impervious surface thresholding
pub struct ImperviousMask {
    params: ImperviousParams,
}

impl ImperviousMask {
    pub fn new(params: ImperviousParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(ImperviousParams::default())
    }

    /// Threshold a percentage raster, then buffer the permeable pixels out by
    /// one pixel so impervious patches shrink at their edges.
    ///
    /// Nodata (255) falls outside the range and counts as permeable.
    pub fn threshold_percentage(&self, percentage: &ClassRaster) -> ClassRaster {
        let floor = self.params.floor_percent;
        let ceil = self.params.ceil_percent;

        let permeable = percentage.mapv(|pct| u8::from(!(floor..=ceil).contains(&pct)));
        let buffered = Self::dilate_cross(&permeable);

        let impervious = buffered.mapv(|v| v ^ 1);
        log::debug!(
            "Impervious mask: {} of {} pixels impervious",
            impervious.iter().filter(|&&v| v == 1).count(),
            impervious.len()
        );
        impervious
    }

    /// Binary dilation with the 4-neighbour cross, centre excluded.
    ///
    /// A pixel is set when any in-bounds up/down/left/right neighbour is set;
    /// its own value does not count and the border is treated as unset.
    fn dilate_cross(binary: &ClassRaster) -> ClassRaster {
        let (rows, cols) = binary.dim();
        let mut dilated = Array2::<u8>::zeros((rows, cols));

        Zip::indexed(&mut dilated).for_each(|(i, j), out| {
            let up = i > 0 && binary[[i - 1, j]] == 1;
            let down = i + 1 < rows && binary[[i + 1, j]] == 1;
            let left = j > 0 && binary[[i, j - 1]] == 1;
            let right = j + 1 < cols && binary[[i, j + 1]] == 1;
            *out = u8::from(up || down || left || right);
        });

        dilated
    }
}

impl Default for ImperviousMask {
    fn default() -> Self {
        Self::standard()
    }
}
