//! Parameter distribution strategies.
//!
//! A strategy turns the flat vector proposed by the search driver into the
//! parameter field the simulation engine consumes.

use ndarray::{Array2, Array3, ArrayView2};

/// Parameters in the layout the simulation engine expects.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterField {
    /// One value per parameter for the whole catchment.
    Lumped(Vec<f64>),
    /// Per-cell parameters (row x col x parameter), NaN outside the catchment.
    Distributed(Array3<f64>),
}

impl ParameterField {
    pub fn as_distributed(&self) -> Option<&Array3<f64>> {
        match self {
            ParameterField::Distributed(field) => Some(field),
            ParameterField::Lumped(_) => None,
        }
    }

    /// Parameters of one cell. Lumped fields answer the same vector for every cell.
    pub fn cell(&self, row: usize, col: usize) -> Option<Vec<f64>> {
        match self {
            ParameterField::Lumped(values) => Some(values.clone()),
            ParameterField::Distributed(field) => {
                let (rows, cols, _) = field.dim();
                if row >= rows || col >= cols {
                    return None;
                }
                Some(field.slice(ndarray::s![row, col, ..]).to_vec())
            }
        }
    }
}

/// Muskingum storage constant limits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MuskingumBounds {
    klb: f64,
    kub: f64,
}

impl MuskingumBounds {
    pub const X_MIN: f64 = 0.0;
    pub const X_MAX: f64 = 0.5;

    pub fn new(klb: f64, kub: f64) -> Result<Self, DistributionError> {
        if !(klb.is_finite() && kub.is_finite()) || klb > kub {
            return Err(DistributionError::InvalidBounds(format!(
                "Muskingum K bounds [{klb}, {kub}] are not an interval"
            )));
        }
        Ok(Self { klb, kub })
    }

    pub fn klb(&self) -> f64 {
        self.klb
    }

    pub fn kub(&self) -> f64 {
        self.kub
    }

    fn clamp_k(&self, k: f64) -> f64 {
        k.clamp(self.klb, self.kub)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DistributionError {
    #[error("expected {expected} parameters, got {got}")]
    Length { expected: usize, got: usize },

    #[error("invalid parameter layout: {0}")]
    Layout(String),

    #[error("{0}")]
    InvalidBounds(String),
}

/// Maps a flat parameter vector onto the catchment.
pub trait SpatialVariation: Send + Sync {
    /// Length of the flat vector the search driver must propose.
    fn parameter_count(&self) -> usize;

    /// Grid the field is laid out on.
    fn shape(&self) -> (usize, usize);

    /// Muskingum K limits this strategy applies by default.
    fn muskingum_bounds(&self) -> Option<MuskingumBounds> {
        None
    }

    fn distribute_with(
        &self,
        params: &[f64],
        k_bounds: Option<MuskingumBounds>,
    ) -> Result<ParameterField, DistributionError>;

    fn distribute(&self, params: &[f64]) -> Result<ParameterField, DistributionError> {
        self.distribute_with(params, self.muskingum_bounds())
    }
}

/// Catchment mask from a raster: finite cells are active.
pub fn active_cells(grid: ArrayView2<'_, f64>) -> Array2<bool> {
    grid.mapv(f64::is_finite)
}

fn active_count(mask: &Array2<bool>) -> usize {
    mask.iter().filter(|&&active| active).count()
}

fn check_length(expected: usize, params: &[f64]) -> Result<(), DistributionError> {
    if params.len() != expected {
        return Err(DistributionError::Length {
            expected,
            got: params.len(),
        });
    }
    Ok(())
}

/// Same parameter vector in every active cell.
#[derive(Clone, Debug)]
pub struct LumpedVariation {
    mask: Array2<bool>,
    n_params: usize,
}

impl LumpedVariation {
    pub fn new(mask: Array2<bool>, n_params: usize) -> Self {
        Self { mask, n_params }
    }
}

impl SpatialVariation for LumpedVariation {
    fn parameter_count(&self) -> usize {
        self.n_params
    }

    fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    fn distribute_with(
        &self,
        params: &[f64],
        _k_bounds: Option<MuskingumBounds>,
    ) -> Result<ParameterField, DistributionError> {
        check_length(self.n_params, params)?;
        let (rows, cols) = self.mask.dim();
        let mut field = Array3::from_elem((rows, cols, self.n_params), f64::NAN);
        for ((row, col), &active) in self.mask.indexed_iter() {
            if active {
                for (p, &value) in params.iter().enumerate() {
                    field[[row, col, p]] = value;
                }
            }
        }
        Ok(ParameterField::Distributed(field))
    }
}

/// Per-cell HBV parameters with some of them shared across the catchment.
///
/// Flat layout: the distributed parameters of each active cell in row-major
/// order, followed by the shared ones. Shared values are inserted at their
/// positions within every cell's parameter vector.
#[derive(Clone, Debug)]
pub struct HbvVariation {
    mask: Array2<bool>,
    n_distributed: usize,
    lumped_positions: Vec<usize>,
    n_active: usize,
}

impl HbvVariation {
    pub fn new(
        mask: Array2<bool>,
        n_distributed: usize,
        mut lumped_positions: Vec<usize>,
    ) -> Result<Self, DistributionError> {
        lumped_positions.sort_unstable();
        let per_cell = n_distributed + lumped_positions.len();
        if lumped_positions.windows(2).any(|w| w[0] == w[1]) {
            return Err(DistributionError::Layout(
                "shared parameter positions repeat".into(),
            ));
        }
        if let Some(&last) = lumped_positions.last() {
            if last >= per_cell {
                return Err(DistributionError::Layout(format!(
                    "shared parameter position {last} outside a cell vector of {per_cell}"
                )));
            }
        }
        let n_active = active_count(&mask);
        Ok(Self {
            mask,
            n_distributed,
            lumped_positions,
            n_active,
        })
    }

    /// Fully distributed: no shared parameters.
    pub fn distributed(mask: Array2<bool>, n_params: usize) -> Self {
        let n_active = active_count(&mask);
        Self {
            mask,
            n_distributed: n_params,
            lumped_positions: Vec::new(),
            n_active,
        }
    }

    pub fn per_cell(&self) -> usize {
        self.n_distributed + self.lumped_positions.len()
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    fn fill(&self, params: &[f64]) -> Result<Array3<f64>, DistributionError> {
        check_length(self.parameter_count(), params)?;
        let (rows, cols) = self.mask.dim();
        let per_cell = self.per_cell();
        let (distributed, shared) = params.split_at(self.n_active * self.n_distributed);

        let mut field = Array3::from_elem((rows, cols, per_cell), f64::NAN);
        let mut cells = distributed.chunks_exact(self.n_distributed.max(1));
        for ((row, col), &active) in self.mask.indexed_iter() {
            if !active {
                continue;
            }
            let own: &[f64] = if self.n_distributed == 0 {
                &[]
            } else {
                cells.next().unwrap_or(&[])
            };
            let mut own = own.iter();
            let mut shared_iter = self.lumped_positions.iter().zip(shared).peekable();
            for p in 0..per_cell {
                let value = match shared_iter.peek() {
                    Some(&(&pos, &v)) if pos == p => {
                        shared_iter.next();
                        v
                    }
                    _ => own.next().copied().unwrap_or(f64::NAN),
                };
                field[[row, col, p]] = value;
            }
        }
        Ok(field)
    }
}

impl SpatialVariation for HbvVariation {
    fn parameter_count(&self) -> usize {
        self.n_active * self.n_distributed + self.lumped_positions.len()
    }

    fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    fn distribute_with(
        &self,
        params: &[f64],
        _k_bounds: Option<MuskingumBounds>,
    ) -> Result<ParameterField, DistributionError> {
        self.fill(params).map(ParameterField::Distributed)
    }
}

/// HBV distribution whose last two cell parameters may be Muskingum K and X.
#[derive(Clone, Debug)]
pub struct RoutingVariation {
    inner: HbvVariation,
    muskingum: bool,
    bounds: MuskingumBounds,
}

impl RoutingVariation {
    pub fn new(
        inner: HbvVariation,
        muskingum: bool,
        bounds: MuskingumBounds,
    ) -> Result<Self, DistributionError> {
        if muskingum && inner.per_cell() < 2 {
            return Err(DistributionError::Layout(
                "Muskingum routing needs at least two parameters per cell".into(),
            ));
        }
        Ok(Self {
            inner,
            muskingum,
            bounds,
        })
    }
}

impl SpatialVariation for RoutingVariation {
    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn shape(&self) -> (usize, usize) {
        self.inner.shape()
    }

    fn muskingum_bounds(&self) -> Option<MuskingumBounds> {
        self.muskingum.then_some(self.bounds)
    }

    fn distribute_with(
        &self,
        params: &[f64],
        k_bounds: Option<MuskingumBounds>,
    ) -> Result<ParameterField, DistributionError> {
        let mut field = self.inner.fill(params)?;
        if !self.muskingum {
            return Ok(ParameterField::Distributed(field));
        }

        let bounds = k_bounds.unwrap_or(self.bounds);
        let per_cell = self.inner.per_cell();
        let (k_idx, x_idx) = (per_cell - 2, per_cell - 1);
        for ((row, col), &active) in self.inner.mask().indexed_iter() {
            if active {
                let k = field[[row, col, k_idx]];
                let x = field[[row, col, x_idx]];
                field[[row, col, k_idx]] = bounds.clamp_k(k);
                field[[row, col, x_idx]] = x.clamp(MuskingumBounds::X_MIN, MuskingumBounds::X_MAX);
            }
        }
        Ok(ParameterField::Distributed(field))
    }
}
