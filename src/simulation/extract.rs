use crate::core::GaugeTable;
use ndarray::{Array2, Array3, Axis, s};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("discharge buffer is {found_rows} x {found_cols}, expected {rows} x {cols}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("gauge '{id}' at ({row}, {col}) is outside the discharge buffer")]
    GaugeOutOfBounds { id: String, row: usize, col: usize },

    #[error("{got} discharge factors for {expected} gauges")]
    FactorCount { expected: usize, got: usize },

    #[error("discharge buffer has no timesteps")]
    EmptyBuffer,
}

/// Gauge hydrographs from the gridded total discharge.
///
/// Returns a `(timesteps - 1) x gauges` table; the final raw timestep is
/// dropped. Column `i` is scaled by `factors[i]` when factors are given. An
/// empty factor list is the same as none.
pub fn extract_discharge(
    total: &Array3<f64>,
    gauges: &GaugeTable,
    rows: usize,
    cols: usize,
    factors: Option<&[f64]>,
) -> Result<Array2<f64>, ExtractionError> {
    let (found_rows, found_cols, timesteps) = total.dim();
    if (found_rows, found_cols) != (rows, cols) {
        return Err(ExtractionError::ShapeMismatch {
            rows,
            cols,
            found_rows,
            found_cols,
        });
    }
    if timesteps == 0 {
        return Err(ExtractionError::EmptyBuffer);
    }

    let factors = factors.filter(|f| !f.is_empty());
    if let Some(f) = factors {
        if f.len() != gauges.len() {
            return Err(ExtractionError::FactorCount {
                expected: gauges.len(),
                got: f.len(),
            });
        }
    }

    let mut table = Array2::zeros((timesteps - 1, gauges.len()));
    for (i, (gauge, mut column)) in gauges
        .iter()
        .zip(table.axis_iter_mut(Axis(1)))
        .enumerate()
    {
        if gauge.cell_row >= rows || gauge.cell_col >= cols {
            return Err(ExtractionError::GaugeOutOfBounds {
                id: gauge.id.clone(),
                row: gauge.cell_row,
                col: gauge.cell_col,
            });
        }
        let series = total.slice(s![gauge.cell_row, gauge.cell_col, ..timesteps - 1]);
        match factors {
            Some(f) => column.assign(&series.mapv(|q| q * f[i])),
            None => column.assign(&series),
        }
    }
    Ok(table)
}
