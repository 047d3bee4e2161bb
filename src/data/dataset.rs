use ndarray::{Array2, ArrayView2, Axis};

use crate::{training::Batch, EngineErr, Result};

/// A supervised dataset held in memory, one sample per row.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    x: Array2<f32>,
    y: Array2<f32>,
}

impl InMemoryDataset {
    /// Creates a new dataset from owned arrays.
    ///
    /// # Errors
    /// If `x` and `y` have a different number of rows or if there are no rows.
    pub fn new(x: Array2<f32>, y: Array2<f32>) -> Result<Self> {
        if x.nrows() != y.nrows() {
            return Err(EngineErr::SizeMismatch {
                what: "target rows",
                got: y.nrows(),
                expected: x.nrows(),
            });
        }

        if x.nrows() == 0 {
            return Err(EngineErr::EmptyData);
        }

        Ok(Self { x, y })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    #[inline]
    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    #[inline]
    pub fn y(&self) -> ArrayView2<'_, f32> {
        self.y.view()
    }

    /// Copies the given rows into a batch.
    pub fn select(&self, rows: &[usize]) -> Batch {
        (self.x.select(Axis(0), rows), self.y.select(Axis(0), rows))
    }
}
