use half::f16;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

/// Rounds every value to the nearest half precision float.
pub fn to_half(x: ArrayView2<f32>) -> Array2<f32> {
    x.mapv(round)
}

/// Rounds a parameter buffer to half precision in place.
pub fn round_to_half(values: &mut [f32]) {
    values.par_iter_mut().for_each(|v| *v = round(*v));
}

fn round(v: f32) -> f32 {
    f16::from_f32(v).to_f32()
}
