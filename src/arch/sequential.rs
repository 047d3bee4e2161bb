use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{layers::Dense, Model};
use crate::{EngineErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Dense>,
    params: Vec<f32>,
    grad: Vec<f32>,
    training: bool,
}

impl Sequential {
    /// Creates a new `Sequential` with every parameter set to zero.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Dense>,
    {
        let layers: Vec<_> = layers.into_iter().collect();
        let size = layers.iter().map(Dense::size).sum();

        Self {
            layers,
            params: vec![0.; size],
            grad: vec![0.; size],
            training: true,
        }
    }

    /// Creates a new `Sequential` with the given parameters.
    ///
    /// # Returns
    /// An error if `params` doesn't fit the layers.
    pub fn with_params<I>(layers: I, params: Vec<f32>) -> Result<Self>
    where
        I: IntoIterator<Item = Dense>,
    {
        let mut model = Self::new(layers);

        if params.len() != model.params.len() {
            return Err(EngineErr::SizeMismatch {
                what: "sequential parameters",
                got: params.len(),
                expected: model.params.len(),
            });
        }

        model.params = params;
        Ok(model)
    }

    /// Draws every parameter uniformly from `[-bound, bound)`.
    pub fn init_uniform<R: Rng>(&mut self, rng: &mut R, bound: f32) {
        for p in &mut self.params {
            *p = (rng.random::<f32>() - 0.5) * 2. * bound;
        }
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.params.len()
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn grad(&self) -> &[f32] {
        &self.grad
    }

    fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    fn params_and_grad_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.params, &mut self.grad)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut offset = 0;
        let mut a = x.to_owned();

        for layer in &mut self.layers {
            let size = layer.size();
            a = layer.forward(&self.params[offset..offset + size], a.view())?;
            offset += size;
        }

        Ok(a)
    }

    fn backward(&mut self, mut d: Array2<f32>) -> Result<()> {
        let mut end = self.params.len();

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&self.params[start..end], &mut self.grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::arch::{
        activations::ActFn,
        loss::{LossFn, Mse},
    };

    #[test]
    fn with_params_checks_the_size() {
        let layers = || [Dense::new((2, 3), None), Dense::new((3, 1), None)];

        assert_eq!(Sequential::new(layers()).size(), 9 + 4);
        assert!(Sequential::with_params(layers(), vec![0.; 12]).is_err());
        assert!(Sequential::with_params(layers(), vec![0.; 13]).is_ok());
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let layers = || {
            [
                Dense::new((2, 3), Some(ActFn::sigmoid(1.))),
                Dense::new((3, 1), Some(ActFn::sigmoid(1.))),
            ]
        };
        let x = array![[0., 1.], [1., 0.], [1., 1.]];
        let y = array![[1.], [1.], [0.]];

        let mut model = Sequential::new(layers());
        model.init_uniform(&mut StdRng::seed_from_u64(3), 1.);
        let params = model.params().to_vec();

        let y_pred = model.forward(x.view()).unwrap();
        model.backward(Mse.loss_prime(y_pred.view(), y.view())).unwrap();
        let grad = model.grad().to_vec();

        let h = 1e-2;
        for i in 0..params.len() {
            let loss_at = |delta: f32| {
                let mut p = params.clone();
                p[i] += delta;
                let mut m = Sequential::with_params(layers(), p).unwrap();
                let y_pred = m.forward(x.view()).unwrap();
                Mse.loss(y_pred.view(), y.view())
            };

            let numeric = (loss_at(h) - loss_at(-h)) / (2. * h);
            assert!(
                (numeric - grad[i]).abs() < 1e-3,
                "param {i}: numeric {numeric} vs analytic {}",
                grad[i]
            );
        }
    }
}
