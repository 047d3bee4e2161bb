//! Full, native mixed and apex-style mixed precision update paths.

mod half;
mod scaler;

use std::{fmt, str::FromStr};

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

pub use self::half::{round_to_half, to_half};
pub use scaler::GradScaler;

use crate::{arch::Model, optimization::Optimizer, EngineErr, Result};

/// Pure or mixed precision optimization level of the apex-style path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptLevel {
    /// fp32 everywhere.
    O0,
    /// Activations autocast to half, fp32 weights.
    #[default]
    O1,
    /// Half weights with fp32 master weights.
    O2,
    /// Half everything.
    O3,
}

impl OptLevel {
    fn dynamic_loss_scale(self) -> bool {
        matches!(self, OptLevel::O1 | OptLevel::O2)
    }
}

impl FromStr for OptLevel {
    type Err = EngineErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "O0" => Ok(OptLevel::O0),
            "O1" => Ok(OptLevel::O1),
            "O2" => Ok(OptLevel::O2),
            "O3" => Ok(OptLevel::O3),
            _ => Err(EngineErr::InvalidOptLevel(s.to_string())),
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Apex-style mixed precision state: an opt level, its loss scaler and, for `O2`, the fp32
/// master copy of the weights.
#[derive(Debug, Clone)]
pub struct ApexAmp {
    opt_level: OptLevel,
    scaler: Option<GradScaler>,
    master: Option<Vec<f32>>,
}

impl ApexAmp {
    pub fn new(opt_level: OptLevel) -> Self {
        let scaler = opt_level.dynamic_loss_scale().then(GradScaler::new);

        Self {
            opt_level,
            scaler,
            master: None,
        }
    }

    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// The fp32 master weights, only kept under `O2`.
    pub fn master_params(&self) -> Option<&[f32]> {
        self.master.as_deref()
    }

    pub fn scaler(&self) -> Option<&GradScaler> {
        self.scaler.as_ref()
    }

    fn cast_model<M: Model + ?Sized>(&mut self, model: &mut M) {
        match self.opt_level {
            OptLevel::O2 if self.master.is_none() => {
                self.master = Some(model.params().to_vec());
                round_to_half(model.params_mut());
            }
            OptLevel::O3 => round_to_half(model.params_mut()),
            _ => {}
        }
    }
}

/// The precision the supervised update runs at.
#[derive(Debug, Clone, Default)]
pub enum Precision {
    #[default]
    Full,
    Native(GradScaler),
    Apex(ApexAmp),
}

impl Precision {
    /// Native mixed precision with a default `GradScaler`.
    pub fn native() -> Self {
        Self::Native(GradScaler::new())
    }

    pub fn apex(opt_level: OptLevel) -> Self {
        Self::Apex(ApexAmp::new(opt_level))
    }

    pub fn is_mixed(&self) -> bool {
        !matches!(self, Precision::Full)
    }

    /// The current loss scale, 1 when no loss scaling is done.
    pub fn loss_scale(&self) -> f32 {
        self.scaler().map_or(1., GradScaler::scale)
    }

    fn scaler(&self) -> Option<&GradScaler> {
        match self {
            Precision::Full => None,
            Precision::Native(scaler) => Some(scaler),
            Precision::Apex(apex) => apex.scaler.as_ref(),
        }
    }

    fn scaler_mut(&mut self) -> Option<&mut GradScaler> {
        match self {
            Precision::Full => None,
            Precision::Native(scaler) => Some(scaler),
            Precision::Apex(apex) => apex.scaler.as_mut(),
        }
    }

    fn autocasts(&self) -> bool {
        match self {
            Precision::Full => false,
            Precision::Native(_) => true,
            Precision::Apex(apex) => apex.opt_level != OptLevel::O0,
        }
    }

    /// Runs the model's forward pass, with activations in half precision when autocasting.
    pub(crate) fn forward<M>(&mut self, model: &mut M, x: ArrayView2<f32>) -> Result<Array2<f32>>
    where
        M: Model + ?Sized,
    {
        if let Precision::Apex(apex) = self {
            apex.cast_model(model);
        }

        if !self.autocasts() {
            return model.forward(x);
        }

        let y_pred = model.forward(to_half(x).view())?;
        Ok(to_half(y_pred.view()))
    }

    /// Back-propagates the (scaled) loss derivative and leaves the model with unscaled
    /// gradients.
    pub(crate) fn backward<M>(&mut self, model: &mut M, d: Array2<f32>) -> Result<()>
    where
        M: Model + ?Sized,
    {
        let Some(scaler) = self.scaler_mut() else {
            return model.backward(d);
        };

        model.backward(scaler.scale_loss_grad(d))?;
        scaler.unscale(model.grad_mut());
        Ok(())
    }

    /// Applies the optimizer and updates the loss scale.
    ///
    /// # Returns
    /// Whether the parameters were updated.
    pub(crate) fn step<M, O>(&mut self, model: &mut M, optimizer: &mut O) -> Result<bool>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        match self {
            Precision::Full => {
                let (params, grad) = model.params_and_grad();
                optimizer.step(params, grad)?;
                Ok(true)
            }
            Precision::Native(scaler) => {
                let (params, grad) = model.params_and_grad_mut();
                let stepped = scaler.step(optimizer, params, grad)?;
                scaler.update();
                Ok(stepped)
            }
            Precision::Apex(apex) => {
                if let Some(scaler) = apex.scaler.as_mut() {
                    let overflow = scaler.found_inf();
                    scaler.update();

                    if overflow {
                        return Ok(false);
                    }
                }

                match (apex.opt_level, apex.master.as_mut()) {
                    (OptLevel::O2, Some(master)) => {
                        optimizer.step(master, model.grad())?;
                        let params = model.params_mut();
                        params.copy_from_slice(master);
                        round_to_half(params);
                    }
                    (OptLevel::O3, _) => {
                        let (params, grad) = model.params_and_grad();
                        optimizer.step(params, grad)?;
                        round_to_half(params);
                    }
                    _ => {
                        let (params, grad) = model.params_and_grad();
                        optimizer.step(params, grad)?;
                    }
                }

                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{
        arch::{layers::Dense, Sequential},
        optimization::GradientDescent,
    };

    fn linear() -> Sequential {
        Sequential::with_params([Dense::new((1, 1), None)], vec![0.1, 0.]).unwrap()
    }

    #[test]
    fn parse_opt_levels() {
        assert_eq!("O2".parse::<OptLevel>().unwrap(), OptLevel::O2);
        assert!("O4".parse::<OptLevel>().is_err());
        assert_eq!(OptLevel::O3.to_string(), "O3");
    }

    #[test]
    fn only_o1_and_o2_scale_the_loss() {
        assert_eq!(Precision::apex(OptLevel::O0).loss_scale(), 1.);
        assert_eq!(Precision::apex(OptLevel::O1).loss_scale(), 65536.);
        assert_eq!(Precision::apex(OptLevel::O2).loss_scale(), 65536.);
        assert_eq!(Precision::apex(OptLevel::O3).loss_scale(), 1.);
        assert_eq!(Precision::Full.loss_scale(), 1.);
    }

    #[test]
    fn native_backward_leaves_unscaled_gradients() {
        let mut precision = Precision::native();
        let mut model = linear();

        model.forward(array![[2.]].view()).unwrap();
        precision.backward(&mut model, array![[1.]]).unwrap();

        assert_eq!(model.grad(), [2., 1.]);
    }

    #[test]
    fn o2_keeps_fp32_master_weights() {
        let mut precision = Precision::apex(OptLevel::O2);
        let mut model = linear();
        let mut optimizer = GradientDescent::new(1.);

        precision.forward(&mut model, array![[1.]].view()).unwrap();
        assert_ne!(model.params()[0], 0.1);

        let Precision::Apex(apex) = &precision else {
            unreachable!()
        };
        assert_eq!(apex.master_params(), Some(&[0.1, 0.][..]));

        model.zero_grad();
        precision.backward(&mut model, array![[1e-4]]).unwrap();
        assert!(precision.step(&mut model, &mut optimizer).unwrap());

        let Precision::Apex(apex) = &precision else {
            unreachable!()
        };
        let master = apex.master_params().unwrap();
        assert!((master[0] - (0.1 - 1e-4)).abs() < 1e-6);
        assert!((master[1] + 1e-4).abs() < 1e-6);
    }

    #[test]
    fn native_step_uses_the_model_gradient_in_place() {
        let mut precision = Precision::native();
        let mut model = linear();
        let mut optimizer = GradientDescent::new(1.);

        model.forward(array![[1.]].view()).unwrap();
        precision.backward(&mut model, array![[1e-3]]).unwrap();
        assert!(precision.step(&mut model, &mut optimizer).unwrap());

        let grad = model.grad();
        assert!((grad[0] - 1e-3).abs() < 1e-7 && (grad[1] - 1e-3).abs() < 1e-7);
        assert!((model.params()[0] - (0.1 - 1e-3)).abs() < 1e-6);
        assert!((model.params()[1] + 1e-3).abs() < 1e-6);
    }

    #[test]
    fn native_overflow_skips_the_update() {
        let mut precision = Precision::Native(GradScaler::new().with_init_scale(1e38));
        let mut model = linear();
        let mut optimizer = GradientDescent::new(1.);

        model.forward(array![[10.]].view()).unwrap();
        precision.backward(&mut model, array![[10.]]).unwrap();

        assert!(!precision.step(&mut model, &mut optimizer).unwrap());
        assert_eq!(model.params(), [0.1, 0.]);
        assert_eq!(precision.loss_scale(), 5e37);
    }
}
