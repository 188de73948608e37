//! Optimizers selectable by name.

use std::str::FromStr;

use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, AdamWConfig, GradientsParams, Optimizer, RmsPropConfig, SgdConfig},
    tensor::backend::AutodiffBackend,
};

use crate::error::{Error, IdentifierKind};

/// Object-safe view of a burn [`Optimizer`], so the estimator can swap
/// optimizers at compile time without carrying their type.
pub trait StepOptimizer<B: AutodiffBackend, M: AutodiffModule<B>>: Send {
    fn step(&mut self, lr: f64, module: M, grads: GradientsParams) -> M;
}

impl<B, M, O> StepOptimizer<B, M> for O
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn step(&mut self, lr: f64, module: M, grads: GradientsParams) -> M {
        Optimizer::step(self, lr, module, grads)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd,
    #[default]
    RmsProp,
}

impl OptimizerKind {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::AdamW => "adamw",
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::RmsProp => "rmsprop",
        }
    }

    /// Fresh optimizer with empty state.
    pub fn init<B, M>(&self) -> Box<dyn StepOptimizer<B, M>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + 'static,
    {
        match self {
            OptimizerKind::Adam => Box::new(AdamConfig::new().init::<B, M>()),
            OptimizerKind::AdamW => Box::new(AdamWConfig::new().init::<B, M>()),
            OptimizerKind::Sgd => Box::new(SgdConfig::new().init::<B, M>()),
            OptimizerKind::RmsProp => Box::new(RmsPropConfig::new().init::<B, M>()),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            "sgd" => Ok(OptimizerKind::Sgd),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            _ => Err(Error::UnknownIdentifier {
                kind: IdentifierKind::Optimizer,
                name: s.to_string(),
            }),
        }
    }
}
