//! Compile / fit / evaluate / call on top of a burn network.
//!
//! [`SegmentationEstimator`] is the contract wrappers such as
//! [`LazyModel`](super::LazyModel) build on. [`Estimator`] implements it for
//! any [`SegmentationNetwork`] that is also an [`AutodiffModule`], with a
//! plain training loop driven by a boxed optimizer so that losses, metrics
//! and optimizers can all be swapped at compile time.

use std::sync::Arc;

use burn::{
    data::dataloader::DataLoader,
    module::AutodiffModule,
    optim::GradientsParams,
    prelude::*,
    tensor::{ElementConversion, backend::AutodiffBackend},
};
use tracing::{debug, info};

use super::{
    loss::SegmentationLoss,
    metrics::{MeanMetric, SegmentationMetric, StatefulMetric},
    optimizer::{OptimizerKind, StepOptimizer},
    registry::{LossRegistry, MetricRegistry},
};
use crate::{
    dataset::SegmentationBatch,
    error::{Error, Result},
    model::SegmentationNetwork,
};

/// A loss given either by registry name or as an instance.
pub enum LossSpec<B: Backend> {
    Name(String),
    Loss(Box<dyn SegmentationLoss<B>>),
}

impl<B: Backend> From<&str> for LossSpec<B> {
    fn from(name: &str) -> Self {
        LossSpec::Name(name.to_string())
    }
}

impl<B: Backend> From<String> for LossSpec<B> {
    fn from(name: String) -> Self {
        LossSpec::Name(name)
    }
}

impl<B: Backend> From<Box<dyn SegmentationLoss<B>>> for LossSpec<B> {
    fn from(loss: Box<dyn SegmentationLoss<B>>) -> Self {
        LossSpec::Loss(loss)
    }
}

/// A metric given by registry name, as a batch metric, or as a metric
/// that keeps its own running state.
pub enum MetricSpec<B: Backend> {
    Name(String),
    Metric(Box<dyn SegmentationMetric<B>>),
    Stateful(Box<dyn StatefulMetric<B>>),
}

impl<B: Backend> From<&str> for MetricSpec<B> {
    fn from(name: &str) -> Self {
        MetricSpec::Name(name.to_string())
    }
}

impl<B: Backend> From<String> for MetricSpec<B> {
    fn from(name: String) -> Self {
        MetricSpec::Name(name)
    }
}

impl<B: Backend> From<Box<dyn SegmentationMetric<B>>> for MetricSpec<B> {
    fn from(metric: Box<dyn SegmentationMetric<B>>) -> Self {
        MetricSpec::Metric(metric)
    }
}

impl<B: Backend> From<Box<dyn StatefulMetric<B>>> for MetricSpec<B> {
    fn from(metric: Box<dyn StatefulMetric<B>>) -> Self {
        MetricSpec::Stateful(metric)
    }
}

/// Everything `compile` needs. Built with the `with_*` methods.
pub struct CompileOptions<B: Backend> {
    pub loss: Option<LossSpec<B>>,
    pub metrics: Vec<MetricSpec<B>>,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
}

impl<B: Backend> Default for CompileOptions<B> {
    fn default() -> Self {
        Self {
            loss: None,
            metrics: Vec::new(),
            optimizer: OptimizerKind::default(),
            learning_rate: 1e-3,
        }
    }
}

impl<B: Backend> CompileOptions<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loss(mut self, loss: impl Into<LossSpec<B>>) -> Self {
        self.loss = Some(loss.into());
        self
    }

    pub fn with_metric(mut self, metric: impl Into<MetricSpec<B>>) -> Self {
        self.metrics.push(metric.into());
        self
    }

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MetricSpec<B>>,
    {
        self.metrics.extend(metrics.into_iter().map(Into::into));
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }
}

/// Configuration of a [`SegmentationEstimator::fit`] call.
#[derive(Config, Debug)]
pub struct FitConfig {
    #[config(default = "1")]
    pub epochs: usize,
}

/// Loss and metric values, loss first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    values: Vec<(String, f64)>,
}

impl Evaluation {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn loss(&self) -> Option<f64> {
        self.get("loss")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    fn push(&mut self, name: impl Into<String>, value: f64) {
        self.values.push((name.into(), value));
    }
}

#[derive(Clone, Debug)]
pub struct EpochLog {
    /// 1-based.
    pub epoch: usize,
    pub train: Evaluation,
    pub validation: Option<Evaluation>,
}

/// Per-epoch record of a `fit` call.
#[derive(Clone, Debug, Default)]
pub struct History {
    pub epochs: Vec<EpochLog>,
}

impl History {
    pub fn last(&self) -> Option<&EpochLog> {
        self.epochs.last()
    }

    pub fn losses(&self) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|log| log.train.loss())
            .collect()
    }

    /// Training values of `name` for each epoch it was recorded in.
    pub fn metric(&self, name: &str) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|log| log.train.get(name))
            .collect()
    }
}

/// Anything that can be iterated as segmentation batches, once per epoch.
pub trait BatchSource<B: Backend> {
    fn batches(&self) -> Box<dyn Iterator<Item = SegmentationBatch<B>> + '_>;
}

impl<B: Backend> BatchSource<B> for Arc<dyn DataLoader<SegmentationBatch<B>>> {
    fn batches(&self) -> Box<dyn Iterator<Item = SegmentationBatch<B>> + '_> {
        Box::new(self.iter())
    }
}

/// In-memory images and masks split along the batch axis.
pub struct TensorBatches<B: Backend> {
    images: Tensor<B, 4>,
    masks: Tensor<B, 4>,
    batch_size: usize,
}

impl<B: Backend> TensorBatches<B> {
    pub fn new(images: Tensor<B, 4>, masks: Tensor<B, 4>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".to_string()));
        }

        let [image_count, image_height, image_width, _] = images.dims();
        let [mask_count, mask_height, mask_width, _] = masks.dims();
        if (image_count, image_height, image_width) != (mask_count, mask_height, mask_width) {
            return Err(Error::ShapeMismatch {
                context: "images and masks".to_string(),
                expected: vec![image_count, image_height, image_width],
                actual: vec![mask_count, mask_height, mask_width],
            });
        }

        Ok(Self {
            images,
            masks,
            batch_size,
        })
    }

    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: Backend> BatchSource<B> for TensorBatches<B> {
    fn batches(&self) -> Box<dyn Iterator<Item = SegmentationBatch<B>> + '_> {
        let total = self.len();

        Box::new((0..total).step_by(self.batch_size).map(move |start| {
            let length = self.batch_size.min(total - start);
            SegmentationBatch {
                images: self.images.clone().narrow(0, start, length),
                masks: self.masks.clone().narrow(0, start, length),
            }
        }))
    }
}

/// The estimator contract: configure, train, score, predict.
pub trait SegmentationEstimator<B: Backend> {
    /// Configure loss, metrics and optimizer. Replaces any previous
    /// configuration.
    fn compile(&mut self, options: CompileOptions<B>) -> Result<()>;

    fn fit(
        &mut self,
        data: &dyn BatchSource<B>,
        validation: Option<&dyn BatchSource<B>>,
        config: &FitConfig,
    ) -> Result<History>;

    fn evaluate(&mut self, data: &dyn BatchSource<B>) -> Result<Evaluation>;

    fn call(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

struct Compiled<B: AutodiffBackend, M: AutodiffModule<B>> {
    loss: Option<Box<dyn SegmentationLoss<B>>>,
    metrics: Vec<Box<dyn StatefulMetric<B>>>,
    optimizer: Box<dyn StepOptimizer<B, M>>,
    learning_rate: f64,
}

/// Default [`SegmentationEstimator`] over a burn network.
pub struct Estimator<B: AutodiffBackend, M: AutodiffModule<B>> {
    model: M,
    losses: LossRegistry<B>,
    metrics: MetricRegistry<B>,
    compiled: Option<Compiled<B, M>>,
}

impl<B, M> Estimator<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationNetwork<B> + 'static,
    M::InnerModule: SegmentationNetwork<B::InnerBackend>,
{
    pub fn new(model: M) -> Self {
        Self::with_registries(
            model,
            LossRegistry::with_defaults(),
            MetricRegistry::with_defaults(),
        )
    }

    pub fn with_registries(model: M, losses: LossRegistry<B>, metrics: MetricRegistry<B>) -> Self {
        Self {
            model,
            losses,
            metrics,
            compiled: None,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Name of the compiled loss, if any.
    pub fn loss_name(&self) -> Option<String> {
        self.compiled
            .as_ref()
            .and_then(|compiled| compiled.loss.as_ref())
            .map(|loss| loss.name())
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.compiled
            .as_ref()
            .map(|compiled| compiled.metrics.iter().map(|m| m.name()).collect())
            .unwrap_or_default()
    }

    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.call(images)
    }

    fn resolve_loss(&self, spec: LossSpec<B>) -> Result<Box<dyn SegmentationLoss<B>>> {
        match spec {
            LossSpec::Name(name) => self.losses.get(&name),
            LossSpec::Loss(loss) => Ok(loss),
        }
    }

    fn resolve_metric(&self, spec: MetricSpec<B>) -> Result<Box<dyn StatefulMetric<B>>> {
        Ok(match spec {
            MetricSpec::Name(name) => Box::new(MeanMetric::new(self.metrics.get(&name)?)),
            MetricSpec::Metric(metric) => Box::new(MeanMetric::new(metric)),
            MetricSpec::Stateful(metric) => metric,
        })
    }
}

impl<B, M> SegmentationEstimator<B> for Estimator<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationNetwork<B> + 'static,
    M::InnerModule: SegmentationNetwork<B::InnerBackend>,
{
    fn compile(&mut self, options: CompileOptions<B>) -> Result<()> {
        let loss = options
            .loss
            .map(|spec| self.resolve_loss(spec))
            .transpose()?;
        let metrics = options
            .metrics
            .into_iter()
            .map(|spec| self.resolve_metric(spec))
            .collect::<Result<Vec<_>>>()?;

        info!(
            loss = %loss.as_ref().map(|l| l.name()).unwrap_or_default(),
            metrics = ?metrics.iter().map(|m| m.name()).collect::<Vec<_>>(),
            optimizer = options.optimizer.name(),
            learning_rate = options.learning_rate,
            "Compiled estimator"
        );

        self.compiled = Some(Compiled {
            loss,
            metrics,
            optimizer: options.optimizer.init::<B, M>(),
            learning_rate: options.learning_rate,
        });

        Ok(())
    }

    fn fit(
        &mut self,
        data: &dyn BatchSource<B>,
        validation: Option<&dyn BatchSource<B>>,
        config: &FitConfig,
    ) -> Result<History> {
        let Compiled {
            loss,
            metrics,
            optimizer,
            learning_rate,
        } = self.compiled.as_mut().ok_or(Error::NotCompiled("fit"))?;
        let loss = loss.as_deref().ok_or(Error::NotCompiled("fit"))?;

        let mut model = self.model.clone();
        let mut history = History::default();

        for epoch in 1..=config.epochs {
            metrics.iter_mut().for_each(|metric| metric.reset_state());

            let mut total_loss = 0.0;
            let mut seen = 0;

            for (index, batch) in data.batches().enumerate() {
                let batch_size = batch.images.dims()[0];

                let output = model.forward(batch.images);
                let loss_tensor = loss.forward(batch.masks.clone(), output.clone())?;
                let value = loss_tensor.clone().into_scalar().elem::<f64>();

                if !value.is_finite() {
                    self.model = model;
                    return Err(Error::NonFiniteLoss {
                        value,
                        epoch,
                        batch: index,
                    });
                }

                for metric in metrics.iter_mut() {
                    metric.update_state(batch.masks.clone(), output.clone().detach())?;
                }

                let grads = GradientsParams::from_grads(loss_tensor.backward(), &model);
                model = optimizer.step(*learning_rate, model, grads);

                total_loss += value * batch_size as f64;
                seen += batch_size;

                debug!(epoch, batch = index, loss = value, "Training step");
            }

            if seen == 0 {
                self.model = model;
                return Err(Error::EmptyDataset);
            }

            let mut train = Evaluation::default();
            train.push("loss", total_loss / seen as f64);
            for metric in metrics.iter() {
                train.push(metric.name(), metric.result());
            }

            let validation = validation
                .map(|source| evaluate_model(&model.valid(), Some(loss), metrics, source))
                .transpose()?;

            info!(
                epoch,
                epochs = config.epochs,
                train = ?train,
                validation = ?validation,
                "Epoch finished"
            );

            history.epochs.push(EpochLog {
                epoch,
                train,
                validation,
            });
        }

        self.model = model;
        Ok(history)
    }

    fn evaluate(&mut self, data: &dyn BatchSource<B>) -> Result<Evaluation> {
        let compiled = self
            .compiled
            .as_mut()
            .ok_or(Error::NotCompiled("evaluate"))?;

        evaluate_model(
            &self.model.valid(),
            compiled.loss.as_deref(),
            &mut compiled.metrics,
            data,
        )
    }

    /// Inference-mode forward pass: dropout is off and batch norm uses its
    /// running statistics. The result carries no gradient graph.
    fn call(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        Tensor::from_inner(self.model.valid().forward(images.inner()))
    }
}

/// Score `model`, an inference copy from [`AutodiffModule::valid`], with the
/// compiled loss and metrics.
fn evaluate_model<B: AutodiffBackend, N: SegmentationNetwork<B::InnerBackend>>(
    model: &N,
    loss: Option<&dyn SegmentationLoss<B>>,
    metrics: &mut [Box<dyn StatefulMetric<B>>],
    data: &dyn BatchSource<B>,
) -> Result<Evaluation> {
    metrics.iter_mut().for_each(|metric| metric.reset_state());

    let mut total_loss = 0.0;
    let mut seen = 0;

    for batch in data.batches() {
        let batch_size = batch.images.dims()[0];
        let output = Tensor::<B, 4>::from_inner(model.forward(batch.images.inner()));

        if let Some(loss) = loss {
            let value = loss
                .forward(batch.masks.clone(), output.clone())?
                .into_scalar()
                .elem::<f64>();
            total_loss += value * batch_size as f64;
        }

        for metric in metrics.iter_mut() {
            metric.update_state(batch.masks.clone(), output.clone())?;
        }

        seen += batch_size;
    }

    if seen == 0 {
        return Err(Error::EmptyDataset);
    }

    let mut evaluation = Evaluation::default();
    if loss.is_some() {
        evaluation.push("loss", total_loss / seen as f64);
    }
    for metric in metrics.iter() {
        evaluation.push(metric.name(), metric.result());
    }

    Ok(evaluation)
}

#[cfg(all(test, feature = "unet"))]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::{
        model::UNetConfig,
        tests::TestAutodiffBackend,
        training::metrics::BinaryAccuracy,
    };

    type B = TestAutodiffBackend;

    fn tiny_estimator() -> Estimator<B, crate::model::UNet<B>> {
        let device = Default::default();
        let model = UNetConfig::new()
            .with_base_channels(4)
            .with_depth(1)
            .init::<B>(&device);
        Estimator::new(model)
    }

    fn tiny_data(count: usize) -> TensorBatches<B> {
        let device = Default::default();
        let images = Tensor::<B, 4>::random([count, 8, 8, 3], Distribution::Default, &device);
        let masks = Tensor::<B, 4>::random([count, 8, 8, 2], Distribution::Default, &device)
            .greater_elem(0.5)
            .float();
        TensorBatches::new(images, masks, 2).unwrap()
    }

    struct NoBatches;

    impl BatchSource<B> for NoBatches {
        fn batches(&self) -> Box<dyn Iterator<Item = SegmentationBatch<B>> + '_> {
            Box::new(std::iter::empty())
        }
    }

    #[test]
    fn tensor_batches_split_with_remainder() {
        let data = tiny_data(5);

        let sizes: Vec<usize> = data.batches().map(|b| b.images.dims()[0]).collect();

        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn tensor_batches_reject_mismatched_masks() {
        let device = Default::default();
        let images = Tensor::<B, 4>::zeros([2, 8, 8, 3], &device);
        let masks = Tensor::<B, 4>::zeros([3, 8, 8, 2], &device);

        assert!(matches!(
            TensorBatches::new(images, masks, 2),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn fit_before_compile_fails() {
        let mut estimator = tiny_estimator();

        assert!(matches!(
            estimator.fit(&tiny_data(2), None, &FitConfig::new()),
            Err(Error::NotCompiled("fit"))
        ));
        assert!(matches!(
            estimator.evaluate(&tiny_data(2)),
            Err(Error::NotCompiled("evaluate"))
        ));
    }

    #[test]
    fn compile_rejects_unknown_names() {
        let mut estimator = tiny_estimator();

        let result = estimator.compile(CompileOptions::new().with_loss("hinge"));

        assert!(matches!(result, Err(Error::UnknownIdentifier { .. })));
        assert!(!estimator.is_compiled());
    }

    #[test]
    fn fit_records_loss_and_metrics_per_epoch() {
        let mut estimator = tiny_estimator();
        estimator
            .compile(
                CompileOptions::new()
                    .with_loss("mse")
                    .with_metrics(["mae", "binary_accuracy"])
                    .with_optimizer(OptimizerKind::Adam),
            )
            .unwrap();

        let data = tiny_data(4);
        let validation = tiny_data(2);
        let history = estimator
            .fit(&data, Some(&validation), &FitConfig::new().with_epochs(2))
            .unwrap();

        assert_eq!(history.epochs.len(), 2);
        assert_eq!(history.losses().len(), 2);
        assert!(history.losses().iter().all(|loss| loss.is_finite()));
        assert_eq!(history.metric("mean_absolute_error").len(), 2);

        let last = history.last().unwrap();
        let names: Vec<&str> = last.train.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["loss", "mean_absolute_error", "binary_accuracy"]);
        assert!(last.validation.as_ref().unwrap().loss().is_some());
    }

    #[test]
    fn evaluate_without_loss_reports_metrics_only() {
        let mut estimator = tiny_estimator();
        let metric: Box<dyn SegmentationMetric<B>> = Box::new(BinaryAccuracy::default());
        estimator
            .compile(CompileOptions::new().with_metric(metric))
            .unwrap();

        let evaluation = estimator.evaluate(&tiny_data(3)).unwrap();

        assert_eq!(evaluation.loss(), None);
        let accuracy = evaluation.get("binary_accuracy").unwrap();
        assert!((0.0..=1.0).contains(&accuracy));

        assert!(matches!(
            estimator.fit(&tiny_data(2), None, &FitConfig::new()),
            Err(Error::NotCompiled("fit"))
        ));
    }

    #[test]
    fn empty_data_is_rejected() {
        let mut estimator = tiny_estimator();
        estimator
            .compile(CompileOptions::new().with_loss("mse"))
            .unwrap();

        assert!(matches!(
            estimator.fit(&NoBatches, None, &FitConfig::new()),
            Err(Error::EmptyDataset)
        ));
        assert!(matches!(
            estimator.evaluate(&NoBatches),
            Err(Error::EmptyDataset)
        ));
    }

    #[test]
    fn call_and_predict_agree_in_shape() {
        let estimator = tiny_estimator();
        let device = Default::default();
        let images = Tensor::<B, 4>::zeros([1, 8, 8, 3], &device);

        assert_eq!(estimator.call(images.clone()).dims(), [1, 8, 8, 2]);
        assert_eq!(estimator.predict(images).dims(), [1, 8, 8, 2]);
    }

    #[test]
    fn evaluation_does_not_depend_on_dropout_or_batch_statistics() {
        let mut estimator = tiny_estimator();
        estimator
            .compile(CompileOptions::new().with_loss("mse").with_metric("mae"))
            .unwrap();
        let data = tiny_data(4);
        let device = Default::default();
        let images = Tensor::<B, 4>::random([1, 8, 8, 3], Distribution::Default, &device);

        let before = estimator.call(images.clone());
        let first = estimator.evaluate(&data).unwrap();
        let second = estimator.evaluate(&data).unwrap();
        let after = estimator.predict(images);

        assert_eq!(first, second);
        let diff = (before - after).abs().max().into_scalar().elem::<f32>();
        assert!(diff < 1e-6);
    }
}
