pub mod estimator;
pub mod lazy;
pub mod loss;
pub mod masked;
pub mod metrics;
pub mod optimizer;
pub mod registry;

pub use estimator::{
    BatchSource, CompileOptions, Estimator, EpochLog, Evaluation, FitConfig, History, LossSpec,
    MetricSpec, SegmentationEstimator, TensorBatches,
};
pub use lazy::LazyModel;
pub use masked::{MaskedLoss, MaskedMetric};
pub use metrics::{MeanMetric, SegmentationMetric, StatefulMetric};
pub use optimizer::OptimizerKind;
pub use registry::{LossRegistry, MetricRegistry, Registry};
