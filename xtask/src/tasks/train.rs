use std::path::PathBuf;

use anyhow::{Result, anyhow, ensure};
use burn::{
    backend::{Autodiff, Wgpu, wgpu::WgpuDevice},
    prelude::*,
    record::CompactRecorder,
};
use clap::Args;
use lazy_unet::{
    ColorMap, FolderDatasetConfig, SegmentationFolderDataset, UNetConfig,
    dataset::{ColorMapConfig, DataLoaderConfig, Subset, segmentation_dataloader},
    training::{
        BatchSource, CompileOptions, Estimator, FitConfig, LazyModel, OptimizerKind,
        SegmentationEstimator,
    },
};
use tracing::info;

#[derive(Args)]
pub struct TrainArgs {
    #[arg(long)]
    pub images: PathBuf,

    #[arg(long)]
    pub masks: PathBuf,

    /// JSON colour map (`{"classes": [{"index": 0, "rgb": [0, 0, 255]}, ...]}`).
    /// Defaults to blue background, white foreground.
    #[arg(long)]
    pub colors: Option<PathBuf>,

    /// Mask channel marking unannotated pixels. Negative counts from the end.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub ignore_channel: isize,

    #[arg(long, default_value = "categorical_crossentropy")]
    pub loss: String,

    #[arg(long, num_args = 1.., default_values_t = vec!["accuracy".to_string()])]
    pub metrics: Vec<String>,

    #[arg(long, default_value = "rmsprop")]
    pub optimizer: OptimizerKind,

    #[arg(short, long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(short, long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = 0.001)]
    pub lr: f64,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 256)]
    pub width: u32,

    #[arg(long, default_value_t = 256)]
    pub height: u32,

    #[arg(long, default_value_t = 0.2)]
    pub validation_split: f64,

    #[arg(long, default_value_t = 64)]
    pub base_channels: usize,

    #[arg(long, default_value_t = 4)]
    pub depth: usize,

    #[arg(long, default_value_t = 48)]
    pub seed: u64,

    #[arg(short, long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,
}

/// Everything needed to reproduce a run, saved next to the weights.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: UNetConfig,
    pub dataset: FolderDatasetConfig,
    pub loader: DataLoaderConfig,
    pub fit: FitConfig,
    pub ignore_channel: isize,
    pub loss: String,
    pub metrics: Vec<String>,
    pub optimizer: String,
    pub learning_rate: f64,
}

fn load_colors(path: Option<&PathBuf>) -> Result<ColorMap> {
    let Some(path) = path else {
        return Ok(ColorMap::default());
    };

    let config = ColorMapConfig::load(path)
        .map_err(|err| anyhow!("Failed to load colour map {}: {err}", path.display()))?;
    Ok(config.init()?)
}

pub fn run(args: &TrainArgs) -> Result<()> {
    type MyBackend = Wgpu<f32, i32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;

    let device = WgpuDevice::default();
    MyAutodiffBackend::seed(args.seed);

    let colors = load_colors(args.colors.as_ref())?;
    ensure!(
        colors.len() >= 2,
        "the colour map needs at least one class besides the ignore channel"
    );

    let config = TrainingConfig::new(
        UNetConfig::new()
            .with_num_classes(colors.len() - 1)
            .with_base_channels(args.base_channels)
            .with_depth(args.depth),
        FolderDatasetConfig::new()
            .with_width(args.width)
            .with_height(args.height)
            .with_seed(args.seed)
            .with_validation_split(args.validation_split),
        DataLoaderConfig::new()
            .with_batch_size(args.batch_size)
            .with_num_workers(args.num_workers)
            .with_shuffle_seed(Some(args.seed)),
        FitConfig::new().with_epochs(args.epochs),
        args.ignore_channel,
        args.loss.clone(),
        args.metrics.clone(),
        args.optimizer.name().to_string(),
        args.lr,
    );

    std::fs::create_dir_all(&args.artifact_dir)?;
    config.save(args.artifact_dir.join("config.json"))?;

    let subset = |side: Subset| {
        let dataset = if config.dataset.validation_split > 0.0 {
            config.dataset.clone().with_subset(Some(side))
        } else {
            config.dataset.clone()
        };
        SegmentationFolderDataset::from_folders(&args.images, &args.masks, colors.clone(), dataset)
    };

    let train = segmentation_dataloader::<MyAutodiffBackend, _>(
        subset(Subset::Training)?,
        device.clone(),
        &config.loader,
    );
    let valid = if config.dataset.validation_split > 0.0 {
        Some(segmentation_dataloader::<MyAutodiffBackend, _>(
            subset(Subset::Validation)?,
            device.clone(),
            &config.loader.clone().with_shuffle_seed(None),
        ))
    } else {
        None
    };

    info!(
        classes = colors.len() - 1,
        base_channels = args.base_channels,
        depth = args.depth,
        "Creating U-Net"
    );
    let model = config.model.init::<MyAutodiffBackend>(&device);

    let mut lazy = LazyModel::new(Estimator::new(model), config.ignore_channel);
    lazy.compile(
        CompileOptions::new()
            .with_loss(config.loss.as_str())
            .with_metrics(config.metrics.iter().map(String::as_str))
            .with_optimizer(args.optimizer)
            .with_learning_rate(config.learning_rate),
    )?;

    let history = lazy.fit(
        &train,
        valid
            .as_ref()
            .map(|loader| loader as &dyn BatchSource<MyAutodiffBackend>),
        &config.fit,
    )?;

    if let Some(last) = history.last() {
        for (name, value) in last.train.iter() {
            info!(metric = name, value, "Final training value");
        }
        if let Some(validation) = &last.validation {
            for (name, value) in validation.iter() {
                info!(metric = name, value, "Final validation value");
            }
        }
    }

    let model_path = args.artifact_dir.join("model");
    lazy.into_inner()
        .into_model()
        .save_file(&model_path, &CompactRecorder::new())
        .map_err(|err| anyhow!("Failed to save model: {err}"))?;
    info!(path = ?model_path, "Saved trained model");

    Ok(())
}
