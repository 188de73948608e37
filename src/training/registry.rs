//! Name → factory registries for losses and metrics.
//!
//! Keys are normalized (trimmed, lower-cased) and validated when they are
//! registered, so a lookup either returns a fresh instance or fails with
//! [`Error::UnknownIdentifier`].

use std::collections::BTreeMap;
use std::sync::Arc;

use burn::prelude::*;

use super::{
    loss::{
        BinaryCrossEntropyLossConfig, CategoricalCrossEntropyLossConfig, DiceLossConfig,
        JaccardLossConfig, MeanAbsoluteErrorLoss, MeanSquaredErrorLoss, SegmentationLoss,
    },
    metrics::{
        Accuracy, BinaryAccuracy, FScore, IoUScore, MeanAbsoluteError, MeanIoU, MeanSquaredError,
        SegmentationMetric,
    },
};
use crate::error::{Error, IdentifierKind, Result};

/// Anything a registry can hand out needs a name to validate against.
pub trait Named {
    fn registered_name(&self) -> String;
}

impl<B: Backend> Named for dyn SegmentationLoss<B> {
    fn registered_name(&self) -> String {
        self.name()
    }
}

impl<B: Backend> Named for dyn SegmentationMetric<B> {
    fn registered_name(&self) -> String {
        self.name()
    }
}

type Factory<T> = Arc<dyn Fn() -> Box<T> + Send + Sync>;

pub struct Registry<T: ?Sized> {
    kind: IdentifierKind,
    factories: BTreeMap<String, Factory<T>>,
}

pub type LossRegistry<B> = Registry<dyn SegmentationLoss<B>>;
pub type MetricRegistry<B> = Registry<dyn SegmentationMetric<B>>;

fn normalize(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

impl<T: ?Sized + Named> Registry<T> {
    pub fn new(kind: IdentifierKind) -> Self {
        Self {
            kind,
            factories: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Register `factory` under `key`.
    ///
    /// Keys must be non-empty, made of `[a-z0-9_]` after normalization and
    /// not already present. The factory is invoked once to check it builds
    /// a named instance.
    pub fn register<F>(&mut self, key: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        let key = self.validate_key(key)?;

        if factory().registered_name().trim().is_empty() {
            return Err(self.invalid(&key, "factory produced an unnamed instance"));
        }

        self.factories.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Make `alias` resolve to the same factory as `target`.
    pub fn alias(&mut self, alias: &str, target: &str) -> Result<()> {
        let factory = self
            .factories
            .get(&normalize(target))
            .cloned()
            .ok_or_else(|| Error::UnknownIdentifier {
                kind: self.kind,
                name: target.to_string(),
            })?;

        let alias = self.validate_key(alias)?;
        self.factories.insert(alias, factory);
        Ok(())
    }

    /// Build a fresh instance for `key`.
    pub fn get(&self, key: &str) -> Result<Box<T>> {
        self.factories
            .get(&normalize(key))
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownIdentifier {
                kind: self.kind,
                name: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(&normalize(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    fn validate_key(&self, key: &str) -> Result<String> {
        let normalized = normalize(key);

        if normalized.is_empty() {
            return Err(self.invalid(key, "key is empty"));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(self.invalid(key, "only [a-z0-9_] are allowed"));
        }
        if self.factories.contains_key(&normalized) {
            return Err(self.invalid(key, "key is already registered"));
        }

        Ok(normalized)
    }

    fn invalid(&self, key: &str, reason: &str) -> Error {
        Error::InvalidRegistration {
            kind: self.kind,
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl<B: Backend> Registry<dyn SegmentationLoss<B>> {
    /// Registry holding every built-in loss.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new(IdentifierKind::Loss);
        registry
            .register_defaults()
            .expect("Built-in losses have valid, distinct keys");
        registry
    }

    fn register_defaults(&mut self) -> Result<()> {
        self.register("dice_loss", || Box::new(DiceLossConfig::new().init()))?;
        self.alias("dice", "dice_loss")?;

        self.register("jaccard_loss", || Box::new(JaccardLossConfig::new().init()))?;
        self.alias("jaccard", "jaccard_loss")?;
        self.alias("iou", "jaccard_loss")?;

        self.register("binary_crossentropy", || {
            Box::new(BinaryCrossEntropyLossConfig::new().init())
        })?;
        self.alias("bce", "binary_crossentropy")?;

        self.register("categorical_crossentropy", || {
            Box::new(CategoricalCrossEntropyLossConfig::new().init())
        })?;
        self.alias("cce", "categorical_crossentropy")?;

        self.register("mean_squared_error", || Box::new(MeanSquaredErrorLoss))?;
        self.alias("mse", "mean_squared_error")?;

        self.register("mean_absolute_error", || Box::new(MeanAbsoluteErrorLoss))?;
        self.alias("mae", "mean_absolute_error")?;

        Ok(())
    }
}

impl<B: Backend> Registry<dyn SegmentationMetric<B>> {
    /// Registry holding every built-in metric.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new(IdentifierKind::Metric);
        registry
            .register_defaults()
            .expect("Built-in metrics have valid, distinct keys");
        registry
    }

    fn register_defaults(&mut self) -> Result<()> {
        self.register("accuracy", || Box::new(Accuracy))?;
        self.alias("acc", "accuracy")?;

        self.register("binary_accuracy", || Box::new(BinaryAccuracy::default()))?;

        self.register("iou_score", || Box::new(IoUScore::default()))?;
        self.alias("iou", "iou_score")?;

        self.register("mean_iou", || Box::new(MeanIoU))?;

        self.register("f1_score", || Box::new(FScore::default()))?;
        self.alias("f_score", "f1_score")?;

        self.register("mean_squared_error", || Box::new(MeanSquaredError))?;
        self.alias("mse", "mean_squared_error")?;

        self.register("mean_absolute_error", || Box::new(MeanAbsoluteError))?;
        self.alias("mae", "mean_absolute_error")?;

        Ok(())
    }
}
