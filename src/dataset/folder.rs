use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use burn::{data::dataset::Dataset, prelude::*};
use image::{DynamicImage, GenericImageView, imageops::FilterType};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{
    color::{ColorMap, rgb_to_onehot},
    crop::{center_crop_box, random_crop_origin},
};
use crate::error::{Error, Result};

pub const SUPPORTED_FILES: [&str; 6] = ["bmp", "jpg", "jpeg", "png", "tif", "tiff"];

/// Which side of a validation split to keep.
#[derive(Config, Debug)]
pub enum Subset {
    Training,
    Validation,
}

#[derive(Config, Debug)]
pub struct FolderDatasetConfig {
    #[config(default = "256")]
    pub width: u32,
    #[config(default = "256")]
    pub height: u32,
    /// Fraction of the pairs held out for validation, in `[0, 1)`.
    #[config(default = "0.0")]
    pub validation_split: f64,
    /// Required when `validation_split` is positive.
    pub subset: Option<Subset>,
    #[config(default = "true")]
    pub shuffle: bool,
    #[config(default = "48")]
    pub seed: u64,
    /// Center-crop to the target aspect ratio before resizing.
    #[config(default = "true")]
    pub crop_to_aspect_ratio: bool,
    /// Cut a `width × height` window instead of resizing when the image is
    /// large enough.
    #[config(default = "false")]
    pub random_crop: bool,
}

/// Paths of one image and its colour-coded mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentationPair {
    pub image_path: PathBuf,
    pub mask_path: PathBuf,
}

/// A loaded pair, channels-last and flattened.
#[derive(Clone, Debug)]
pub struct SegmentationItem {
    /// `[height, width, 3]`, scaled to `[0, 1]`.
    pub image: Vec<f32>,
    /// `[height, width, classes]` one-hot.
    pub mask: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub classes: usize,
}

/// Image/mask pairs read from two folders, decoded on access.
pub struct SegmentationFolderDataset {
    pairs: Vec<SegmentationPair>,
    colors: ColorMap,
    config: FolderDatasetConfig,
    draws: AtomicU64,
}

impl SegmentationFolderDataset {
    /// Pair every supported image in `image_dir` with the mask sharing its
    /// file stem in `mask_dir`.
    pub fn from_folders<P: AsRef<Path>>(
        image_dir: P,
        mask_dir: P,
        colors: ColorMap,
        config: FolderDatasetConfig,
    ) -> Result<Self> {
        let image_dir = image_dir.as_ref();
        let mask_dir = mask_dir.as_ref();

        let images = list_supported_files(image_dir)?;
        let masks: HashMap<String, PathBuf> = list_supported_files(mask_dir)?
            .into_iter()
            .filter_map(|path| Some((file_stem(&path)?, path)))
            .collect();

        let mut pairs = Vec::with_capacity(images.len());
        for image_path in images {
            let Some(stem) = file_stem(&image_path) else {
                continue;
            };

            match masks.get(&stem) {
                Some(mask_path) => pairs.push(SegmentationPair {
                    image_path,
                    mask_path: mask_path.clone(),
                }),
                None => warn!(image = ?image_path, "No mask found, skipping"),
            }
        }

        if pairs.is_empty() {
            return Err(Error::NoValidPairs {
                images: image_dir.to_path_buf(),
                masks: mask_dir.to_path_buf(),
            });
        }

        Self::from_pairs(pairs, colors, config)
    }

    /// Build from explicit pairs. Every path must have a supported extension.
    ///
    /// Every pair is decoded once up front. Pairs that fail to decode, or
    /// whose image and mask sizes differ, are dropped with a warning before
    /// shuffling and splitting.
    pub fn from_pairs(
        pairs: Vec<SegmentationPair>,
        colors: ColorMap,
        config: FolderDatasetConfig,
    ) -> Result<Self> {
        for pair in &pairs {
            check_extension(&pair.image_path)?;
            check_extension(&pair.mask_path)?;
        }

        if config.width == 0 || config.height == 0 {
            return Err(Error::InvalidConfig(
                "target width and height must be positive".to_string(),
            ));
        }

        let mut pairs = usable_pairs(pairs);
        if pairs.is_empty() {
            return Err(Error::EmptyDataset);
        }

        if config.shuffle {
            pairs.shuffle(&mut StdRng::seed_from_u64(config.seed));
        }

        let pairs = split(pairs, config.validation_split, config.subset.as_ref())?;

        info!(
            pairs = pairs.len(),
            classes = colors.len(),
            width = config.width,
            height = config.height,
            "Loaded segmentation folder dataset"
        );

        Ok(Self {
            pairs,
            colors,
            config,
            draws: AtomicU64::new(0),
        })
    }

    pub fn pairs(&self) -> &[SegmentationPair] {
        &self.pairs
    }

    pub fn colors(&self) -> &ColorMap {
        &self.colors
    }

    /// Decode, crop and resize pair `index`.
    pub fn load(&self, index: usize) -> Result<SegmentationItem> {
        let Some(pair) = self.pairs.get(index) else {
            return Err(Error::InvalidConfig(format!(
                "index {index} is out of range for {} pairs",
                self.pairs.len()
            )));
        };

        let (image, mask) = open_pair(pair)?;
        let (image, mask) = self.fit_to_target(image, mask);

        let height = image.height() as usize;
        let width = image.width() as usize;

        Ok(SegmentationItem {
            image: image.to_rgb32f().into_raw(),
            mask: rgb_to_onehot(&mask.to_rgb8(), &self.colors),
            height,
            width,
            classes: self.colors.len(),
        })
    }

    fn fit_to_target(
        &self,
        image: DynamicImage,
        mask: DynamicImage,
    ) -> (DynamicImage, DynamicImage) {
        let (width, height) = image.dimensions();
        let (target_width, target_height) = (self.config.width, self.config.height);

        if self.config.random_crop && width >= target_width && height >= target_height {
            let draw = self.draws.fetch_add(1, Ordering::Relaxed);
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(draw));
            let x = random_crop_origin(width, target_width, &mut rng);
            let y = random_crop_origin(height, target_height, &mut rng);

            return (
                image.crop_imm(x, y, target_width, target_height),
                mask.crop_imm(x, y, target_width, target_height),
            );
        }

        let (image, mask) = if self.config.crop_to_aspect_ratio {
            let (x, y, w, h) = center_crop_box(width, height, target_width, target_height);
            (image.crop_imm(x, y, w, h), mask.crop_imm(x, y, w, h))
        } else {
            (image, mask)
        };

        (
            image.resize_exact(target_width, target_height, FilterType::Triangle),
            mask.resize_exact(target_width, target_height, FilterType::Nearest),
        )
    }
}

impl Dataset<SegmentationItem> for SegmentationFolderDataset {
    /// Pairs were checked when the dataset was built, so a failure here
    /// means a file changed on disk since.
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        if index >= self.pairs.len() {
            return None;
        }

        match self.load(index) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(index, error = %err, "Failed to load segmentation pair");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}

fn open(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })
}

fn open_pair(pair: &SegmentationPair) -> Result<(DynamicImage, DynamicImage)> {
    let image = open(&pair.image_path)?;
    let mask = open(&pair.mask_path)?;

    if image.dimensions() != mask.dimensions() {
        let (iw, ih) = image.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(Error::ShapeMismatch {
            context: format!("mask {:?}", pair.mask_path),
            expected: vec![ih as usize, iw as usize],
            actual: vec![mh as usize, mw as usize],
        });
    }

    Ok((image, mask))
}

/// Pairs that decode, in their original order.
fn usable_pairs(pairs: Vec<SegmentationPair>) -> Vec<SegmentationPair> {
    let checks: Vec<Result<()>> = pairs
        .par_iter()
        .map(|pair| open_pair(pair).map(|_| ()))
        .collect();

    pairs
        .into_iter()
        .zip(checks)
        .filter_map(|(pair, check)| match check {
            Ok(()) => Some(pair),
            Err(err) => {
                warn!(image = ?pair.image_path, error = %err, "Skipping unreadable pair");
                None
            }
        })
        .collect()
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_FILES
                .iter()
                .any(|valid_ext| valid_ext.eq_ignore_ascii_case(ext))
        })
}

fn check_extension(path: &Path) -> Result<()> {
    if is_supported(path) {
        Ok(())
    } else {
        Err(Error::UnsupportedExtension(
            path.extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ))
    }
}

/// Supported files directly inside `dir`, sorted by path.
fn list_supported_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.into_path();
        if path.is_file() && is_supported(&path) {
            files.push(path);
        } else {
            debug!(path = ?path, "Ignoring entry");
        }
    }

    Ok(files)
}

fn split(
    pairs: Vec<SegmentationPair>,
    validation_split: f64,
    subset: Option<&Subset>,
) -> Result<Vec<SegmentationPair>> {
    if !(0.0..1.0).contains(&validation_split) {
        return Err(Error::InvalidConfig(format!(
            "validation_split must be in [0, 1), got {validation_split}"
        )));
    }

    let held_out = (validation_split * pairs.len() as f64) as usize;
    if validation_split > 0.0 && (held_out == 0 || held_out == pairs.len()) {
        return Err(Error::InvalidConfig(format!(
            "validation_split {validation_split} over {} pairs leaves an empty subset",
            pairs.len()
        )));
    }
    let boundary = pairs.len() - held_out;

    match (validation_split > 0.0, subset) {
        (false, None) => Ok(pairs),
        (true, Some(Subset::Training)) => Ok(pairs[..boundary].to_vec()),
        (true, Some(Subset::Validation)) => Ok(pairs[boundary..].to_vec()),
        (true, None) => Err(Error::InvalidConfig(
            "a subset is required when validation_split is set".to_string(),
        )),
        (false, Some(_)) => Err(Error::InvalidConfig(
            "subset requires a positive validation_split".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        dataset::{DataLoaderConfig, segmentation_dataloader},
        tests::TestBackend,
    };

    /// `count` 8x6 image/mask pairs; mask left half blue, right half white.
    fn folders(count: usize) -> (TempDir, PathBuf, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        let masks = root.path().join("masks");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::create_dir_all(&masks).unwrap();

        for i in 0..count {
            RgbImage::from_pixel(8, 6, Rgb([10 * i as u8, 20, 30]))
                .save(images.join(format!("sample_{i}.png")))
                .unwrap();
            RgbImage::from_fn(8, 6, |x, _| {
                if x < 4 {
                    Rgb([0, 0, 255])
                } else {
                    Rgb([255, 255, 255])
                }
            })
            .save(masks.join(format!("sample_{i}.png")))
            .unwrap();
        }

        (root, images, masks)
    }

    fn config() -> FolderDatasetConfig {
        FolderDatasetConfig::new()
            .with_width(4)
            .with_height(4)
            .with_crop_to_aspect_ratio(false)
    }

    #[test]
    fn pairs_files_by_stem_and_skips_orphans() {
        let (_root, images, masks) = folders(3);
        std::fs::write(images.join("notes.txt"), "not an image").unwrap();
        RgbImage::new(8, 6).save(images.join("orphan.png")).unwrap();

        let dataset =
            SegmentationFolderDataset::from_folders(&images, &masks, ColorMap::default(), config())
                .unwrap();

        assert_eq!(dataset.len(), 3);
        assert!(
            dataset
                .pairs()
                .iter()
                .all(|pair| file_stem(&pair.image_path) == file_stem(&pair.mask_path))
        );
    }

    #[test]
    fn missing_folder_and_empty_pairing_are_errors() {
        let (root, images, _masks) = folders(1);
        let empty = root.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();

        assert!(matches!(
            SegmentationFolderDataset::from_folders(
                images.clone(),
                root.path().join("missing"),
                ColorMap::default(),
                config()
            ),
            Err(Error::DirectoryNotFound(_))
        ));
        assert!(matches!(
            SegmentationFolderDataset::from_folders(images, empty, ColorMap::default(), config()),
            Err(Error::NoValidPairs { .. })
        ));
    }

    #[test]
    fn validation_split_partitions_pairs() {
        let (_root, images, masks) = folders(5);
        let split = |subset| {
            SegmentationFolderDataset::from_folders(
                &images,
                &masks,
                ColorMap::default(),
                config()
                    .with_validation_split(0.4)
                    .with_subset(Some(subset)),
            )
            .unwrap()
        };

        let training = split(Subset::Training);
        let validation = split(Subset::Validation);

        assert_eq!(training.len(), 3);
        assert_eq!(validation.len(), 2);
        assert!(
            validation
                .pairs()
                .iter()
                .all(|pair| !training.pairs().contains(pair))
        );
    }

    #[test]
    fn split_without_subset_is_rejected() {
        let (_root, images, masks) = folders(2);

        assert!(matches!(
            SegmentationFolderDataset::from_folders(
                &images,
                &masks,
                ColorMap::default(),
                config().with_validation_split(0.5)
            ),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn split_leaving_an_empty_subset_is_rejected() {
        let (_root, images, masks) = folders(5);

        assert!(matches!(
            SegmentationFolderDataset::from_folders(
                &images,
                &masks,
                ColorMap::default(),
                config()
                    .with_validation_split(0.1)
                    .with_subset(Some(Subset::Validation))
            ),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn unreadable_pairs_are_dropped_before_loading() {
        let (_root, images, masks) = folders(4);
        std::fs::write(masks.join("sample_1.png"), b"not a png").unwrap();

        let dataset =
            SegmentationFolderDataset::from_folders(&images, &masks, ColorMap::default(), config())
                .unwrap();

        assert_eq!(dataset.len(), 3);
        assert!(
            dataset
                .pairs()
                .iter()
                .all(|pair| file_stem(&pair.image_path).as_deref() != Some("sample_1"))
        );

        let loader = segmentation_dataloader::<TestBackend, _>(
            dataset,
            Default::default(),
            &DataLoaderConfig::new()
                .with_batch_size(1)
                .with_num_workers(1),
        );
        assert_eq!(loader.iter().count(), 3);
    }

    #[test]
    fn all_pairs_unreadable_is_an_error() {
        let (_root, images, masks) = folders(1);
        std::fs::write(images.join("sample_0.png"), b"truncated").unwrap();

        assert!(matches!(
            SegmentationFolderDataset::from_folders(&images, &masks, ColorMap::default(), config()),
            Err(Error::EmptyDataset)
        ));
    }

    #[test]
    fn explicit_pairs_need_supported_extensions() {
        let pairs = vec![SegmentationPair {
            image_path: PathBuf::from("a.gif"),
            mask_path: PathBuf::from("a.png"),
        }];

        assert!(matches!(
            SegmentationFolderDataset::from_pairs(pairs, ColorMap::default(), config()),
            Err(Error::UnsupportedExtension(ext)) if ext == "gif"
        ));
    }

    #[test]
    fn items_are_resized_and_one_hot_encoded() {
        let (_root, images, masks) = folders(1);
        let dataset =
            SegmentationFolderDataset::from_folders(&images, &masks, ColorMap::default(), config())
                .unwrap();

        let item = dataset.get(0).unwrap();

        assert_eq!((item.height, item.width, item.classes), (4, 4, 2));
        assert_eq!(item.image.len(), 4 * 4 * 3);
        assert_eq!(item.mask.len(), 4 * 4 * 2);
        // First row: two background pixels then two foreground pixels.
        assert_eq!(&item.mask[..8], &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
        assert!(item.image.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn random_crop_cuts_a_window_without_resizing() {
        let (_root, images, masks) = folders(1);
        let dataset = SegmentationFolderDataset::from_folders(
            &images,
            &masks,
            ColorMap::default(),
            config().with_random_crop(true),
        )
        .unwrap();

        let item = dataset.load(0).unwrap();

        assert_eq!((item.height, item.width), (4, 4));
        let ones = item.mask.iter().filter(|v| **v == 1.0).count();
        assert_eq!(ones, 16);
    }
}
