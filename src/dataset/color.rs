//! Conversions between RGB label images and one-hot class masks.

use burn::{prelude::*, tensor::ElementConversion};
use image::{Rgb, RgbImage};

use crate::error::{Error, Result};

/// One entry of a [`ColorMapConfig`].
#[derive(Config, Debug)]
pub struct ClassColor {
    pub index: i64,
    pub rgb: [u8; 3],
}

/// Serializable form of a [`ColorMap`], loadable from JSON with
/// [`Config::load`].
#[derive(Config, Debug)]
pub struct ColorMapConfig {
    pub classes: Vec<ClassColor>,
}

impl ColorMapConfig {
    pub fn init(&self) -> Result<ColorMap> {
        ColorMap::new(self.classes.iter().map(|class| (class.index, class.rgb)))
    }
}

/// Class index → RGB colour.
///
/// Entries keep insertion order, and that order is the channel order of the
/// one-hot masks. Class indices only need to be unique.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColorMap {
    entries: Vec<(i64, [u8; 3])>,
}

impl Default for ColorMap {
    fn default() -> Self {
        Self {
            entries: vec![(0, [0, 0, 255]), (1, [255, 255, 255])],
        }
    }
}

impl ColorMap {
    pub fn new(entries: impl IntoIterator<Item = (i64, [u8; 3])>) -> Result<Self> {
        let entries: Vec<_> = entries.into_iter().collect();

        if entries.is_empty() {
            return Err(Error::InvalidColorMap("no classes given".to_string()));
        }
        for (position, (index, _)) in entries.iter().enumerate() {
            if entries[..position].iter().any(|(seen, _)| seen == index) {
                return Err(Error::InvalidColorMap(format!(
                    "class index {index} is given more than once"
                )));
            }
        }

        Ok(Self { entries })
    }

    /// Number of classes, i.e. one-hot channels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Colour of class `index`.
    pub fn color(&self, index: i64) -> Option<[u8; 3]> {
        self.entries
            .iter()
            .find(|(class, _)| *class == index)
            .map(|(_, rgb)| *rgb)
    }

    /// One-hot channel of class `index`.
    pub fn channel(&self, index: i64) -> Option<usize> {
        self.entries.iter().position(|(class, _)| *class == index)
    }

    /// Class index stored at one-hot channel `channel`.
    pub fn class_at(&self, channel: usize) -> Option<i64> {
        self.entries.get(channel).map(|(class, _)| *class)
    }

    /// `(class index, colour)` in channel order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, [u8; 3])> + '_ {
        self.entries.iter().copied()
    }

    pub fn to_config(&self) -> ColorMapConfig {
        ColorMapConfig::new(
            self.iter()
                .map(|(index, rgb)| ClassColor::new(index, rgb))
                .collect(),
        )
    }
}

/// 1.0 where the pixel equals `color` exactly, 0.0 elsewhere, row-major.
pub fn mask_by_color(image: &RgbImage, color: [u8; 3]) -> Vec<f32> {
    image
        .pixels()
        .map(|pixel| if pixel.0 == color { 1.0 } else { 0.0 })
        .collect()
}

/// Channels-last one-hot encoding `[height, width, classes]`, flattened,
/// with channels in colour map order.
///
/// Pixels whose colour is not in the map get an all-zero vector.
pub fn rgb_to_onehot(image: &RgbImage, colors: &ColorMap) -> Vec<f32> {
    let classes = colors.len();
    let mut onehot = vec![0.0; image.width() as usize * image.height() as usize * classes];

    for (position, pixel) in image.pixels().enumerate() {
        for (channel, (_, rgb)) in colors.iter().enumerate() {
            if pixel.0 == rgb {
                onehot[position * classes + channel] = 1.0;
            }
        }
    }

    onehot
}

/// Inverse of [`rgb_to_onehot`]: every pixel takes the colour of its
/// arg-max class.
pub fn onehot_to_rgb(
    onehot: &[f32],
    width: u32,
    height: u32,
    colors: &ColorMap,
) -> Result<RgbImage> {
    let classes = colors.len();
    let expected = width as usize * height as usize * classes;

    if onehot.len() != expected {
        return Err(Error::ShapeMismatch {
            context: "one-hot mask".to_string(),
            expected: vec![height as usize, width as usize, classes],
            actual: vec![onehot.len()],
        });
    }

    let mut image = RgbImage::new(width, height);
    for (pixel, scores) in image.pixels_mut().zip(onehot.chunks_exact(classes)) {
        let channel = scores
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| if *v > scores[best] { i } else { best });
        *pixel = Rgb(colors.entries[channel].1);
    }

    Ok(image)
}

/// Union of the foregrounds of two background/foreground masks.
///
/// Both inputs must be two-channel one-hot tensors of the same shape.
pub fn combine_binary_masks<B: Backend, const D: usize>(
    first: Tensor<B, D>,
    second: Tensor<B, D>,
) -> Result<Tensor<B, D>> {
    check_binary_onehot("first mask", &first)?;
    check_binary_onehot("second mask", &second)?;

    if first.dims() != second.dims() {
        return Err(Error::ShapeMismatch {
            context: "combine_binary_masks".to_string(),
            expected: first.dims().to_vec(),
            actual: second.dims().to_vec(),
        });
    }

    let axis = D - 1;
    let foreground = (first.narrow(axis, 1, 1) + second.narrow(axis, 1, 1)).clamp(0.0, 1.0);
    let background = foreground.ones_like() - foreground.clone();

    Ok(Tensor::cat(vec![background, foreground], axis))
}

fn check_binary_onehot<B: Backend, const D: usize>(name: &str, mask: &Tensor<B, D>) -> Result<()> {
    let dims = mask.dims();

    if dims[D - 1] != 2 {
        let mut expected = dims.to_vec();
        expected[D - 1] = 2;
        return Err(Error::ShapeMismatch {
            context: name.to_string(),
            expected,
            actual: dims.to_vec(),
        });
    }

    let pixels = dims[..D - 1].iter().product::<usize>() as f64;
    let total = mask.clone().sum().into_scalar().elem::<f64>();
    if (total - pixels).abs() > 0.5 {
        return Err(Error::InvalidConfig(format!(
            "{name} is not one-hot: channel sum {total} over {pixels} pixels"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    fn two_tone() -> RgbImage {
        let mut image = RgbImage::from_pixel(2, 2, Rgb([0, 0, 255]));
        image.put_pixel(1, 0, Rgb([255, 255, 255]));
        image
    }

    #[test]
    fn default_map_is_blue_background_white_foreground() {
        let colors = ColorMap::default();

        assert_eq!(colors.color(0), Some([0, 0, 255]));
        assert_eq!(colors.color(1), Some([255, 255, 255]));
    }

    #[test]
    fn color_map_rejects_duplicates_and_empty_maps() {
        assert!(ColorMap::new([(0, [0, 0, 0]), (0, [1, 1, 1])]).is_err());
        assert!(ColorMap::new(Vec::new()).is_err());
    }

    #[test]
    fn color_map_accepts_sparse_indices() {
        let colors = ColorMap::new([(3, [1, 2, 3]), (10, [9, 9, 9])]).unwrap();

        assert_eq!(colors.channel(10), Some(1));
        assert_eq!(colors.class_at(0), Some(3));
        assert_eq!(colors.color(3), Some([1, 2, 3]));
        assert_eq!(colors.color(0), None);
    }

    #[test]
    fn insertion_order_sets_the_channel_order() {
        let colors = ColorMap::new([(1, [255, 255, 255]), (0, [0, 0, 255])]).unwrap();
        let white = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));

        assert_eq!(rgb_to_onehot(&white, &colors), vec![1.0, 0.0]);
        assert_eq!(
            colors.iter().collect::<Vec<_>>(),
            vec![(1, [255, 255, 255]), (0, [0, 0, 255])]
        );
        assert_eq!(colors.to_config().init().unwrap(), colors);

        let restored = onehot_to_rgb(&[0.2, 0.8], 1, 1, &colors).unwrap();
        assert_eq!(restored.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn mask_by_color_matches_exactly() {
        assert_eq!(
            mask_by_color(&two_tone(), [255, 255, 255]),
            vec![0.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn onehot_round_trip_restores_colors() {
        let image = two_tone();
        let colors = ColorMap::default();

        let onehot = rgb_to_onehot(&image, &colors);
        assert_eq!(onehot, vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0]);

        let restored = onehot_to_rgb(&onehot, 2, 2, &colors).unwrap();
        assert_eq!(restored, image);
    }

    #[test]
    fn onehot_to_rgb_checks_length() {
        assert!(matches!(
            onehot_to_rgb(&[1.0, 0.0], 2, 2, &ColorMap::default()),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn combined_foreground_is_the_union() {
        let device = Default::default();
        let first = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]], &device);
        let second = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0], [0.0, 1.0], [1.0, 0.0]], &device);

        let combined = combine_binary_masks(first, second).unwrap();
        let values = combined.into_data().convert::<f32>().to_vec::<f32>().unwrap();

        assert_eq!(values, vec![0.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn combine_rejects_non_onehot_masks() {
        let device = Default::default();
        let valid = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);
        let invalid = Tensor::<TestBackend, 2>::from_floats([[1.0, 1.0]], &device);

        assert!(combine_binary_masks(valid, invalid).is_err());
    }
}
