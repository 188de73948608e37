use rand::Rng;
use rand_distr::{Beta, Distribution};

/// Offset of a `size`-long window inside `length`, drawn from Beta(5, 5) so
/// crops favour the centre. Returns 0 when the window does not fit.
pub fn random_crop_origin<R: Rng + ?Sized>(length: u32, size: u32, rng: &mut R) -> u32 {
    if size >= length {
        return 0;
    }

    let range = length - size;
    let fraction = Beta::<f64>::new(5.0, 5.0)
        .map(|beta| beta.sample(rng))
        .unwrap_or(0.5)
        .clamp(0.0, 1.0 - 1e-6);

    ((fraction * range as f64) as u32).min(range)
}

/// Largest centred `(x, y, width, height)` box with the aspect ratio of
/// `target_width × target_height`.
pub fn center_crop_box(
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
) -> (u32, u32, u32, u32) {
    let (w, h) = (width as u64, height as u64);
    let (tw, th) = (target_width.max(1) as u64, target_height.max(1) as u64);

    if w * th > h * tw {
        let crop_width = ((h * tw) / th).max(1) as u32;
        ((width - crop_width) / 2, 0, crop_width, height)
    } else {
        let crop_height = ((w * th) / tw).max(1) as u32;
        (0, (height - crop_height) / 2, width, crop_height)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn random_offsets_stay_in_range_and_favour_the_centre() {
        let mut rng = StdRng::seed_from_u64(48);

        let offsets: Vec<u32> = (0..500)
            .map(|_| random_crop_origin(300, 100, &mut rng))
            .collect();

        assert!(offsets.iter().all(|offset| *offset <= 200));
        let mean = offsets.iter().map(|o| *o as f64).sum::<f64>() / offsets.len() as f64;
        assert!((mean - 100.0).abs() < 15.0);
    }

    #[test]
    fn window_larger_than_length_starts_at_zero() {
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(random_crop_origin(64, 64, &mut rng), 0);
        assert_eq!(random_crop_origin(32, 64, &mut rng), 0);
    }

    #[test]
    fn center_crop_keeps_target_aspect() {
        assert_eq!(center_crop_box(400, 200, 100, 100), (100, 0, 200, 200));
        assert_eq!(center_crop_box(200, 400, 100, 50), (0, 150, 200, 100));
        assert_eq!(center_crop_box(256, 256, 64, 64), (0, 0, 256, 256));
    }
}
