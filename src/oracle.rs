//! Perceptual similarity oracle. The engine only ever asks a yes/no
//! question about two thumbnail files; how the verdict is reached is
//! deliberately behind this trait so tests can script it.

use image::GenericImageView;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("failed to read image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub trait SimilarityOracle: Send + Sync {
    /// Whether the two thumbnails look like the same content.
    fn similar(&self, left: &Path, right: &Path) -> Result<bool, OracleError>;
}

const HASH_WIDTH: u32 = 8;
const HASH_HEIGHT: u32 = 8;

/// Hamming-distance budget (as a fraction of the hash bits) granted at a
/// chrominance tolerance of 1.0; the configured tolerance scales it.
const DISTANCE_BUDGET: f64 = 0.15;

/// Aspect-ratio spread allowed per unit of proportion tolerance.
const PROPORTION_STEP: f64 = 0.1;

/// Gradient-hash oracle over decoded thumbnails. Tolerances below 1 tighten
/// the verdict, above 1 loosen it.
pub struct PerceptualOracle {
    hasher: Hasher,
    chr_tolerance: f64,
    prop_tolerance: f64,
}

impl PerceptualOracle {
    pub fn new(chr_tolerance: f64, prop_tolerance: f64) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(HASH_WIDTH, HASH_HEIGHT)
            .to_hasher();

        Self {
            hasher,
            chr_tolerance,
            prop_tolerance,
        }
    }

    fn max_distance(&self) -> u32 {
        let bits = (HASH_WIDTH * HASH_HEIGHT) as f64;
        (bits * DISTANCE_BUDGET * self.chr_tolerance).round() as u32
    }
}

impl SimilarityOracle for PerceptualOracle {
    fn similar(&self, left: &Path, right: &Path) -> Result<bool, OracleError> {
        let left_img = image::open(left).map_err(|source| OracleError::Image {
            path: left.to_path_buf(),
            source,
        })?;
        let right_img = image::open(right).map_err(|source| OracleError::Image {
            path: right.to_path_buf(),
            source,
        })?;

        // Proportion check first: wildly different aspect ratios disqualify
        // the pair no matter how close the hashes land.
        let ratio = |img: &image::DynamicImage| {
            let (w, h) = img.dimensions();
            w as f64 / h.max(1) as f64
        };
        let (left_ratio, right_ratio) = (ratio(&left_img), ratio(&right_img));
        let spread = (left_ratio - right_ratio).abs() / left_ratio.min(right_ratio);

        if spread > self.prop_tolerance * PROPORTION_STEP {
            return Ok(false);
        }

        let distance = self
            .hasher
            .hash_image(&left_img)
            .dist(&self.hasher.hash_image(&right_img));

        Ok(distance <= self.max_distance())
    }
}
