//! Frame-difference motion detection over pairs of JPEG images
//!
//! Both images are decoded, converted to intensity, smoothed with a Gaussian
//! blur, differenced and binarized. The binary mask is dilated so nearby
//! changes merge, then connected regions are measured. Motion is reported if
//! any region is strictly larger than the configured minimum area.

use image::{GrayImage, ImageFormat};
use thiserror::Error;
use tracing::{debug, trace};

/// Passes of the 3x3 dilation applied to the change mask
const DILATE_ITERATIONS: usize = 2;

#[derive(Error, Debug)]
pub enum MotionError {
    #[error("blur kernel must be odd and positive, got {0}")]
    InvalidBlurKernel(u32),
}

/// Sensitivity parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionParams {
    /// Per-pixel intensity difference above which a pixel counts as changed.
    /// Not clamped: a negative value marks every pixel, 255 or more marks none.
    pub threshold: i32,
    /// A region must be strictly larger than this many pixels
    pub min_area: u32,
    /// Gaussian kernel size (odd); 1 disables smoothing
    pub blur_kernel: u32,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            threshold: 20,
            min_area: 200,
            blur_kernel: 21,
        }
    }
}

/// Stateless comparator over two encoded frames
#[derive(Debug, Clone)]
pub struct MotionDetector {
    params: MotionParams,
    sigma: Option<f32>,
}

impl MotionDetector {
    pub fn new(params: MotionParams) -> Result<Self, MotionError> {
        if params.blur_kernel == 0 || params.blur_kernel % 2 == 0 {
            return Err(MotionError::InvalidBlurKernel(params.blur_kernel));
        }

        let sigma = (params.blur_kernel > 1).then(|| kernel_sigma(params.blur_kernel));

        Ok(Self { params, sigma })
    }

    /// Decides whether `current` differs from `previous` by a large enough
    /// region. Fails closed: missing, empty or undecodable input is "no motion".
    pub fn detect(&self, current: &[u8], previous: Option<&[u8]>) -> bool {
        let previous = match previous {
            Some(p) if !p.is_empty() => p,
            _ => return false,
        };
        if current.is_empty() {
            return false;
        }

        let (Some(current), Some(previous)) = (decode_gray(current), decode_gray(previous))
        else {
            return false;
        };

        self.compare(&current, &previous)
    }

    /// Runs the comparison on already decoded intensity images
    pub fn compare(&self, current: &GrayImage, previous: &GrayImage) -> bool {
        if current.dimensions() != previous.dimensions() {
            debug!(
                current = ?current.dimensions(),
                previous = ?previous.dimensions(),
                "Frame dimensions differ, skipping motion check"
            );
            return false;
        }

        let current = self.smooth(current);
        let previous = self.smooth(previous);

        let mut mask = ChangeMask::from_difference(&current, &previous, self.params.threshold);
        for _ in 0..DILATE_ITERATIONS {
            mask = mask.dilate();
        }

        let areas = mask.region_areas();
        trace!(regions = areas.len(), largest = ?areas.iter().max(), "Change regions");
        self.exceeds_min_area(&areas)
    }

    fn exceeds_min_area(&self, areas: &[u32]) -> bool {
        areas.iter().any(|&area| area > self.params.min_area)
    }

    fn smooth(&self, image: &GrayImage) -> GrayImage {
        match self.sigma {
            Some(sigma) => image::imageops::blur(image, sigma),
            None => image.clone(),
        }
    }
}

/// Sigma for a Gaussian of the given kernel size when none is specified,
/// matching the usual `0.3 * ((k - 1) / 2 - 1) + 0.8` rule.
fn kernel_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn decode_gray(data: &[u8]) -> Option<GrayImage> {
    match image::load_from_memory_with_format(data, ImageFormat::Jpeg) {
        Ok(img) => Some(img.into_luma8()),
        Err(e) => {
            debug!(error = %e, bytes = data.len(), "Failed to decode frame");
            None
        }
    }
}

/// Binary image of changed pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl ChangeMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Marks pixels whose absolute difference is strictly above `threshold`
    pub fn from_difference(a: &GrayImage, b: &GrayImage, threshold: i32) -> Self {
        let (width, height) = a.dimensions();
        let bits = a
            .as_raw()
            .iter()
            .zip(b.as_raw().iter())
            .map(|(&pa, &pb)| i32::from(pa.abs_diff(pb)) > threshold)
            .collect();
        Self {
            width,
            height,
            bits,
        }
    }

    pub fn set(&mut self, x: u32, y: u32) {
        let idx = self.index(x, y);
        self.bits[idx] = true;
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[self.index(x, y)]
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// One pass of dilation with a 3x3 rectangular element
    pub fn dilate(&self) -> Self {
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                if !self.get(x, y) {
                    continue;
                }
                let x0 = x.saturating_sub(1);
                let y0 = y.saturating_sub(1);
                let x1 = (x + 1).min(self.width - 1);
                let y1 = (y + 1).min(self.height - 1);
                for ny in y0..=y1 {
                    for nx in x0..=x1 {
                        out.set(nx, ny);
                    }
                }
            }
        }
        out
    }

    /// Pixel counts of the 8-connected regions of set pixels
    pub fn region_areas(&self) -> Vec<u32> {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut visited = vec![false; self.bits.len()];
        let mut areas = Vec::new();
        let mut stack = Vec::new();

        for start in 0..self.bits.len() {
            if !self.bits[start] || visited[start] {
                continue;
            }

            visited[start] = true;
            stack.push(start);
            let mut area = 0u32;

            while let Some(idx) = stack.pop() {
                area += 1;
                let x = idx % w;
                let y = idx / w;

                for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        let n = ny * w + nx;
                        if self.bits[n] && !visited[n] {
                            visited[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }

            areas.push(area);
        }

        areas
    }
}
