//! Single-channel `f32` images and channel stacks.

use crate::core::{CoreError, CoreResult};

/// Row-major single-channel image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Image {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> CoreResult<Self> {
        if width == 0 || height == 0 {
            return Err(CoreError::InvalidImage(format!(
                "image size must be non-zero, got {width}x{height}"
            )));
        }
        if data.len() != width * height {
            return Err(CoreError::InvalidImage(format!(
                "{width}x{height} image needs {} values, got {}",
                width * height,
                data.len()
            )));
        }
        Ok(Image {
            width,
            height,
            data,
        })
    }

    /// Image whose pixel `(x, y)` is `f(x, y)`.
    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> f32,
    ) -> CoreResult<Self> {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::new(width, height, data)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Whether `(u, v)` lies at least `border` pixels inside the image.
    #[inline]
    pub fn in_bounds(&self, u: f64, v: f64, border: f64) -> bool {
        u >= border
            && v >= border
            && u <= (self.width - 1) as f64 - border
            && v <= (self.height - 1) as f64 - border
    }

    /// Bilinear interpolation at `(u, v)`, `None` outside the pixel grid.
    #[inline]
    pub fn sample(&self, u: f64, v: f64) -> Option<f32> {
        if !self.in_bounds(u, v, 0.0) {
            return None;
        }
        let x0 = u.floor() as usize;
        let y0 = v.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let ax = (u - x0 as f64) as f32;
        let ay = (v - y0 as f64) as f32;

        let top = self.get(x0, y0) * (1.0 - ax) + self.get(x1, y0) * ax;
        let bottom = self.get(x0, y1) * (1.0 - ax) + self.get(x1, y1) * ax;
        Some(top * (1.0 - ay) + bottom * ay)
    }

    /// Intensity gradient `(∂I/∂x, ∂I/∂y)` at a pixel, central differences
    /// inside and one-sided differences on the image border.
    pub fn gradient(&self, x: usize, y: usize) -> (f32, f32) {
        let (xl, xr) = (x.saturating_sub(1), (x + 1).min(self.width - 1));
        let (yu, yd) = (y.saturating_sub(1), (y + 1).min(self.height - 1));
        let gx = if xr > xl {
            (self.get(xr, y) - self.get(xl, y)) / (xr - xl) as f32
        } else {
            0.0
        };
        let gy = if yd > yu {
            (self.get(x, yd) - self.get(x, yu)) / (yd - yu) as f32
        } else {
            0.0
        };
        (gx, gy)
    }
}

/// Co-registered channels of one frame, all of identical size.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStack {
    channels: Vec<Image>,
}

impl ChannelStack {
    pub fn new(channels: Vec<Image>) -> CoreResult<Self> {
        let Some(first) = channels.first() else {
            return Err(CoreError::InvalidImage(
                "channel stack needs at least one channel".to_string(),
            ));
        };
        let (width, height) = (first.width(), first.height());
        if let Some((index, other)) = channels
            .iter()
            .enumerate()
            .find(|(_, c)| c.width() != width || c.height() != height)
        {
            return Err(CoreError::InvalidImage(format!(
                "channel {index} is {}x{}, channel 0 is {width}x{height}",
                other.width(),
                other.height()
            )));
        }
        Ok(ChannelStack { channels })
    }

    pub fn single(image: Image) -> Self {
        ChannelStack {
            channels: vec![image],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Image] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> &Image {
        &self.channels[index]
    }

    pub fn width(&self) -> usize {
        self.channels[0].width()
    }

    pub fn height(&self) -> usize {
        self.channels[0].height()
    }
}

impl From<Image> for ChannelStack {
    fn from(image: Image) -> Self {
        Self::single(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn ramp() -> CoreResult<Image> {
        Image::from_fn(5, 4, |x, y| (2 * x + 10 * y) as f32)
    }

    #[test]
    fn test_new_rejects_bad_sizes() {
        assert!(Image::new(0, 3, vec![]).is_err());
        assert!(Image::new(2, 2, vec![0.0; 3]).is_err());
        assert!(Image::new(2, 2, vec![0.0; 4]).is_ok());
    }

    #[test]
    fn test_bilinear_is_exact_on_linear_images() -> TestResult {
        let image = ramp()?;
        let value = image.sample(1.25, 2.5).ok_or("inside")?;
        assert!((value - (2.5 + 25.0)).abs() < 1e-5);
        assert_eq!(image.sample(4.0, 3.0), Some(38.0));
        Ok(())
    }

    #[test]
    fn test_sample_outside_is_none() -> TestResult {
        let image = ramp()?;
        assert!(image.sample(-0.1, 1.0).is_none());
        assert!(image.sample(1.0, 3.01).is_none());
        assert!(image.sample(f64::NAN, 1.0).is_none());
        Ok(())
    }

    #[test]
    fn test_in_bounds_with_border() -> TestResult {
        let image = ramp()?;
        assert!(image.in_bounds(2.0, 1.5, 1.0));
        assert!(!image.in_bounds(0.5, 1.5, 1.0));
        assert!(!image.in_bounds(2.0, 2.5, 1.0));
        Ok(())
    }

    #[test]
    fn test_gradient() -> TestResult {
        let image = ramp()?;
        assert_eq!(image.gradient(2, 1), (2.0, 10.0));
        assert_eq!(image.gradient(0, 0), (2.0, 10.0));
        assert_eq!(image.gradient(4, 3), (2.0, 10.0));
        Ok(())
    }

    #[test]
    fn test_channel_stack_validation() -> TestResult {
        assert!(ChannelStack::new(vec![]).is_err());
        let mismatched = ChannelStack::new(vec![ramp()?, Image::new(4, 4, vec![0.0; 16])?]);
        assert!(mismatched.is_err());

        let stack = ChannelStack::new(vec![ramp()?, ramp()?])?;
        assert_eq!(stack.num_channels(), 2);
        assert_eq!((stack.width(), stack.height()), (5, 4));
        Ok(())
    }
}
