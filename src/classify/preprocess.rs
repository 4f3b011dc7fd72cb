use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use serde::Deserialize;

use crate::frame::Frame;

/// Memory layout of the model input tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    /// `[1, height, width, 3]`, the layout of Keras exports.
    #[default]
    Nhwc,
    /// `[1, 3, height, width]`.
    Nchw,
}

/// Channel order the model was trained on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Bgr,
    Rgb,
}

impl std::str::FromStr for InputLayout {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nhwc" => Ok(InputLayout::Nhwc),
            "nchw" => Ok(InputLayout::Nchw),
            other => Err(anyhow!("unknown input layout '{}'", other)),
        }
    }
}

impl std::str::FromStr for ChannelOrder {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bgr" => Ok(ChannelOrder::Bgr),
            "rgb" => Ok(ChannelOrder::Rgb),
            other => Err(anyhow!("unknown channel order '{}'", other)),
        }
    }
}

/// Fixed input shape of the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub layout: InputLayout,
    pub channel_order: ChannelOrder,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
            layout: InputLayout::Nhwc,
            channel_order: ChannelOrder::Bgr,
        }
    }
}

impl InputSpec {
    pub fn shape(&self) -> [usize; 4] {
        let (h, w) = (self.height as usize, self.width as usize);
        match self.layout {
            InputLayout::Nhwc => [1, h, w, 3],
            InputLayout::Nchw => [1, 3, h, w],
        }
    }
}

/// Normalized `f32` input, values in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    pub spec: InputSpec,
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn shape(&self) -> [usize; 4] {
        self.spec.shape()
    }

    /// Mean of each channel, reported in RGB order regardless of layout.
    pub fn mean_rgb(&self) -> [f32; 3] {
        let plane = (self.spec.width * self.spec.height) as usize;
        let mut sums = [0f32; 3];
        for (i, value) in self.data.iter().enumerate() {
            let channel = match self.spec.layout {
                InputLayout::Nhwc => i % 3,
                InputLayout::Nchw => i / plane,
            };
            sums[channel] += value;
        }
        let mut means = sums.map(|sum| sum / plane.max(1) as f32);
        if self.spec.channel_order == ChannelOrder::Bgr {
            means.swap(0, 2);
        }
        means
    }
}

/// Resizes the frame to the model input (bilinear) and scales pixels by 1/255.
pub fn preprocess(frame: &Frame, spec: &InputSpec) -> Result<InputTensor> {
    if spec.width == 0 || spec.height == 0 {
        return Err(anyhow!("model input size must be non-zero"));
    }
    if frame.width() == 0 || frame.height() == 0 {
        return Err(anyhow!("cannot classify an empty frame"));
    }

    let resized;
    let image = if frame.width() == spec.width && frame.height() == spec.height {
        frame.image()
    } else {
        resized = imageops::resize(frame.image(), spec.width, spec.height, FilterType::Triangle);
        &resized
    };

    let (w, h) = (spec.width as usize, spec.height as usize);
    let mut data = vec![0f32; w * h * 3];
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let source = match spec.channel_order {
                ChannelOrder::Rgb => c,
                ChannelOrder::Bgr => 2 - c,
            };
            let idx = match spec.layout {
                InputLayout::Nhwc => (y * w + x) * 3 + c,
                InputLayout::Nchw => c * w * h + y * w + x,
            };
            data[idx] = pixel.0[source] as f32 / 255.0;
        }
    }

    Ok(InputTensor { spec: *spec, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> Frame {
        Frame::new(RgbImage::from_pixel(w, h, Rgb(rgb)), 1)
    }

    #[test]
    fn nhwc_bgr_matches_keras_pipeline() -> Result<()> {
        let spec = InputSpec {
            width: 4,
            height: 4,
            ..InputSpec::default()
        };
        let tensor = preprocess(&solid(4, 4, [255, 0, 51]), &spec)?;
        assert_eq!(tensor.shape(), [1, 4, 4, 3]);
        assert_eq!(tensor.data.len(), 48);
        // Blue first, red last.
        assert_eq!(&tensor.data[..3], &[0.2f32, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn nchw_rgb_is_planar() -> Result<()> {
        let spec = InputSpec {
            width: 2,
            height: 2,
            layout: InputLayout::Nchw,
            channel_order: ChannelOrder::Rgb,
        };
        let tensor = preprocess(&solid(2, 2, [255, 0, 0]), &spec)?;
        assert_eq!(tensor.shape(), [1, 3, 2, 2]);
        assert_eq!(tensor.data, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn mean_rgb_undoes_layout_and_order() -> Result<()> {
        for layout in [InputLayout::Nhwc, InputLayout::Nchw] {
            for channel_order in [ChannelOrder::Bgr, ChannelOrder::Rgb] {
                let spec = InputSpec {
                    width: 3,
                    height: 3,
                    layout,
                    channel_order,
                };
                let tensor = preprocess(&solid(5, 7, [255, 0, 0]), &spec)?;
                assert_eq!(tensor.data.len(), 27);
                let means = tensor.mean_rgb();
                for (got, want) in means.iter().zip([1.0f32, 0.0, 0.0]) {
                    assert!((got - want).abs() < 1e-3, "{:?} {:?}", layout, channel_order);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn parses_layout_names() {
        assert_eq!("NCHW".parse::<InputLayout>().unwrap(), InputLayout::Nchw);
        assert_eq!("rgb".parse::<ChannelOrder>().unwrap(), ChannelOrder::Rgb);
        assert!("hwc".parse::<InputLayout>().is_err());
    }
}
