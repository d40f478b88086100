use std::fmt;
use std::sync::Arc;

use fast_image_resize::{FilterType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GenericImageView};
use ndarray::{Array, Dim, Ix};
use tracing::debug;

use crate::error::{IdentifyError, RequestConstructionError};
use crate::preprocess::PixelBuffer;
use crate::task::{Candidate, ClassifyTask, ModelDescription};

/// A reusable classification request bound to one model.
///
/// Input images are center cropped to the model's aspect ratio and then
/// scaled to its input size.
pub struct InferenceRequest {
    task: Arc<dyn ClassifyTask>,
    description: ModelDescription,
    resize_options: ResizeOptions,
}

impl fmt::Debug for InferenceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceRequest")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl InferenceRequest {
    pub fn new(task: Arc<dyn ClassifyTask>) -> Result<Self, RequestConstructionError> {
        let description = task.describe()?;
        if description.input_width == 0 || description.input_height == 0 {
            return Err(RequestConstructionError::InvalidInputShape(vec![
                1,
                3,
                description.input_height.into(),
                description.input_width.into(),
            ]));
        }
        if description.std.iter().any(|std| *std == 0.) {
            return Err(RequestConstructionError::Backend(
                "channel std must not be zero".to_owned(),
            ));
        }

        Ok(Self {
            task,
            description,
            resize_options: ResizeOptions {
                algorithm: ResizeAlg::Convolution(FilterType::CatmullRom),
                mul_div_alpha: false,
                ..Default::default()
            },
        })
    }

    pub fn description(&self) -> &ModelDescription {
        &self.description
    }

    pub fn perform(&self, pixels: &PixelBuffer) -> Result<Vec<Candidate>, IdentifyError> {
        let input = self.pre_processing(pixels)?;
        debug!(shape = ?input.shape(), "Running classification");
        self.task
            .classify(input.view())
            .map_err(|err| IdentifyError::Inference(format!("{err:#}")))
    }

    fn pre_processing(
        &self,
        pixels: &PixelBuffer,
    ) -> Result<Array<f32, Dim<[Ix; 4]>>, IdentifyError> {
        let ModelDescription {
            input_width,
            input_height,
            mean,
            std,
        } = self.description;

        let (left, top, width, height) =
            center_crop(pixels.width(), pixels.height(), input_width, input_height);
        let options = self.resize_options.clone().crop(left, top, width, height);

        let mut img = DynamicImage::new_rgb8(input_width, input_height);
        Resizer::new()
            .resize(pixels.as_image(), &mut img, &options)
            .map_err(|err| IdentifyError::Inference(err.to_string()))?;

        let mut input = Array::zeros((1, 3, input_height as usize, input_width as usize));
        for pixel in img.pixels() {
            let x = pixel.0 as _;
            let y = pixel.1 as _;
            let [r, g, b, _] = pixel.2 .0;
            input[[0, 0, y, x]] = ((r as f32) / 255. - mean[0]) / std[0];
            input[[0, 1, y, x]] = ((g as f32) / 255. - mean[1]) / std[1];
            input[[0, 2, y, x]] = ((b as f32) / 255. - mean[2]) / std[2];
        }
        Ok(input)
    }
}

/// 计算居中裁剪区域 (left, top, width, height)，使其宽高比与目标一致
pub fn center_crop(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (f64, f64, f64, f64) {
    let (src_w, src_h) = (src_w as f64, src_h as f64);
    let dst_ratio = dst_w as f64 / dst_h as f64;
    if src_w / src_h > dst_ratio {
        // 原图更宽，裁掉左右两侧
        let width = src_h * dst_ratio;
        ((src_w - width) / 2., 0., width, src_h)
    } else {
        let height = src_w / dst_ratio;
        (0., (src_h - height) / 2., src_w, height)
    }
}
