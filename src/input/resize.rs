//! 帧缩放到参考分辨率
//!
//! 门线坐标与跟踪结果都在参考分辨率下表示, 尺寸不一致的帧先统一缩放。

use fast_image_resize as fr;
use image::imageops::FilterType;
use image::RgbaImage;
use tracing::warn;

pub struct FrameResizer {
    width: u32,
    height: u32,
    resizer: fr::Resizer,
}

impl FrameResizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            resizer: fr::Resizer::new(),
        }
    }

    /// 尺寸一致时原样返回
    pub fn fit(&mut self, frame: RgbaImage) -> RgbaImage {
        if frame.dimensions() == (self.width, self.height) {
            return frame;
        }
        match self.fast_resize(&frame) {
            Ok(resized) => resized,
            Err(e) => {
                warn!(error = %e, "fast_image_resize 失败, 使用 image 缩放");
                image::imageops::resize(&frame, self.width, self.height, FilterType::Triangle)
            }
        }
    }

    fn fast_resize(&mut self, frame: &RgbaImage) -> Result<RgbaImage, String> {
        let (w, h) = frame.dimensions();
        let src = fr::images::Image::from_vec_u8(w, h, frame.as_raw().clone(), fr::PixelType::U8x4)
            .map_err(|e| e.to_string())?;
        let mut dst = fr::images::Image::new(self.width, self.height, fr::PixelType::U8x4);

        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Nearest),
            )
            .map_err(|e| e.to_string())?;

        RgbaImage::from_raw(self.width, self.height, dst.into_vec())
            .ok_or_else(|| "缓冲区尺寸不匹配".to_string())
    }
}
