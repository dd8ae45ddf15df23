//! # PNG 编码与归一化模块
//!
//! ## 设计思路
//!
//! 所有解码路径汇聚到 `PixelBuffer` 之后，这里负责最后一步：序列化为
//! PNG 字节交给下游（缓存协作者 / AI 内容处理器）。编码前可以挂一个
//! 可选的归一化器（降采样、标准化），它的失败不致命 —— 记警告日志后
//! 用未归一化的缓冲继续编码。
//!
//! ## 实现思路
//!
//! - PNG 编码走 `image` crate 的 `PngEncoder`，对合法 `PixelBuffer`
//!   总是成功。
//! - 内置的 `DownscaleNormalizer` 用 `fast_image_resize` 做卷积缩放，
//!   失败时回退到 `image` 自带的 `resize_exact`。

use fast_image_resize as fr;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageBuffer, ImageEncoder as _, Rgba};

use crate::error::CaptureError;
use crate::unpack::PixelBuffer;

/// 编码前的可选归一化钩子。
///
/// 失败用 `String` 描述原因；调用方保证失败只降级、不中断。
pub trait Normalizer {
    fn normalize(&self, image: &PixelBuffer) -> Result<PixelBuffer, String>;
}

/// 将规范 RGBA 缓冲序列化为 PNG 字节。
pub fn encode_png(image: &PixelBuffer) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new(&mut buf);
    encoder
        .write_image(
            &image.rgba,
            image.width,
            image.height,
            image::ColorType::Rgba8.into(),
        )
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    log::debug!(
        "🖼️ PNG 编码完成 - {}x{} -> {} 字节",
        image.width,
        image.height,
        buf.len()
    );
    Ok(buf)
}

/// 先归一化（若配置了且成功）再编码。
///
/// 归一化失败不中断：记警告日志，按原始缓冲编码。
pub fn encode_png_normalized(
    image: PixelBuffer,
    normalizer: Option<&dyn Normalizer>,
) -> Result<Vec<u8>, CaptureError> {
    let Some(normalizer) = normalizer else {
        return encode_png(&image);
    };

    match normalizer.normalize(&image) {
        Ok(normalized) => encode_png(&normalized),
        Err(reason) => {
            log::warn!("⚠️ 归一化失败，按原始尺寸编码：{}", reason);
            encode_png(&image)
        }
    }
}

// ============================================================================
// 内置降采样归一化器
// ============================================================================

/// 按"单边上限 + 像素总量上限"降采样的归一化器。
#[derive(Debug, Clone)]
pub struct DownscaleNormalizer {
    /// 宽/高单边最大值。
    pub max_dimension: u32,
    /// 目标像素上限（`width * height`）。
    pub target_pixels: u64,
}

impl Default for DownscaleNormalizer {
    fn default() -> Self {
        Self {
            max_dimension: 2560,
            target_pixels: 5_000_000,
        }
    }
}

impl Normalizer for DownscaleNormalizer {
    fn normalize(&self, image: &PixelBuffer) -> Result<PixelBuffer, String> {
        let source_pixels = u64::from(image.width) * u64::from(image.height);
        let over_dimension =
            image.width > self.max_dimension || image.height > self.max_dimension;
        let over_pixels = source_pixels > self.target_pixels;

        if !over_dimension && !over_pixels {
            return Ok(image.clone());
        }

        let dimension_scale = (self.max_dimension as f64 / image.width as f64)
            .min(self.max_dimension as f64 / image.height as f64);
        let pixel_scale = (self.target_pixels as f64 / source_pixels as f64).sqrt();
        let scale = dimension_scale.min(pixel_scale).min(1.0);
        if scale <= 0.0 {
            return Err("缩放比例计算异常".to_string());
        }

        let target_width = ((image.width as f64 * scale).floor() as u32).max(1);
        let target_height = ((image.height as f64 * scale).floor() as u32).max(1);

        log::info!(
            "🧩 归一化降采样：{}x{} -> {}x{}",
            image.width,
            image.height,
            target_width,
            target_height
        );

        match resize_with_fast_image_resize(image, target_width, target_height) {
            Ok(resized) => Ok(resized),
            Err(err) => {
                log::warn!("⚠️ fast_image_resize 失败，回退 image::resize_exact：{}", err);
                resize_with_image_crate(image, target_width, target_height)
            }
        }
    }
}

fn resize_with_fast_image_resize(
    image: &PixelBuffer,
    target_width: u32,
    target_height: u32,
) -> Result<PixelBuffer, String> {
    let src = fr::images::Image::from_vec_u8(
        image.width,
        image.height,
        image.rgba.clone(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| format!("构建源图像缓冲失败：{}", e))?;

    let mut dst = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    resizer
        .resize(&src, &mut dst, Some(&options))
        .map_err(|e| format!("fast_image_resize 执行失败：{}", e))?;

    PixelBuffer::new(target_width, target_height, dst.into_vec())
        .map_err(|e| format!("降采样输出长度异常：{}", e))
}

fn resize_with_image_crate(
    image: &PixelBuffer,
    target_width: u32,
    target_height: u32,
) -> Result<PixelBuffer, String> {
    let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(
        image.width,
        image.height,
        image.rgba.clone(),
    )
    .ok_or_else(|| "源缓冲长度异常".to_string())?;

    let resized = DynamicImage::ImageRgba8(rgba)
        .resize_exact(
            target_width,
            target_height,
            image::imageops::FilterType::Triangle,
        )
        .to_rgba8();

    PixelBuffer::new(target_width, target_height, resized.into_raw())
        .map_err(|e| format!("回退缩放输出长度异常：{}", e))
}
