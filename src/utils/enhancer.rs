// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测前图像增强
/// 亮度曲线 / 对比度拉伸 / 锐化 / 去噪 / 裁剪 / 放大, 全部为确定性变换
use fast_image_resize as fr;
use image::{imageops, RgbImage};
use imageproc::filter::median_filter;

use crate::detection::types::FaceBox;
use crate::error::{AudienceError, Result};

/// 增强参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhanceParams {
    /// 亮度曲线, >1 提亮暗部
    pub gamma: f32,
    /// 对比度拉伸系数, 1.0 不变
    pub contrast: f32,
    /// 反锐化掩模强度, 0 关闭
    pub sharpen: f32,
    /// 3x3 中值滤波
    pub denoise: bool,
    /// 放大倍数, 1.0 不变
    pub upscale: f32,
    /// 只处理该区域
    pub crop: Option<FaceBox>,
}

impl Default for EnhanceParams {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            contrast: 1.0,
            sharpen: 0.0,
            denoise: false,
            upscale: 1.0,
            crop: None,
        }
    }
}

impl EnhanceParams {
    /// 第二轮救援: 强化增强 + 放大
    pub fn rescue(upscale: f32) -> Self {
        Self {
            gamma: 1.5,
            contrast: 1.6,
            sharpen: 0.5,
            denoise: true,
            upscale,
            crop: None,
        }
    }

    /// 第三轮救援: 最大增强 + 2.5倍放大
    pub fn maximal() -> Self {
        Self {
            gamma: 1.8,
            contrast: 2.0,
            sharpen: 0.6,
            denoise: true,
            upscale: 2.5,
            crop: None,
        }
    }
}

/// 亮度曲线查找表
fn gamma_lut(gamma: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let inv = 1.0 / gamma.max(0.01);
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (255.0 * (i as f32 / 255.0).powf(inv)).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// 对比度拉伸查找表 (以中灰为轴)
fn contrast_lut(contrast: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = ((i as f32 - 128.0) * contrast + 128.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn apply_lut(image: &mut RgbImage, lut: &[u8; 256]) {
    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = lut[*c as usize];
        }
    }
}

/// 反锐化掩模: out = in + amount * (in - blur)
fn unsharp(image: &RgbImage, amount: f32) -> RgbImage {
    let blurred = imageops::blur(image, 1.0);
    let mut out = image.clone();
    for (dst, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for (c, s) in dst.0.iter_mut().zip(soft.0.iter()) {
            let v = *c as f32 + amount * (*c as f32 - *s as f32);
            *c = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// 裁剪到区域 (自动夹到图像范围内)
pub fn crop_region(image: &RgbImage, region: &FaceBox) -> Option<RgbImage> {
    let x = region.x.max(0.0).floor() as u32;
    let y = region.y.max(0.0).floor() as u32;
    if x >= image.width() || y >= image.height() {
        return None;
    }
    let w = (region.width.ceil() as u32).min(image.width() - x);
    let h = (region.height.ceil() as u32).min(image.height() - y);
    if w == 0 || h == 0 {
        return None;
    }
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}

/// 放大 (fast_image_resize 双线性卷积)
pub fn upscale(image: &RgbImage, factor: f32) -> Result<RgbImage> {
    let dst_width = ((image.width() as f32 * factor).round() as u32).max(1);
    let dst_height = ((image.height() as f32 * factor).round() as u32).max(1);

    let src_image = fr::images::Image::from_vec_u8(
        image.width(),
        image.height(),
        image.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| AudienceError::Image(format!("源图像创建失败: {}", e)))?;
    let mut dst_image = fr::images::Image::new(dst_width, dst_height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| AudienceError::Image(format!("缩放失败: {}", e)))?;

    RgbImage::from_raw(dst_width, dst_height, dst_image.buffer().to_vec())
        .ok_or_else(|| AudienceError::Image("RGB图像转换失败".to_string()))
}

/// 按参数依次执行: 裁剪 → 去噪 → 亮度 → 对比度 → 锐化 → 放大
pub fn enhance(image: &RgbImage, params: &EnhanceParams) -> Result<RgbImage> {
    let mut out = match &params.crop {
        Some(region) => crop_region(image, region)
            .ok_or_else(|| AudienceError::Image("裁剪区域在图像之外".to_string()))?,
        None => image.clone(),
    };

    if params.denoise {
        out = median_filter(&out, 1, 1);
    }
    if (params.gamma - 1.0).abs() > f32::EPSILON {
        apply_lut(&mut out, &gamma_lut(params.gamma));
    }
    if (params.contrast - 1.0).abs() > f32::EPSILON {
        apply_lut(&mut out, &contrast_lut(params.contrast));
    }
    if params.sharpen > 0.0 {
        out = unsharp(&out, params.sharpen);
    }
    if params.upscale > 1.0 + f32::EPSILON {
        out = upscale(&out, params.upscale)?;
    }
    Ok(out)
}
