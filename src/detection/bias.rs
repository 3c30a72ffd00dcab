// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 性别分类偏差校正
//! 上游分类器在不确定时偏向男性, 这里对中间置信度区间做补偿,
//! 补偿强度参考发型区域暗像素比例和脸型比例 (仅作辅助信号)

use image::RgbImage;

use super::types::{FaceBox, Gender};

/// 只在该置信度区间内校正
pub const CORRECTION_BAND: (f32, f32) = (0.45, 0.70);
/// 校正后的概率上限
const MAX_ADJUSTED: f32 = 0.95;
/// 暗像素亮度阈值
const DARK_LUMA: f32 = 70.0;
/// 采样步长(像素)
const SAMPLE_STEP: usize = 2;

/// 对不确定的性别分类做补偿, 返回 (性别, 置信度)
pub fn correct(gender: Gender, confidence: f32, boost_factor: f32, hair_score: f32) -> (Gender, f32) {
    if confidence < CORRECTION_BAND.0 || confidence > CORRECTION_BAND.1 {
        return (gender, confidence);
    }

    let female_probability = match gender {
        Gender::Female => confidence,
        Gender::Male => 1.0 - confidence,
    };
    let adjusted =
        (female_probability + boost_factor * (0.3 + 0.7 * hair_score.clamp(0.0, 1.0))).min(MAX_ADJUSTED);

    if adjusted >= 0.5 {
        (Gender::Female, adjusted)
    } else {
        (Gender::Male, 1.0 - adjusted)
    }
}

fn luma(p: &image::Rgb<u8>) -> f32 {
    0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32
}

/// 区域内暗像素比例, 区域为空时返回 None
fn dark_ratio(image: &RgbImage, x0: f32, y0: f32, x1: f32, y1: f32) -> Option<f32> {
    let x0 = x0.max(0.0) as u32;
    let y0 = y0.max(0.0) as u32;
    let x1 = (x1.max(0.0) as u32).min(image.width());
    let y1 = (y1.max(0.0) as u32).min(image.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let mut total = 0u32;
    let mut dark = 0u32;
    for y in (y0..y1).step_by(SAMPLE_STEP) {
        for x in (x0..x1).step_by(SAMPLE_STEP) {
            total += 1;
            if luma(image.get_pixel(x, y)) < DARK_LUMA {
                dark += 1;
            }
        }
    }
    if total == 0 {
        return None;
    }
    Some(dark as f32 / total as f32)
}

/// 发型区域暗度: 头顶上方占 40%, 两侧占 60%
pub fn hair_darkness(image: &RgbImage, face: &FaceBox) -> f32 {
    let above = dark_ratio(
        image,
        face.x,
        face.y - face.height * 0.3,
        face.xmax(),
        face.y,
    );

    let side_w = face.width * 0.25;
    let left = dark_ratio(image, face.x - side_w, face.y, face.x, face.ymax());
    let right = dark_ratio(image, face.xmax(), face.y, face.xmax() + side_w, face.ymax());
    let sides = match (left, right) {
        (Some(l), Some(r)) => Some((l + r) / 2.0),
        (l, r) => l.or(r),
    };

    0.4 * above.unwrap_or(0.0) + 0.6 * sides.unwrap_or(0.0)
}

/// 脸型: 高宽比分段映射到 0-1
pub fn face_shape_score(face: &FaceBox) -> f32 {
    let ratio = face.aspect_ratio();
    if ratio < 1.0 {
        0.0
    } else if ratio < 1.2 {
        (ratio - 1.0) / 0.2 * 0.5
    } else if ratio < 1.4 {
        0.5 + (ratio - 1.2) / 0.2 * 0.5
    } else {
        1.0
    }
}

/// 综合发型分
pub fn hair_score(image: &RgbImage, face: &FaceBox) -> f32 {
    (0.7 * hair_darkness(image, face) + 0.3 * face_shape_score(face)).clamp(0.0, 1.0)
}
