// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 候选框过滤
//! Rejects candidates by score, size, aspect ratio, frame bounds and texture

use image::{imageops, GrayImage, RgbImage};
use imageproc::gradients::sobel_gradients;

use super::types::{FaceBox, FrameSize, RawCandidate};
use crate::config::FilterSettings;

/// 任何配置都不能低于的分数下限
pub const HARD_SCORE_FLOOR: f32 = 0.10;

/// 被判定为边缘的 Sobel 幅值
const EDGE_MAGNITUDE: u16 = 80;

/// 拒绝原因 (用于调试统计)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    LowScore,
    TooSmall,
    AreaOutOfRange,
    AspectRatio,
    OutOfBounds,
    NoTexture,
}

/// 检测框过滤器
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    pub min_score: f32,
    pub settings: FilterSettings,
    pub require_texture: bool,
}

impl DetectionFilter {
    pub fn new(configured_min_score: f32, settings: FilterSettings, require_texture: bool) -> Self {
        Self {
            min_score: configured_min_score.max(HARD_SCORE_FLOOR),
            settings,
            require_texture,
        }
    }

    /// 几何 + 分数检查 (不需要像素)
    pub fn check(&self, candidate: &RawCandidate, frame: FrameSize) -> Result<(), RejectReason> {
        let face = &candidate.face;
        if candidate.score < self.min_score {
            return Err(RejectReason::LowScore);
        }
        if !face.is_inside(frame) {
            return Err(RejectReason::OutOfBounds);
        }
        if face.width < self.settings.min_face_px || face.height < self.settings.min_face_px {
            return Err(RejectReason::TooSmall);
        }
        let area_percent = face.area() / frame.area() * 100.0;
        if area_percent < self.settings.min_area_percent
            || area_percent > self.settings.max_area_percent
        {
            return Err(RejectReason::AreaOutOfRange);
        }
        let aspect = face.aspect_ratio();
        if aspect < self.settings.min_aspect || aspect > self.settings.max_aspect {
            return Err(RejectReason::AspectRatio);
        }
        Ok(())
    }

    /// 完整检查, 启用纹理校验时对框内做边缘密度采样
    pub fn accepts(&self, candidate: &RawCandidate, image: &RgbImage) -> Result<(), RejectReason> {
        let frame = FrameSize {
            width: image.width(),
            height: image.height(),
        };
        self.check(candidate, frame)?;
        if self.require_texture && edge_density(image, &candidate.face) <= self.settings.min_edge_density
        {
            return Err(RejectReason::NoTexture);
        }
        Ok(())
    }
}

/// 框内边缘像素占比 (0-1), 纯色墙面/背景接近 0
pub fn edge_density(image: &RgbImage, face: &FaceBox) -> f32 {
    let x = face.x.max(0.0) as u32;
    let y = face.y.max(0.0) as u32;
    let w = (face.width as u32).min(image.width().saturating_sub(x));
    let h = (face.height as u32).min(image.height().saturating_sub(y));
    if w < 3 || h < 3 {
        return 0.0;
    }
    let region = imageops::crop_imm(image, x, y, w, h).to_image();
    let gray: GrayImage = imageops::grayscale(&region);
    let gradients = sobel_gradients(&gray);
    let edges = gradients.pixels().filter(|p| p.0[0] > EDGE_MAGNITUDE).count();
    edges as f32 / (w * h) as f32
}

/// 第三轮救援的严格过滤: 更高分数下限, 更窄的尺寸/比例范围
pub fn strict_rescue_filter(candidate: &RawCandidate, frame: FrameSize) -> bool {
    const MIN_SCORE: f32 = 0.20;
    const MIN_PX: f32 = 24.0;
    let face = &candidate.face;
    let aspect = face.aspect_ratio();
    candidate.score >= MIN_SCORE
        && face.is_inside(frame)
        && face.width >= MIN_PX
        && face.height >= MIN_PX
        && (0.6..=2.0).contains(&aspect)
        && face.area() / frame.area() * 100.0 <= 20.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::DetectorSource;
    use image::Rgb;

    fn candidate(face: FaceBox, score: f32) -> RawCandidate {
        RawCandidate {
            face,
            score,
            pass_id: 1,
            source: DetectorSource::Tiny,
        }
    }

    fn frame() -> FrameSize {
        FrameSize {
            width: 640,
            height: 480,
        }
    }

    fn filter() -> DetectionFilter {
        DetectionFilter::new(0.25, FilterSettings::default(), false)
    }

    #[test]
    fn test_accepts_plain_face() {
        let c = candidate(FaceBox::new(100.0, 100.0, 60.0, 75.0), 0.6);
        assert_eq!(filter().check(&c, frame()), Ok(()));
    }

    #[test]
    fn test_rejections() {
        let f = filter();
        let low = candidate(FaceBox::new(100.0, 100.0, 60.0, 75.0), 0.2);
        assert_eq!(f.check(&low, frame()), Err(RejectReason::LowScore));

        let tiny = candidate(FaceBox::new(100.0, 100.0, 12.0, 14.0), 0.6);
        assert_eq!(f.check(&tiny, frame()), Err(RejectReason::TooSmall));

        // 超过画面 35% 视为背景
        let huge = candidate(FaceBox::new(0.0, 0.0, 400.0, 400.0), 0.9);
        assert_eq!(f.check(&huge, frame()), Err(RejectReason::AreaOutOfRange));

        let flat = candidate(FaceBox::new(100.0, 100.0, 200.0, 40.0), 0.9);
        assert_eq!(f.check(&flat, frame()), Err(RejectReason::AspectRatio));

        let outside = candidate(FaceBox::new(600.0, 100.0, 60.0, 75.0), 0.9);
        assert_eq!(f.check(&outside, frame()), Err(RejectReason::OutOfBounds));

        let negative = candidate(FaceBox::new(-5.0, 100.0, 60.0, 75.0), 0.9);
        assert_eq!(f.check(&negative, frame()), Err(RejectReason::OutOfBounds));
    }

    #[test]
    fn test_hard_floor_applies() {
        let f = DetectionFilter::new(0.01, FilterSettings::default(), false);
        assert_eq!(f.min_score, HARD_SCORE_FLOOR);
    }

    #[test]
    fn test_texture_rejects_uniform_region() {
        let flat = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let mut textured = flat.clone();
        for (x, y, p) in textured.enumerate_pixels_mut() {
            if (x / 4 + y / 4) % 2 == 0 {
                *p = Rgb([20, 20, 20]);
            } else {
                *p = Rgb([230, 230, 230]);
            }
        }

        let f = DetectionFilter::new(0.25, FilterSettings::default(), true);
        let c = candidate(FaceBox::new(100.0, 100.0, 60.0, 75.0), 0.6);
        assert_eq!(f.accepts(&c, &flat), Err(RejectReason::NoTexture));
        assert_eq!(f.accepts(&c, &textured), Ok(()));
    }

    #[test]
    fn test_strict_rescue_filter() {
        let ok = candidate(FaceBox::new(100.0, 100.0, 40.0, 50.0), 0.25);
        assert!(strict_rescue_filter(&ok, frame()));
        let weak = candidate(FaceBox::new(100.0, 100.0, 40.0, 50.0), 0.15);
        assert!(!strict_rescue_filter(&weak, frame()));
        let skewed = candidate(FaceBox::new(100.0, 100.0, 40.0, 120.0), 0.5);
        assert!(!strict_rescue_filter(&skewed, frame()));
    }
}
