// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 受众检测系统数据结构定义
/// Data structures for the audience detection system
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

// ========== 枚举类型 ==========

/// 性别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn opposite(self) -> Self {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }
}

/// 年龄段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Kid,
    Young,
    Adult,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 3] = [AgeGroup::Kid, AgeGroup::Young, AgeGroup::Adult];

    /// 年龄估计值 → 年龄段
    pub fn from_age(age: f32) -> Self {
        if age < 13.0 {
            AgeGroup::Kid
        } else if age < 30.0 {
            AgeGroup::Young
        } else {
            AgeGroup::Adult
        }
    }

    pub fn index(self) -> usize {
        match self {
            AgeGroup::Kid => 0,
            AgeGroup::Young => 1,
            AgeGroup::Adult => 2,
        }
    }
}

/// 产生候选框的检测器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorSource {
    /// 主检测器 (轻量)
    Tiny,
    /// 辅助检测器 (dual 档位)
    Secondary,
}

// ========== 数据结构 ==========

/// 帧尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn area(&self) -> f32 {
        self.width as f32 * self.height as f32
    }
}

/// 一帧图像
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize {
            width: self.image.width(),
            height: self.image.height(),
        }
    }
}

/// 人脸框 (原始帧像素坐标)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// 高/宽
    pub fn aspect_ratio(&self) -> f32 {
        if self.width <= 0.0 {
            return 0.0;
        }
        self.height / self.width
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    pub fn is_inside(&self, frame: FrameSize) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.xmax() <= frame.width as f32
            && self.ymax() <= frame.height as f32
    }

    pub fn intersection_area(&self, another: &FaceBox) -> f32 {
        let l = self.x.max(another.x);
        let r = self.xmax().min(another.xmax());
        let t = self.y.max(another.y);
        let b = self.ymax().min(another.ymax());
        if r <= l || b <= t {
            return 0.0;
        }
        (r - l) * (b - t)
    }

    /// 交并比 (Intersection over Union)
    pub fn iou(&self, another: &FaceBox) -> f32 {
        let intersection = self.intersection_area(another);
        let union = self.area() + another.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        (intersection / union).clamp(0.0, 1.0)
    }

    /// 包含度: 交集 / 自身面积
    pub fn containment_in(&self, another: &FaceBox) -> f32 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        (self.intersection_area(another) / area).clamp(0.0, 1.0)
    }

    pub fn center_distance(&self, another: &FaceBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = another.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

/// 原始候选框 (单次网关调用产生, 合并后丢弃)
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
    pub face: FaceBox,
    pub score: f32,
    pub pass_id: u8,
    pub source: DetectorSource,
}

/// 分类后的检测结果 (过滤 + 偏差校正之后, 交给跟踪器)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedDetection {
    pub face: FaceBox,
    pub gender: Gender,
    pub age_group: AgeGroup,
    /// 校正后的性别置信度
    pub gender_confidence: f32,
    /// 模型原始性别置信度 (校正前)
    pub raw_gender_confidence: f32,
    pub detection_score: f32,
}
