// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 模型网关 (Model Gateway)
//! 人脸检测 + 属性分类的黑盒接口, 以及用于回放/测试的脚本实现
//!
//! 所有检测器输出在这里被规范成 `RawDetection`, 下游代码不再区分检测器来源

use image::RgbImage;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::types::{DetectorSource, FaceBox, Gender, RawCandidate};
use crate::error::{AudienceError, Result};

/// 单次检测调用参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub input_size: u32,
    pub score_threshold: f32,
    pub variant: DetectorSource,
}

/// 检测器原始输出 (按检测器打标签)
#[derive(Debug, Clone, PartialEq)]
pub enum RawDetection {
    Tiny { face: FaceBox, score: f32 },
    Secondary { face: FaceBox, score: f32 },
}

impl RawDetection {
    pub fn new(variant: DetectorSource, face: FaceBox, score: f32) -> Self {
        match variant {
            DetectorSource::Tiny => RawDetection::Tiny { face, score },
            DetectorSource::Secondary => RawDetection::Secondary { face, score },
        }
    }

    /// 规范化为 RawCandidate, `scale` 用于把放大帧上的坐标还原到原始帧
    pub fn into_candidate(self, pass_id: u8, scale: f32) -> RawCandidate {
        let (face, score, source) = match self {
            RawDetection::Tiny { face, score } => (face, score, DetectorSource::Tiny),
            RawDetection::Secondary { face, score } => (face, score, DetectorSource::Secondary),
        };
        let face = if scale > 0.0 && scale != 1.0 {
            face.scaled(1.0 / scale)
        } else {
            face
        };
        RawCandidate {
            face,
            score: score.clamp(0.0, 1.0),
            pass_id,
            source,
        }
    }
}

/// 人脸属性估计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceAttributes {
    pub age: f32,
    pub gender: Gender,
    /// `gender` 标签的概率
    pub gender_probability: f32,
}

/// 模型网关接口
///
/// 可能很慢, 也可能失败; 调用方负责超时与降级
pub trait ModelGateway: Send + Sync {
    /// 在整帧上检测人脸
    fn detect(&self, frame: &RgbImage, params: &DetectParams) -> Result<Vec<RawDetection>>;

    /// 对裁剪后的人脸估计年龄/性别
    fn classify(&self, face: &RgbImage) -> Result<FaceAttributes>;

    fn name(&self) -> &str {
        "gateway"
    }
}

// ========== 脚本网关 ==========

fn default_scale() -> f32 {
    1.0
}

/// 脚本中的一张人脸
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedFace {
    pub face: FaceBox,
    pub score: f32,
    pub age: f32,
    pub gender: Gender,
    pub gender_probability: f32,
    /// 仅在放大倍数 >= min_scale 的帧上可见 (模拟只能被救援轮次找到的小脸)
    #[serde(default = "default_scale")]
    pub min_scale: f32,
    /// 仅由指定检测器返回, None 表示所有检测器
    #[serde(default)]
    pub detector: Option<DetectorSource>,
}

impl ScriptedFace {
    pub fn new(face: FaceBox, score: f32, age: f32, gender: Gender, gender_probability: f32) -> Self {
        Self {
            face,
            score,
            age,
            gender,
            gender_probability,
            min_scale: 1.0,
            detector: None,
        }
    }
}

/// 脚本中的一个检测周期
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptedCycle {
    #[serde(default)]
    pub faces: Vec<ScriptedFace>,
    /// 所有检测调用失败
    #[serde(default)]
    pub fail: bool,
    /// 这些输入尺寸的调用失败
    #[serde(default)]
    pub fail_sizes: Vec<u32>,
    /// 每次检测调用的人为延迟
    #[serde(default)]
    pub delay_ms: u64,
}

/// 按周期回放预设结果的网关
///
/// 坐标以 `reference_width` 宽的原始帧为准, 遇到放大帧时按比例缩放
pub struct ScriptedGateway {
    cycles: Vec<ScriptedCycle>,
    cursor: AtomicUsize,
    reference_width: u32,
}

impl ScriptedGateway {
    pub fn new(cycles: Vec<ScriptedCycle>, reference_width: u32) -> Self {
        Self {
            cycles,
            cursor: AtomicUsize::new(0),
            reference_width: reference_width.max(1),
        }
    }

    /// 切换到下一个周期的脚本
    pub fn advance(&self) {
        self.cursor.fetch_add(1, Ordering::SeqCst);
    }

    pub fn cycle_index(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    fn current(&self) -> Option<&ScriptedCycle> {
        self.cycles.get(self.cycle_index())
    }
}

impl ModelGateway for ScriptedGateway {
    fn detect(&self, frame: &RgbImage, params: &DetectParams) -> Result<Vec<RawDetection>> {
        let Some(cycle) = self.current() else {
            return Ok(Vec::new());
        };
        if cycle.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(cycle.delay_ms));
        }
        if cycle.fail || cycle.fail_sizes.contains(&params.input_size) {
            return Err(AudienceError::Gateway(format!(
                "scripted failure at input {}",
                params.input_size
            )));
        }

        let scale = frame.width() as f32 / self.reference_width as f32;
        let detections = cycle
            .faces
            .iter()
            .filter(|f| f.score >= params.score_threshold)
            .filter(|f| scale + 1e-3 >= f.min_scale)
            .filter(|f| f.detector.map_or(true, |d| d == params.variant))
            .map(|f| RawDetection::new(params.variant, f.face.scaled(scale), f.score))
            .collect();
        Ok(detections)
    }

    fn classify(&self, face: &RgbImage) -> Result<FaceAttributes> {
        let cycle = self
            .current()
            .ok_or_else(|| AudienceError::Gateway("script exhausted".to_string()))?;
        let (cw, ch) = (face.width() as f32, face.height() as f32);
        // 按尺寸最接近的脚本人脸返回属性
        cycle
            .faces
            .iter()
            .min_by(|a, b| {
                let da = (a.face.width - cw).abs() + (a.face.height - ch).abs();
                let db = (b.face.width - cw).abs() + (b.face.height - ch).abs();
                da.total_cmp(&db)
            })
            .map(|f| FaceAttributes {
                age: f.age,
                gender: f.gender,
                gender_probability: f.gender_probability,
            })
            .ok_or_else(|| AudienceError::Gateway("no scripted face to classify".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
