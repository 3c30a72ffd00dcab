// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 受众分析配置 - 通过JSON文件调整参数
//! Audience analysis configuration surface

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

use crate::error::{AudienceError, Result};

/// 检测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Fast,
    #[default]
    Accurate,
    Max,
}

/// 检测器档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorTier {
    /// 只跑一个分辨率, 不做救援
    Minimal,
    #[default]
    Single,
    /// 主检测器 + 辅助检测器
    Dual,
}

/// 帧来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// 摄像头 (实时, 低延迟优先)
    #[default]
    Interactive,
    /// 录制视频/屏幕 (允许更多检测轮次)
    Recorded,
}

/// 跟踪器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub hold_frames: u32,          // 最大丢失帧数
    pub min_hits: u32,             // 稳定所需累计命中
    pub max_velocity_px: f32,      // 单帧最大位移(像素)
    pub min_vote_confidence: f32,  // 参与投票的最低置信度
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            hold_frames: 4,
            min_hits: 2,
            max_velocity_px: 180.0,
            min_vote_confidence: 0.5,
        }
    }
}

/// 检测框过滤参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub min_face_px: f32,       // 最小边长(像素)
    pub min_area_percent: f32,  // 最小面积占比(%)
    pub max_area_percent: f32,  // 最大面积占比(%)
    pub min_aspect: f32,        // 高/宽 下限
    pub max_aspect: f32,        // 高/宽 上限
    pub min_edge_density: f32,  // 纹理检测: 边缘像素占比
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_face_px: 20.0,
            min_area_percent: 0.05,
            max_area_percent: 35.0,
            min_aspect: 0.25,
            max_aspect: 4.0,
            min_edge_density: 0.03,
        }
    }
}

/// 受众分析总配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceConfig {
    // === 检测参数 ===
    pub sensitivity: f32,          // 检测灵敏度 [0.15, 0.5]
    pub hard_min_face_score: f32,  // 最低人脸分 [0.10, 0.70]
    pub detector_tier: DetectorTier,
    pub enable_enhanced_rescue: bool,
    pub rescue_upscale: f32,       // 第二轮放大倍数
    pub mode: DetectionMode,

    // === 分类参数 ===
    pub min_demographic_confidence: f32, // [0.55, 0.90]
    pub female_boost_factor: f32,        // [0, 0.30]
    pub enable_hair_heuristics: bool,
    pub require_face_texture: bool,

    // === 采集窗口 ===
    pub capture_start_percent: f32,
    pub capture_end_percent: f32,

    // === 调度 ===
    pub cycle_interval_ms: u64,
    pub cycle_timeout_ms: u64,

    pub tracker: TrackerSettings,
    pub filter: FilterSettings,
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.30,
            hard_min_face_score: 0.25,
            detector_tier: DetectorTier::Single,
            enable_enhanced_rescue: false,
            rescue_upscale: 2.0,
            mode: DetectionMode::Accurate,

            min_demographic_confidence: 0.60,
            female_boost_factor: 0.12,
            enable_hair_heuristics: true,
            require_face_texture: false,

            capture_start_percent: 10.0,
            capture_end_percent: 90.0,

            cycle_interval_ms: 800,
            cycle_timeout_ms: 12_000,

            tracker: TrackerSettings::default(),
            filter: FilterSettings::default(),
        }
    }
}

fn clamp_logged(name: &str, value: f32, min: f32, max: f32) -> f32 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("⚠️  {} = {} 超出范围 [{}, {}], 已调整为 {}", name, value, min, max, clamped);
    }
    clamped
}

impl AudienceConfig {
    /// 从JSON文件加载配置
    pub fn load(path: &str) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| AudienceError::ConfigIo {
            path: path.to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config.sanitized())
    }

    /// 加载配置, 文件不存在时写入默认配置, 解析失败时使用默认值
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!("✅ 配置已从 {} 加载", path);
                config
            }
            Err(AudienceError::ConfigIo { .. }) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {}", e);
                }
                config
            }
            Err(e) => {
                warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                Self::default()
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| AudienceError::ConfigIo {
            path: path.to_string(),
            source,
        })?;
        info!("💾 配置已保存到 {}", path);
        Ok(())
    }

    /// 将所有有范围约束的参数限制到合法区间
    pub fn sanitized(mut self) -> Self {
        self.sensitivity = clamp_logged("sensitivity", self.sensitivity, 0.15, 0.5);
        self.hard_min_face_score =
            clamp_logged("hard_min_face_score", self.hard_min_face_score, 0.10, 0.70);
        self.min_demographic_confidence = clamp_logged(
            "min_demographic_confidence",
            self.min_demographic_confidence,
            0.55,
            0.90,
        );
        self.female_boost_factor =
            clamp_logged("female_boost_factor", self.female_boost_factor, 0.0, 0.30);
        self.capture_start_percent =
            clamp_logged("capture_start_percent", self.capture_start_percent, 0.0, 100.0);
        self.capture_end_percent =
            clamp_logged("capture_end_percent", self.capture_end_percent, 0.0, 100.0);
        if self.capture_end_percent < self.capture_start_percent {
            warn!(
                "⚠️  采集窗口结束 {}% 早于开始 {}%, 已交换",
                self.capture_end_percent, self.capture_start_percent
            );
            std::mem::swap(&mut self.capture_start_percent, &mut self.capture_end_percent);
        }
        self.rescue_upscale = clamp_logged("rescue_upscale", self.rescue_upscale, 1.0, 4.0);
        self.tracker.hold_frames = self.tracker.hold_frames.max(1);
        self.tracker.min_hits = self.tracker.min_hits.max(1);
        self
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前受众分析配置:");
        info!(
            "  模式: {:?} | 检测器: {:?} | 增强救援: {}",
            self.mode, self.detector_tier, self.enable_enhanced_rescue
        );
        info!(
            "  灵敏度: {:.2} | 最低人脸分: {:.2} | 最低属性置信度: {:.2}",
            self.sensitivity, self.hard_min_face_score, self.min_demographic_confidence
        );
        info!(
            "  女性补偿: {:.2} | 发型启发: {} | 纹理校验: {}",
            self.female_boost_factor, self.enable_hair_heuristics, self.require_face_texture
        );
        info!(
            "  采集窗口: {:.0}% - {:.0}% | 最大丢失帧: {}",
            self.capture_start_percent, self.capture_end_percent, self.tracker.hold_frames
        );
    }
}
