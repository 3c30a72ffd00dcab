// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测流水线 (Detection Pipeline)
///
/// 单一检测循环, 由外部调度器按固定节拍驱动:
/// - FrameSource:   帧来源 (按需提供当前帧)
/// - CycleSlot:     单槽周期 (忙时跳过, 超时放弃)
/// - DetectionLoop: 检测 → 跟踪 → 会话聚合, 对外只暴露不可变快照
pub mod cycle;
pub mod detector;
pub mod source;

pub use cycle::{CancelToken, CycleSlot, TickOutcome};
pub use detector::DetectionLoop;
pub use source::{FrameSource, StaticFrameSource};

use serde::Serialize;

use crate::detection::types::{AgeGroup, FaceBox, Gender};
use crate::scoring::Demographics;

// ========== 快照类型定义 ==========

/// 稳定的人脸 (检测循环 → UI / 排序)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedFace {
    pub track_id: u32,
    pub face: FaceBox,
    pub gender: Gender,
    pub age_group: AgeGroup,
    pub confidence: f32,
    pub is_user_corrected: bool,
}

/// 周期统计
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CycleStats {
    pub cycle: u64,
    pub fps: f64,
    pub latency_ms: f64,
    pub raw_count: usize,
    pub filtered_count: usize,
    pub tracked_count: usize,
    pub pass_used: u8,
    pub timed_out: bool,
}

/// 周期边界处生成的只读快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CycleSnapshot {
    pub faces: Vec<TrackedFace>,
    pub stats: CycleStats,
    /// 本周期可见的受众构成
    pub demographics: Demographics,
}
