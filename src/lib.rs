// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 受众分析配置参数
pub mod detection; // 检测 + 跟踪系统
pub mod error; // 错误类型
pub mod pipeline; // 检测循环与快照
pub mod scoring; // 广告排序
pub mod session; // 采集会话聚合
pub mod utils; // 图像预处理

pub use crate::config::{AudienceConfig, DetectionMode, DetectorTier, SourceKind};
pub use crate::error::{AudienceError, Result};
pub use crate::pipeline::{CancelToken, CycleSnapshot, DetectionLoop, FrameSource, TickOutcome};
pub use crate::scoring::{AdQueue, Demographics, ScoredSpot, Spot};
pub use crate::session::{CaptureSession, CaptureWindow, SessionSummary};

/// 本地时间字符串 (北京时间), 用于归档文件命名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = match chrono::FixedOffset::east_opt(8 * 60 * 60) {
        Some(offset) => chrono::Utc::now().with_timezone(&offset).naive_local(),
        None => chrono::Utc::now().naive_utc(),
    };
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
