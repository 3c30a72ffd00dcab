// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// 在检测线程内完成单帧分析, 在循环线程内完成跨帧跟踪
/// - Orchestrator: 多轮检测 (分辨率阶梯 + 救援轮次)
/// - Merger:       跨轮次去重
/// - Filter:       分数/尺寸/比例/边界/纹理校验
/// - Bias:         性别偏差校正
/// - Tracker:      跨帧身份与投票稳定
pub mod bias;
pub mod detector;
pub mod filter;
pub mod gateway;
pub mod merger;
pub mod orchestrator;
pub mod tracker;
pub mod types;
pub mod votes;

pub use detector::{DetectionOutcome, FaceDetector};
pub use gateway::{DetectParams, FaceAttributes, ModelGateway, RawDetection, ScriptedGateway};
pub use tracker::{FaceTracker, Track, TrackState, Tracker};
pub use types::{AgeGroup, ClassifiedDetection, FaceBox, Frame, FrameSize, Gender, RawCandidate};
