// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 多轮检测调度 (Multi-Pass Detection Orchestrator)
//!
//! 1. 第一轮: 多分辨率并行检测, 阈值略低于灵敏度
//! 2. 第二轮: 录制源且结果偏少时, 增强 + 放大后再检测 (阈值更严格)
//! 3. 第三轮: 仍然偏少且启用增强救援时, 最大增强 + 极低阈值, 随后严格自过滤
//!
//! 每一轮结果都先并入已有集合再决定是否进入下一轮

use image::RgbImage;
use std::time::Instant;
use tracing::{debug, warn};

use super::filter::strict_rescue_filter;
use super::gateway::{DetectParams, ModelGateway};
use super::merger::{merge, merge_into, DEFAULT_CONTAINMENT_THRESHOLD, DEFAULT_IOU_THRESHOLD};
use super::types::{DetectorSource, FrameSize, RawCandidate};
use crate::config::{AudienceConfig, DetectionMode, DetectorTier, SourceKind};
use crate::pipeline::CancelToken;
use crate::utils::enhancer::{enhance, EnhanceParams};

/// 第二轮触发: 候选数少于该值
const PASS2_MIN_CANDIDATES: usize = 3;
/// 第三轮触发: 候选数少于该值
const PASS3_MIN_CANDIDATES: usize = 5;
/// 第三轮原始阈值
const PASS3_RAW_THRESHOLD: f32 = 0.08;

/// 每轮调试计数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassCounters {
    /// 所有轮次的原始候选数
    pub raw_count: usize,
    /// 每轮原始候选数
    pub per_pass: [usize; 3],
    /// 每轮新增的人脸数
    pub added_per_pass: [usize; 3],
    /// 最后执行的轮次 (1-3)
    pub pass_used: u8,
    /// 失败/崩溃的网关调用数
    pub failed_calls: usize,
    pub elapsed_ms: f64,
}

/// 调度输出
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOutput {
    pub candidates: Vec<RawCandidate>,
    pub counters: PassCounters,
}

/// 分辨率阶梯: 录制源比交互源多
pub fn resolution_ladder(mode: DetectionMode, source: SourceKind, tier: DetectorTier) -> Vec<u32> {
    let ladder: &[u32] = match (source, mode) {
        (SourceKind::Interactive, DetectionMode::Fast) => &[224, 320],
        (SourceKind::Interactive, DetectionMode::Accurate) => &[320, 416],
        (SourceKind::Interactive, DetectionMode::Max) => &[320, 416, 512],
        (SourceKind::Recorded, DetectionMode::Fast) => &[320, 416, 512],
        (SourceKind::Recorded, DetectionMode::Accurate) => &[320, 416, 512, 608],
        (SourceKind::Recorded, DetectionMode::Max) => &[416, 512, 608, 704],
    };
    match tier {
        DetectorTier::Minimal => ladder[..1].to_vec(),
        _ => ladder.to_vec(),
    }
}

/// 多轮检测调度器
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pub mode: DetectionMode,
    pub tier: DetectorTier,
    pub sensitivity: f32,
    pub enable_enhanced_rescue: bool,
    pub rescue_upscale: f32,
}

impl Orchestrator {
    pub fn from_config(config: &AudienceConfig) -> Self {
        Self {
            mode: config.mode,
            tier: config.detector_tier,
            sensitivity: config.sensitivity,
            enable_enhanced_rescue: config.enable_enhanced_rescue,
            rescue_upscale: config.rescue_upscale,
        }
    }

    fn pass1_threshold(&self) -> f32 {
        (self.sensitivity - 0.05).max(0.05)
    }

    /// 放大后误检更多, 阈值比第一轮更高
    fn pass2_threshold(&self) -> f32 {
        (self.sensitivity + 0.05).min(0.95)
    }

    /// 一轮检测的所有调用
    fn pass_calls(&self, ladder: &[u32], threshold: f32) -> Vec<DetectParams> {
        let mut calls: Vec<DetectParams> = ladder
            .iter()
            .map(|&input_size| DetectParams {
                input_size,
                score_threshold: threshold,
                variant: DetectorSource::Tiny,
            })
            .collect();
        if self.tier == DetectorTier::Dual {
            if let Some(&largest) = ladder.last() {
                calls.push(DetectParams {
                    input_size: largest,
                    score_threshold: threshold,
                    variant: DetectorSource::Secondary,
                });
            }
        }
        calls
    }

    /// 并行执行一轮调用, 单个调用失败只记日志, 不影响其他调用
    fn run_pass(
        &self,
        gateway: &dyn ModelGateway,
        image: &RgbImage,
        calls: &[DetectParams],
        pass_id: u8,
        scale: f32,
        counters: &mut PassCounters,
    ) -> Vec<RawCandidate> {
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = calls
                .iter()
                .map(|params| (params, s.spawn(move || gateway.detect(image, params))))
                .collect();
            handles
                .into_iter()
                .map(|(params, handle)| (params, handle.join()))
                .collect()
        });

        let mut candidates = Vec::new();
        for (params, result) in results {
            match result {
                Ok(Ok(detections)) => {
                    candidates.extend(
                        detections
                            .into_iter()
                            .map(|d| d.into_candidate(pass_id, scale)),
                    );
                }
                Ok(Err(e)) => {
                    counters.failed_calls += 1;
                    warn!(
                        "⚠️ 第{}轮检测失败 ({} {:?}@{}): {}",
                        pass_id,
                        gateway.name(),
                        params.variant,
                        params.input_size,
                        e
                    );
                }
                Err(_) => {
                    counters.failed_calls += 1;
                    warn!(
                        "❌ 第{}轮检测线程崩溃 ({:?}@{})",
                        pass_id, params.variant, params.input_size
                    );
                }
            }
        }
        counters.raw_count += candidates.len();
        counters.per_pass[(pass_id as usize - 1).min(2)] += candidates.len();
        candidates
    }

    /// 执行多轮检测
    pub fn run(
        &self,
        gateway: &dyn ModelGateway,
        image: &RgbImage,
        source: SourceKind,
        cancel: &CancelToken,
    ) -> OrchestratorOutput {
        let start = Instant::now();
        let mut counters = PassCounters::default();
        let frame = FrameSize {
            width: image.width(),
            height: image.height(),
        };
        let ladder = resolution_ladder(self.mode, source, self.tier);

        // 第一轮
        let calls = self.pass_calls(&ladder, self.pass1_threshold());
        let raw = self.run_pass(gateway, image, &calls, 1, 1.0, &mut counters);
        let mut merged = merge(raw, DEFAULT_IOU_THRESHOLD, DEFAULT_CONTAINMENT_THRESHOLD);
        counters.added_per_pass[0] = merged.len();
        counters.pass_used = 1;

        let wants_pass2 = source == SourceKind::Recorded
            && self.tier != DetectorTier::Minimal
            && (merged.len() < PASS2_MIN_CANDIDATES || self.enable_enhanced_rescue);

        if wants_pass2 && !cancel.is_cancelled() {
            // 第二轮: 增强 + 放大
            match enhance(image, &EnhanceParams::rescue(self.rescue_upscale)) {
                Ok(enhanced) => {
                    let calls = self.pass_calls(&ladder, self.pass2_threshold());
                    let raw =
                        self.run_pass(gateway, &enhanced, &calls, 2, self.rescue_upscale, &mut counters);
                    counters.added_per_pass[1] = merge_into(&mut merged, raw);
                    counters.pass_used = 2;
                }
                Err(e) => warn!("⚠️ 第二轮增强失败: {}", e),
            }

            if merged.len() < PASS3_MIN_CANDIDATES
                && self.enable_enhanced_rescue
                && !cancel.is_cancelled()
            {
                // 第三轮: 最大增强, 低阈值撒网后严格自过滤
                let params = EnhanceParams::maximal();
                match enhance(image, &params) {
                    Ok(enhanced) => {
                        let calls = self.pass_calls(&ladder, PASS3_RAW_THRESHOLD);
                        let raw =
                            self.run_pass(gateway, &enhanced, &calls, 3, params.upscale, &mut counters);
                        let strict: Vec<_> = raw
                            .into_iter()
                            .filter(|c| strict_rescue_filter(c, frame))
                            .collect();
                        counters.added_per_pass[2] = merge_into(&mut merged, strict);
                        counters.pass_used = 3;
                    }
                    Err(e) => warn!("⚠️ 第三轮增强失败: {}", e),
                }
            }
        }

        counters.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "🔍 多轮检测: 原始{}个 | 合并后{}个 | 轮次{} | 失败调用{} | {:.1}ms",
            counters.raw_count,
            merged.len(),
            counters.pass_used,
            counters.failed_calls,
            counters.elapsed_ms
        );

        OrchestratorOutput {
            candidates: merged,
            counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::gateway::{ScriptedCycle, ScriptedFace, ScriptedGateway};
    use crate::detection::types::{FaceBox, Gender};

    fn orchestrator(rescue: bool, tier: DetectorTier) -> Orchestrator {
        Orchestrator {
            mode: DetectionMode::Accurate,
            tier,
            sensitivity: 0.3,
            enable_enhanced_rescue: rescue,
            rescue_upscale: 2.0,
        }
    }

    fn face(x: f32, score: f32) -> ScriptedFace {
        ScriptedFace::new(FaceBox::new(x, 100.0, 50.0, 60.0), score, 25.0, Gender::Male, 0.9)
    }

    fn gateway(cycle: ScriptedCycle) -> ScriptedGateway {
        ScriptedGateway::new(vec![cycle], 640)
    }

    #[test]
    fn test_ladder_sizes() {
        for mode in [DetectionMode::Fast, DetectionMode::Accurate, DetectionMode::Max] {
            let interactive = resolution_ladder(mode, SourceKind::Interactive, DetectorTier::Single);
            let recorded = resolution_ladder(mode, SourceKind::Recorded, DetectorTier::Single);
            assert!((2..=4).contains(&interactive.len()));
            assert!((2..=4).contains(&recorded.len()));
            assert!(recorded.len() > interactive.len());
        }
        assert_eq!(
            resolution_ladder(DetectionMode::Max, SourceKind::Recorded, DetectorTier::Minimal).len(),
            1
        );
    }

    #[test]
    fn test_interactive_runs_single_pass() {
        let gw = gateway(ScriptedCycle {
            faces: vec![face(100.0, 0.8)],
            ..Default::default()
        });
        let image = RgbImage::new(640, 480);
        let out = orchestrator(true, DetectorTier::Single).run(
            &gw,
            &image,
            SourceKind::Interactive,
            &CancelToken::new(),
        );
        assert_eq!(out.counters.pass_used, 1);
        // 两个分辨率各返回一次, 合并后只剩一个
        assert_eq!(out.counters.raw_count, 2);
        assert_eq!(out.candidates.len(), 1);
    }

    #[test]
    fn test_recorded_sparse_triggers_pass2_and_maps_coordinates() {
        let mut small = face(300.0, 0.6);
        small.min_scale = 2.0;
        let gw = gateway(ScriptedCycle {
            faces: vec![face(100.0, 0.8), small],
            ..Default::default()
        });
        let image = RgbImage::new(640, 480);
        let out = orchestrator(false, DetectorTier::Single).run(
            &gw,
            &image,
            SourceKind::Recorded,
            &CancelToken::new(),
        );
        assert_eq!(out.counters.pass_used, 2);
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(out.counters.added_per_pass[1], 1);
        let rescued = out.candidates.iter().find(|c| c.pass_id == 2).unwrap();
        assert!((rescued.face.x - 300.0).abs() < 1e-3);
        assert!((rescued.face.width - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_pass3_self_filters() {
        let mut faint = face(300.0, 0.12);
        faint.min_scale = 2.5;
        let mut decent = face(450.0, 0.25);
        decent.min_scale = 2.5;
        let gw = gateway(ScriptedCycle {
            faces: vec![face(100.0, 0.8), faint, decent],
            ..Default::default()
        });
        let image = RgbImage::new(640, 480);
        let out = orchestrator(true, DetectorTier::Single).run(
            &gw,
            &image,
            SourceKind::Recorded,
            &CancelToken::new(),
        );
        assert_eq!(out.counters.pass_used, 3);
        // 0.12 分的框被第三轮严格过滤丢弃
        assert_eq!(out.candidates.len(), 2);
        assert!(out.candidates.iter().all(|c| c.score >= 0.2));
    }

    #[test]
    fn test_failed_call_does_not_sink_pass() {
        let gw = gateway(ScriptedCycle {
            faces: vec![face(100.0, 0.8)],
            fail_sizes: vec![320],
            ..Default::default()
        });
        let image = RgbImage::new(640, 480);
        let out = orchestrator(false, DetectorTier::Single).run(
            &gw,
            &image,
            SourceKind::Interactive,
            &CancelToken::new(),
        );
        assert_eq!(out.counters.failed_calls, 1);
        assert_eq!(out.candidates.len(), 1);
    }

    #[test]
    fn test_dual_tier_calls_secondary() {
        let mut secondary_only = face(300.0, 0.7);
        secondary_only.detector = Some(DetectorSource::Secondary);
        let gw = gateway(ScriptedCycle {
            faces: vec![face(100.0, 0.8), secondary_only],
            ..Default::default()
        });
        let image = RgbImage::new(640, 480);
        let out = orchestrator(false, DetectorTier::Dual).run(
            &gw,
            &image,
            SourceKind::Interactive,
            &CancelToken::new(),
        );
        assert_eq!(out.candidates.len(), 2);
        assert!(out
            .candidates
            .iter()
            .any(|c| c.source == DetectorSource::Secondary));
    }

    #[test]
    fn test_cancel_skips_rescue() {
        let gw = gateway(ScriptedCycle::default());
        let image = RgbImage::new(640, 480);
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = orchestrator(true, DetectorTier::Single).run(&gw, &image, SourceKind::Recorded, &cancel);
        assert_eq!(out.counters.pass_used, 1);
    }

    #[test]
    fn test_recorded_dense_pass1_skips_pass2() {
        let mut small = face(500.0, 0.6);
        small.min_scale = 2.0;
        let gw = gateway(ScriptedCycle {
            faces: vec![face(50.0, 0.8), face(200.0, 0.8), face(350.0, 0.8), small],
            ..Default::default()
        });
        let image = RgbImage::new(640, 480);
        let out = orchestrator(false, DetectorTier::Single).run(
            &gw,
            &image,
            SourceKind::Recorded,
            &CancelToken::new(),
        );
        assert_eq!(out.counters.pass_used, 1);
        assert_eq!(out.counters.per_pass[1], 0);
        assert_eq!(out.candidates.len(), 3);
    }

    #[test]
    fn test_minimal_tier_never_rescues() {
        let mut small = face(300.0, 0.6);
        small.min_scale = 2.0;
        let gw = gateway(ScriptedCycle {
            faces: vec![face(100.0, 0.8), small],
            ..Default::default()
        });
        let image = RgbImage::new(640, 480);
        for rescue in [false, true] {
            let out = orchestrator(rescue, DetectorTier::Minimal).run(
                &gw,
                &image,
                SourceKind::Recorded,
                &CancelToken::new(),
            );
            assert_eq!(out.counters.pass_used, 1);
            // 单一分辨率, 单一检测器
            assert_eq!(out.counters.raw_count, 1);
            assert_eq!(out.candidates.len(), 1);
        }
    }

    #[test]
    fn test_pass3_skipped_when_pass2_reaches_five() {
        let mut faint = face(570.0, 0.25);
        faint.min_scale = 2.5;
        let gw = gateway(ScriptedCycle {
            faces: vec![
                face(20.0, 0.8),
                face(140.0, 0.8),
                face(260.0, 0.8),
                face(380.0, 0.8),
                face(500.0, 0.8),
                faint,
            ],
            ..Default::default()
        });
        let image = RgbImage::new(640, 480);
        let out = orchestrator(true, DetectorTier::Single).run(
            &gw,
            &image,
            SourceKind::Recorded,
            &CancelToken::new(),
        );
        assert_eq!(out.counters.pass_used, 2);
        assert_eq!(out.counters.per_pass[2], 0);
        assert_eq!(out.candidates.len(), 5);
    }
}
