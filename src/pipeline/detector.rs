// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测循环 (Detection Loop)
/// 职责: 节拍 → 检测周期(工作线程) → 跟踪器更新 → 会话聚合 → 发布快照
///
/// 跟踪表和会话只在本循环内写入, 其余模块只读 `CycleSnapshot`
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::cycle::{CycleSlot, TickOutcome};
use super::{CycleSnapshot, CycleStats, TrackedFace};
use crate::config::{AudienceConfig, SourceKind};
use crate::detection::detector::{DetectionOutcome, FaceDetector};
use crate::detection::gateway::ModelGateway;
use crate::detection::tracker::{FaceTracker, Tracker};
use crate::detection::types::{AgeGroup, Frame, Gender};
use crate::error::Result;
use crate::scoring::{Demographics, Spot};
use crate::session::{CaptureSession, CaptureWindow, Observation, SessionSummary};

/// 每隔多少个周期输出一次性能日志
const PERF_LOG_INTERVAL: u64 = 10;

pub struct DetectionLoop {
    config: AudienceConfig,
    gateway: Arc<dyn ModelGateway>,
    detector: Arc<FaceDetector>,
    tracker: FaceTracker,
    session: Option<CaptureSession>,
    window: Option<CaptureWindow>,
    source: SourceKind,
    slot: CycleSlot<DetectionOutcome>,
    snapshot: Arc<CycleSnapshot>,
    cycles: u64,

    // 统计
    count: u64,
    last: Instant,
    current_fps: f64,
}

impl DetectionLoop {
    pub fn new(config: AudienceConfig, gateway: Arc<dyn ModelGateway>, source: SourceKind) -> Self {
        info!(
            "🔍 检测循环启动 | 网关: {} | 来源: {:?} | 超时: {}ms",
            gateway.name(),
            source,
            config.cycle_timeout_ms
        );
        Self {
            detector: Arc::new(FaceDetector::from_config(&config)),
            tracker: FaceTracker::new(config.tracker.clone(), config.female_boost_factor),
            slot: CycleSlot::new(Duration::from_millis(config.cycle_timeout_ms)),
            config,
            gateway,
            session: None,
            window: None,
            source,
            snapshot: Arc::new(CycleSnapshot::default()),
            cycles: 0,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }

    pub fn config(&self) -> &AudienceConfig {
        &self.config
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn tracker(&self) -> &FaceTracker {
        &self.tracker
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// 最近一次周期边界的快照
    pub fn snapshot(&self) -> Arc<CycleSnapshot> {
        Arc::clone(&self.snapshot)
    }

    // ========== 周期调度 ==========

    /// 外部节拍: 先收割已完成的周期, 仍在忙则跳过本节拍
    pub fn tick(&mut self, frame: Frame) -> TickOutcome {
        self.poll();
        if self.slot.is_busy() {
            debug!("⏭️ 上一周期未完成, 跳过本节拍");
            return TickOutcome::Busy;
        }
        self.spawn_cycle(frame)
    }

    /// 非阻塞收割: 完成或超时时应用结果并返回新快照
    pub fn poll(&mut self) -> Option<Arc<CycleSnapshot>> {
        let (result, elapsed) = self.slot.poll()?;
        Some(self.finish_cycle(result, elapsed))
    }

    /// 阻塞等待在途周期 (最长到超时)
    pub fn wait(&mut self) -> Option<Arc<CycleSnapshot>> {
        let (result, elapsed) = self.slot.wait()?;
        Some(self.finish_cycle(result, elapsed))
    }

    /// 阻塞执行一个完整周期
    pub fn run_cycle(&mut self, frame: Frame) -> Arc<CycleSnapshot> {
        self.wait();
        self.spawn_cycle(frame);
        self.wait().unwrap_or_else(|| self.snapshot())
    }

    fn spawn_cycle(&mut self, frame: Frame) -> TickOutcome {
        let gateway = Arc::clone(&self.gateway);
        let detector = Arc::clone(&self.detector);
        let source = self.source;
        self.slot
            .start(move |cancel| Ok(detector.detect(gateway.as_ref(), &frame, source, cancel)))
    }

    fn finish_cycle(&mut self, result: Result<DetectionOutcome>, elapsed: Duration) -> Arc<CycleSnapshot> {
        let (outcome, timed_out) = match result {
            Ok(outcome) => (outcome, false),
            Err(e) => {
                // 整个周期作废, 按零检测处理
                warn!("⚠️ 检测周期放弃: {}", e);
                (DetectionOutcome::default(), true)
            }
        };
        self.apply(outcome, elapsed, timed_out)
    }

    fn apply(&mut self, outcome: DetectionOutcome, elapsed: Duration, timed_out: bool) -> Arc<CycleSnapshot> {
        let now = Utc::now();
        self.tracker.update(&outcome.detections, now);
        self.cycles += 1;

        let min_hits = self.tracker.settings().min_hits;
        let visible: Vec<TrackedFace> = self
            .tracker
            .tracks()
            .iter()
            .filter(|t| t.is_confirmed(min_hits))
            .map(|t| TrackedFace {
                track_id: t.id,
                face: t.face,
                gender: t.stable_gender,
                age_group: t.stable_age_group,
                confidence: t.last_confidence,
                is_user_corrected: t.is_user_corrected,
            })
            .collect();

        if let Some(session) = self.session.as_mut() {
            session.begin_frame();
            for track in self.tracker.tracks().iter().filter(|t| t.is_confirmed(min_hits)) {
                session.observe(track.id, Observation::from(track));
            }
        }

        let mut demographics = Demographics::default();
        for face in &visible {
            demographics.add(face.gender, face.age_group);
        }

        // 计算FPS
        self.count += 1;
        if self.last.elapsed() >= Duration::from_secs(1) {
            self.current_fps = self.count as f64 / self.last.elapsed().as_secs_f64();
            self.count = 0;
            self.last = Instant::now();
        }

        let stats = CycleStats {
            cycle: self.cycles,
            fps: self.current_fps,
            latency_ms: elapsed.as_secs_f64() * 1000.0,
            raw_count: outcome.counters.raw_count,
            filtered_count: outcome.filtered_count,
            tracked_count: visible.len(),
            pass_used: outcome.counters.pass_used,
            timed_out,
        };
        debug!(
            "📊 周期#{} | 原始{} | 过滤后{} | 跟踪{} | 轮次{} | {:.1}ms",
            stats.cycle,
            stats.raw_count,
            stats.filtered_count,
            stats.tracked_count,
            stats.pass_used,
            stats.latency_ms
        );

        if stats.cycle % PERF_LOG_INTERVAL == 0 {
            info!(
                "📈 性能: {:.1} FPS | 原始{} | 过滤后{} | 跟踪{} | 延迟{:.1}ms",
                stats.fps, stats.raw_count, stats.filtered_count, stats.tracked_count, stats.latency_ms
            );
        }

        self.snapshot = Arc::new(CycleSnapshot {
            faces: visible,
            stats,
            demographics,
        });
        self.snapshot()
    }

    // ========== 来源切换 ==========

    /// 切换来源: 取消在途周期, 清空跟踪表, 重置会话
    pub fn switch_source(&mut self, source: SourceKind) {
        if self.slot.cancel() {
            info!("🛑 切换来源, 取消在途周期");
        }
        self.tracker.reset();
        if self.session.is_some() {
            self.session = Some(CaptureSession::open(Utc::now()));
        }
        self.snapshot = Arc::new(CycleSnapshot::default());
        self.source = source;
        info!("🔄 来源切换为 {:?}", source);
    }

    // ========== 采集会话 ==========

    /// 开始播放新片段, 关闭上一片段遗留的会话
    pub fn start_playback(&mut self, spot: &Spot) -> Option<SessionSummary> {
        let previous = self.close_session();
        let window = CaptureWindow::for_spot(spot, &self.config);
        debug!(
            "🎞️ 播放 {} | 采集窗口 {:.1}s - {:.1}s",
            spot.id, window.start_secs, window.end_secs
        );
        self.window = Some(window);
        previous
    }

    /// 播放进度更新: 进入窗口时开启会话, 离开时关闭并返回汇总
    pub fn update_playback(&mut self, elapsed_secs: f32) -> Option<SessionSummary> {
        let window = self.window?;
        if window.contains(elapsed_secs) {
            if self.session.is_none() {
                self.open_session();
            }
            None
        } else if elapsed_secs >= window.end_secs {
            self.window = None;
            self.close_session()
        } else {
            None
        }
    }

    pub fn open_session(&mut self) {
        self.session = Some(CaptureSession::open(Utc::now()));
    }

    /// 关闭会话并清除误检抑制区域, 下一会话从干净的画面开始
    pub fn close_session(&mut self) -> Option<SessionSummary> {
        self.tracker.clear_suppressions();
        self.session
            .take()
            .map(|s| s.close(self.config.min_demographic_confidence, Utc::now()))
    }

    // ========== 人工修正 ==========

    pub fn correct_gender(&mut self, track_id: u32, gender: Gender) -> Result<()> {
        self.tracker.correct_gender(track_id, gender)
    }

    pub fn correct_age(&mut self, track_id: u32, age_group: AgeGroup) -> Result<()> {
        self.tracker.correct_age(track_id, age_group)
    }

    pub fn mark_false_positive(&mut self, track_id: u32) -> Result<()> {
        self.tracker.mark_false_positive(track_id)
    }
}
