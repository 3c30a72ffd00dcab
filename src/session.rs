// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 采集会话 (Capture Session Aggregator)
//! 在采集窗口内把每条稳定轨迹的投票累积为一个观众结论

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use crate::config::AudienceConfig;
use crate::detection::tracker::Track;
use crate::detection::types::{AgeGroup, Gender};
use crate::detection::votes::{AgeVotes, GenderVotes};
use crate::scoring::{Demographics, Spot};

/// 计入统计所需的最少出现帧数
pub const MIN_SEEN_FRAMES: u32 = 2;

/// 单次观测 (一条稳定轨迹在一个周期内的投票)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub gender: Gender,
    pub age_group: AgeGroup,
    pub confidence: f32,
}

impl From<&Track> for Observation {
    fn from(track: &Track) -> Self {
        Self {
            gender: track.stable_gender,
            age_group: track.stable_age_group,
            confidence: track.last_confidence,
        }
    }
}

/// 单个观众在会话内的累积
#[derive(Debug, Clone, Default)]
pub struct ViewerAggregate {
    pub gender_votes: GenderVotes,
    pub age_votes: AgeVotes,
    pub seen_frames: u32,
    pub best_confidence: f32,
    last_gender: Option<Gender>,
    last_age_group: Option<AgeGroup>,
}

impl ViewerAggregate {
    fn observe(&mut self, observation: Observation) {
        self.gender_votes.add(observation.gender, observation.confidence);
        self.age_votes.add(observation.age_group, observation.confidence);
        self.seen_frames += 1;
        self.best_confidence = self.best_confidence.max(observation.confidence);
        self.last_gender = Some(observation.gender);
        self.last_age_group = Some(observation.age_group);
    }

    /// 会话级结论, 票数不够决定性时退回最后一次观测的标签
    fn verdict(&self) -> Option<(Gender, AgeGroup)> {
        let gender = self.gender_votes.decisive().or(self.last_gender)?;
        let age_group = self.age_votes.decisive().or(self.last_age_group)?;
        Some((gender, age_group))
    }
}

/// 合格观众
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewerVerdict {
    pub track_id: u32,
    pub gender: Gender,
    pub age_group: AgeGroup,
    pub seen_frames: u32,
    pub best_confidence: f32,
}

/// 会话结束后的只读汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub frame_count: u64,
    /// 所有出现过的轨迹数 (含不合格)
    pub observed_tracks: usize,
    pub unique_viewers: usize,
    pub demographics: Demographics,
    pub viewers: Vec<ViewerVerdict>,
}

/// 采集会话
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub started_at: DateTime<Utc>,
    pub frame_count: u64,
    viewers: HashMap<u32, ViewerAggregate>,
}

impl CaptureSession {
    pub fn open(now: DateTime<Utc>) -> Self {
        info!("🎬 采集窗口开启");
        Self {
            started_at: now,
            frame_count: 0,
            viewers: HashMap::new(),
        }
    }

    /// 每个周期调用一次
    pub fn begin_frame(&mut self) {
        self.frame_count += 1;
    }

    pub fn observe(&mut self, track_id: u32, observation: Observation) {
        self.viewers.entry(track_id).or_default().observe(observation);
    }

    pub fn viewer(&self, track_id: u32) -> Option<&ViewerAggregate> {
        self.viewers.get(&track_id)
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// 结束会话, 只统计出现 ≥2 帧且最高置信度达标的观众
    pub fn close(self, min_confidence: f32, now: DateTime<Utc>) -> SessionSummary {
        let observed_tracks = self.viewers.len();
        let mut viewers: Vec<ViewerVerdict> = self
            .viewers
            .iter()
            .filter(|(_, v)| v.seen_frames >= MIN_SEEN_FRAMES && v.best_confidence >= min_confidence)
            .filter_map(|(id, v)| {
                v.verdict().map(|(gender, age_group)| ViewerVerdict {
                    track_id: *id,
                    gender,
                    age_group,
                    seen_frames: v.seen_frames,
                    best_confidence: v.best_confidence,
                })
            })
            .collect();
        viewers.sort_by_key(|v| v.track_id);

        let mut demographics = Demographics::default();
        for v in &viewers {
            demographics.add(v.gender, v.age_group);
        }

        info!(
            "🏁 采集窗口关闭: {}帧 | 观测{}人 | 有效{}人",
            self.frame_count,
            observed_tracks,
            viewers.len()
        );

        SessionSummary {
            started_at: self.started_at,
            closed_at: now,
            frame_count: self.frame_count,
            observed_tracks,
            unique_viewers: viewers.len(),
            demographics,
            viewers,
        }
    }
}

/// 采集窗口 (相对播放起点的秒数, 左闭右开)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureWindow {
    pub start_secs: f32,
    pub end_secs: f32,
}

impl CaptureWindow {
    /// 片段自带的百分比优先于全局配置
    pub fn for_spot(spot: &Spot, config: &AudienceConfig) -> Self {
        let start = spot
            .capture_start
            .unwrap_or(config.capture_start_percent)
            .clamp(0.0, 100.0);
        let end = spot
            .capture_end
            .unwrap_or(config.capture_end_percent)
            .clamp(0.0, 100.0);
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            start_secs: spot.duration * start / 100.0,
            end_secs: spot.duration * end / 100.0,
        }
    }

    pub fn contains(&self, elapsed_secs: f32) -> bool {
        elapsed_secs >= self.start_secs && elapsed_secs < self.end_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{TargetAge, TargetGender};

    fn obs(gender: Gender, confidence: f32) -> Observation {
        Observation {
            gender,
            age_group: AgeGroup::Young,
            confidence,
        }
    }

    #[test]
    fn test_single_frame_viewer_excluded() {
        let now = Utc::now();
        let mut session = CaptureSession::open(now);
        session.begin_frame();
        session.observe(7, obs(Gender::Male, 0.99));
        let summary = session.close(0.6, now);
        assert_eq!(summary.observed_tracks, 1);
        assert_eq!(summary.unique_viewers, 0);
        assert!(summary.viewers.is_empty());
    }

    #[test]
    fn test_low_confidence_viewer_excluded() {
        let now = Utc::now();
        let mut session = CaptureSession::open(now);
        for _ in 0..5 {
            session.begin_frame();
            session.observe(1, obs(Gender::Female, 0.55));
        }
        assert_eq!(session.close(0.6, now).unique_viewers, 0);
    }

    #[test]
    fn test_session_verdict_uses_margin_rule() {
        let now = Utc::now();
        let mut session = CaptureSession::open(now);
        for _ in 0..3 {
            session.begin_frame();
            session.observe(1, obs(Gender::Female, 0.8));
            session.observe(2, obs(Gender::Male, 0.9));
        }
        session.begin_frame();
        session.observe(1, obs(Gender::Male, 0.6));
        assert_eq!(session.viewer(1).map(|v| v.seen_frames), Some(4));

        let summary = session.close(0.6, now);
        assert_eq!(summary.frame_count, 4);
        assert_eq!(summary.unique_viewers, 2);
        assert_eq!(summary.viewers[0].gender, Gender::Female);
        assert_eq!(summary.viewers[1].gender, Gender::Male);
        assert_eq!(summary.demographics.female, 1);
        assert_eq!(summary.demographics.young, 2);
    }

    #[test]
    fn test_indecisive_falls_back_to_last_label() {
        let mut v = ViewerAggregate::default();
        v.observe(obs(Gender::Male, 0.6));
        v.observe(obs(Gender::Female, 0.6));
        assert_eq!(v.verdict(), Some((Gender::Female, AgeGroup::Young)));
    }

    #[test]
    fn test_capture_window() {
        let mut spot = Spot {
            id: "s".to_string(),
            target_gender: TargetGender::All,
            target_age: TargetAge::All,
            duration: 20.0,
            capture_start: None,
            capture_end: None,
        };
        let config = AudienceConfig::default();
        let w = CaptureWindow::for_spot(&spot, &config);
        assert!((w.start_secs - 2.0).abs() < 1e-5);
        assert!((w.end_secs - 18.0).abs() < 1e-5);
        assert!(!w.contains(1.0));
        assert!(w.contains(2.0));
        assert!(!w.contains(18.0));

        spot.capture_start = Some(50.0);
        let w = CaptureWindow::for_spot(&spot, &config);
        assert!((w.start_secs - 10.0).abs() < 1e-5);
    }
}
