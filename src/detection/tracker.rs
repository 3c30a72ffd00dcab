// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 跨帧人脸跟踪 (Temporal Tracker)
//! Cross-frame identity tracking with confidence-weighted vote stabilization
//!
//! 状态: 临时(provisional) → 稳定(stable) → 丢失(stale) → 移除(removed)
//! 匹配: 每条轨迹贪心地选取得分最高的未匹配检测

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::types::{AgeGroup, ClassifiedDetection, FaceBox, Gender};
use super::votes::{AgeVotes, GenderVotes};
use crate::config::TrackerSettings;
use crate::error::{AudienceError, Result};

/// 匹配得分中的距离归一化尺度(像素)
const DISTANCE_SCALE: f32 = 200.0;
/// IoU 不足时仍可接受的距离
const NEAR_DISTANCE: f32 = 80.0;
const MIN_MATCH_IOU: f32 = 0.2;
/// 盒子平滑: new = 0.3*old + 0.7*incoming
const BOX_KEEP: f32 = 0.3;
/// 抑制区域与新检测的重叠阈值
const SUPPRESS_IOU: f32 = 0.3;

// ========== 公共数据结构 ==========

/// 轨迹状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Provisional,
    Stable,
    Stale,
}

/// 跟踪对象
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    /// 唯一跟踪ID
    pub id: u32,

    /// 当前人脸框 (平滑后)
    pub face: FaceBox,

    /// 中心点速度 (像素/周期)
    pub velocity: (f32, f32),

    /// 累计命中周期数 (丢失不清零, 恢复后直接保持稳定)
    pub total_hits: u32,

    /// 连续丢失周期数
    pub missed_frames: u32,

    pub gender_votes: GenderVotes,
    pub age_votes: AgeVotes,
    pub stable_gender: Gender,
    pub stable_age_group: AgeGroup,

    /// 人工修正后不再接受自动投票
    pub is_user_corrected: bool,

    /// 最近一次匹配的性别置信度
    pub last_confidence: f32,

    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Track {
    pub fn state(&self, min_hits: u32) -> TrackState {
        if self.missed_frames > 0 {
            TrackState::Stale
        } else if self.total_hits >= min_hits {
            TrackState::Stable
        } else {
            TrackState::Provisional
        }
    }

    /// 本周期被匹配且已稳定
    pub fn is_confirmed(&self, min_hits: u32) -> bool {
        self.state(min_hits) == TrackState::Stable
    }

    fn predicted_center(&self) -> (f32, f32) {
        let (cx, cy) = self.face.center();
        (cx + self.velocity.0, cy + self.velocity.1)
    }
}

/// 误检抑制区域 (人工标记误检后短时间内不再生成新轨迹)
#[derive(Debug, Clone)]
struct Suppression {
    face: FaceBox,
    cycles_left: u32,
}

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
pub trait Tracker {
    /// 用当前周期的检测结果更新, 返回所有活跃轨迹
    fn update(&mut self, detections: &[ClassifiedDetection], now: DateTime<Utc>) -> &[Track];

    /// 重置跟踪器 (清除所有跟踪)
    fn reset(&mut self);

    /// 获取当前跟踪数量
    fn track_count(&self) -> usize;
}

/// 人脸跟踪器
pub struct FaceTracker {
    tracks: Vec<Track>,
    next_id: u32,
    settings: TrackerSettings,
    female_boost_factor: f32,
    suppressed: Vec<Suppression>,
}

impl FaceTracker {
    pub fn new(settings: TrackerSettings, female_boost_factor: f32) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            settings,
            female_boost_factor,
            suppressed: Vec::new(),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, id: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// 已稳定的轨迹 (包含短暂丢失中的)
    pub fn reportable(&self) -> impl Iterator<Item = &Track> {
        let min_hits = self.settings.min_hits;
        self.tracks
            .iter()
            .filter(move |t| t.total_hits >= min_hits)
    }

    /// 单次检测的投票权重: 置信度 × 检测分, 女性票按原始不确定度额外加权
    fn vote_weight(&self, detection: &ClassifiedDetection) -> f32 {
        let base = detection.gender_confidence * detection.detection_score.min(1.0);
        if detection.gender == Gender::Female {
            let uncertainty = 1.0 - ((detection.raw_gender_confidence - 0.5).abs() * 2.0).min(1.0);
            base * (1.0 + self.female_boost_factor * uncertainty)
        } else {
            base
        }
    }

    /// 轨迹与检测的匹配得分, 不满足约束时返回 None
    fn match_score(&self, track: &Track, detection: &ClassifiedDetection) -> Option<f32> {
        let iou = track.face.iou(&detection.face);
        let (dx, dy) = detection.face.center();
        let (px, py) = track.predicted_center();
        let predicted_distance = ((dx - px).powi(2) + (dy - py).powi(2)).sqrt();
        let distance = track.face.center_distance(&detection.face).min(predicted_distance);

        // 不可能的跳变
        if distance > self.settings.max_velocity_px {
            return None;
        }
        if !(iou > MIN_MATCH_IOU || distance < NEAR_DISTANCE) {
            return None;
        }
        Some(0.6 * iou + 0.4 * (1.0 - distance / DISTANCE_SCALE).max(0.0))
    }

    fn apply_match(&mut self, track_idx: usize, detection: &ClassifiedDetection, now: DateTime<Utc>) {
        let weight = self.vote_weight(detection);
        let min_vote = self.settings.min_vote_confidence;
        let track = &mut self.tracks[track_idx];

        let (ox, oy) = track.face.center();
        let (ix, iy) = detection.face.center();
        track.velocity = (
            0.5 * track.velocity.0 + 0.5 * (ix - ox),
            0.5 * track.velocity.1 + 0.5 * (iy - oy),
        );
        let old = track.face;
        let new = detection.face;
        track.face = FaceBox::new(
            BOX_KEEP * old.x + (1.0 - BOX_KEEP) * new.x,
            BOX_KEEP * old.y + (1.0 - BOX_KEEP) * new.y,
            BOX_KEEP * old.width + (1.0 - BOX_KEEP) * new.width,
            BOX_KEEP * old.height + (1.0 - BOX_KEEP) * new.height,
        );

        track.total_hits += 1;
        track.missed_frames = 0;
        track.last_seen_at = now;
        track.last_confidence = detection.gender_confidence;

        if track.is_user_corrected || detection.gender_confidence < min_vote {
            return;
        }
        track.gender_votes.add(detection.gender, weight);
        track.age_votes.add(detection.age_group, weight);
        track.stable_gender = track.gender_votes.stabilize(track.stable_gender);
        track.stable_age_group = track.age_votes.stabilize(track.stable_age_group);
    }

    fn spawn(&mut self, detection: &ClassifiedDetection, now: DateTime<Utc>) {
        let weight = self.vote_weight(detection);
        let mut gender_votes = GenderVotes::default();
        gender_votes.add(detection.gender, weight);
        let mut age_votes = AgeVotes::default();
        age_votes.add(detection.age_group, weight);

        let track = Track {
            id: self.next_id,
            face: detection.face,
            velocity: (0.0, 0.0),
            total_hits: 1,
            missed_frames: 0,
            gender_votes,
            age_votes,
            stable_gender: detection.gender,
            stable_age_group: detection.age_group,
            is_user_corrected: false,
            last_confidence: detection.gender_confidence,
            first_seen_at: now,
            last_seen_at: now,
        };
        debug!("🆕 新轨迹 #{} {:?}", track.id, track.face);
        self.tracks.push(track);
        self.next_id += 1;
    }

    fn is_suppressed(&self, face: &FaceBox) -> bool {
        self.suppressed.iter().any(|s| {
            let (cx, cy) = face.center();
            face.iou(&s.face) > SUPPRESS_IOU
                || (cx >= s.face.x && cx <= s.face.xmax() && cy >= s.face.y && cy <= s.face.ymax())
        })
    }

    // ========== 人工修正 ==========

    fn track_mut(&mut self, id: u32) -> Result<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(AudienceError::UnknownTrack(id))
    }

    /// 人工指定性别, 在轨迹生命周期内永久有效
    pub fn correct_gender(&mut self, id: u32, gender: Gender) -> Result<()> {
        let track = self.track_mut(id)?;
        track.stable_gender = gender;
        track.is_user_corrected = true;
        Ok(())
    }

    /// 人工指定年龄段
    pub fn correct_age(&mut self, id: u32, age_group: AgeGroup) -> Result<()> {
        let track = self.track_mut(id)?;
        track.stable_age_group = age_group;
        track.is_user_corrected = true;
        Ok(())
    }

    /// 标记为误检: 立即移除并短时抑制该位置
    pub fn mark_false_positive(&mut self, id: u32) -> Result<()> {
        let idx = self
            .tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(AudienceError::UnknownTrack(id))?;
        let track = self.tracks.remove(idx);
        self.suppressed.push(Suppression {
            face: track.face,
            cycles_left: self.settings.hold_frames,
        });
        debug!("🗑️ 轨迹 #{} 被标记为误检", id);
        Ok(())
    }

    /// 清除所有误检抑制区域 (会话结束时调用, 轨迹保留)
    pub fn clear_suppressions(&mut self) {
        self.suppressed.clear();
    }
}

impl Tracker for FaceTracker {
    fn update(&mut self, detections: &[ClassifiedDetection], now: DateTime<Utc>) -> &[Track] {
        let mut claimed = vec![false; detections.len()];

        // 1. 每条轨迹贪心匹配得分最高的未认领检测
        for track_idx in 0..self.tracks.len() {
            let best = detections
                .iter()
                .enumerate()
                .filter(|(det_idx, _)| !claimed[*det_idx])
                .filter_map(|(det_idx, det)| {
                    self.match_score(&self.tracks[track_idx], det)
                        .map(|score| (det_idx, score))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1));

            match best {
                Some((det_idx, _)) => {
                    claimed[det_idx] = true;
                    self.apply_match(track_idx, &detections[det_idx], now);
                }
                None => {
                    // 2. 未匹配: 前一半保持期按速度外推
                    let hold = self.settings.hold_frames;
                    let track = &mut self.tracks[track_idx];
                    track.missed_frames += 1;
                    if track.missed_frames * 2 <= hold {
                        track.face = track
                            .face
                            .translated(0.5 * track.velocity.0, 0.5 * track.velocity.1);
                    }
                }
            }
        }

        // 3. 删除丢失太久的轨迹
        let hold = self.settings.hold_frames;
        self.tracks.retain(|t| t.missed_frames <= hold);

        // 4. 未匹配的检测 → 新建轨迹
        for (det_idx, detection) in detections.iter().enumerate() {
            if claimed[det_idx] {
                continue;
            }
            if self.is_suppressed(&detection.face) {
                debug!("🚫 检测落在误检抑制区内, 跳过 {:?}", detection.face);
                continue;
            }
            self.spawn(detection, now);
        }

        // 5. 抑制区域倒计时: 每个区域恰好拦截 hold_frames 个周期
        self.suppressed.retain_mut(|s| {
            s.cycles_left = s.cycles_left.saturating_sub(1);
            s.cycles_left > 0
        });

        &self.tracks
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.suppressed.clear();
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}
