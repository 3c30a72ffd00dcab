// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 广告排序 (Ad Queue Scorer)
//! 按受众构成给节目单打分, 取前两名作为新的播放队列

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::types::{AgeGroup, Gender};

/// 完全匹配
const SCORE_EXACT: i32 = 10;
/// 通配符匹配
const SCORE_WILDCARD: i32 = 5;
/// 仅一项匹配
const SCORE_PARTIAL: i32 = 3;
/// 均不匹配
const SCORE_MISMATCH: i32 = -5;
/// 刚播放过
const PENALTY_REPEAT: i32 = -3;
/// 队列长度
pub const QUEUE_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetGender {
    Male,
    Female,
    All,
}

impl TargetGender {
    fn matches(self, gender: Gender) -> bool {
        match self {
            TargetGender::All => true,
            TargetGender::Male => gender == Gender::Male,
            TargetGender::Female => gender == Gender::Female,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetAge {
    Kid,
    Young,
    Adult,
    All,
}

impl TargetAge {
    fn matches(self, group: AgeGroup) -> bool {
        match self {
            TargetAge::All => true,
            TargetAge::Kid => group == AgeGroup::Kid,
            TargetAge::Young => group == AgeGroup::Young,
            TargetAge::Adult => group == AgeGroup::Adult,
        }
    }
}

/// 广告片段 (由外部节目单提供, 播放周期内不可变)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub id: String,
    pub target_gender: TargetGender,
    pub target_age: TargetAge,
    /// 时长(秒)
    pub duration: f32,
    /// 采集窗口起点(百分比), 未设置时使用全局配置
    #[serde(default)]
    pub capture_start: Option<f32>,
    #[serde(default)]
    pub capture_end: Option<f32>,
}

/// 受众构成 (各桶人数)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
    pub male: u32,
    pub female: u32,
    pub kid: u32,
    pub young: u32,
    pub adult: u32,
}

impl Demographics {
    pub fn add(&mut self, gender: Gender, age_group: AgeGroup) {
        match gender {
            Gender::Male => self.male += 1,
            Gender::Female => self.female += 1,
        }
        match age_group {
            AgeGroup::Kid => self.kid += 1,
            AgeGroup::Young => self.young += 1,
            AgeGroup::Adult => self.adult += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.male + self.female == 0
    }

    /// 平票时取男性
    pub fn dominant_gender(&self) -> Gender {
        if self.male >= self.female {
            Gender::Male
        } else {
            Gender::Female
        }
    }

    /// 先看儿童, 再看成人是否多于青年, 否则青年
    pub fn dominant_age(&self) -> AgeGroup {
        if self.kid > self.young && self.kid > self.adult {
            AgeGroup::Kid
        } else if self.adult > self.young {
            AgeGroup::Adult
        } else {
            AgeGroup::Young
        }
    }
}

/// 打分结果 (每次重排重新计算, 不持久化)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSpot {
    pub spot: Spot,
    pub score: i32,
    pub reasons: Vec<String>,
}

/// 给单个片段打分
pub fn score_spot(spot: &Spot, demographics: &Demographics, last_played: Option<&str>) -> ScoredSpot {
    let gender = demographics.dominant_gender();
    let age = demographics.dominant_age();
    let gender_ok = spot.target_gender.matches(gender);
    let age_ok = spot.target_age.matches(age);
    let wildcard = spot.target_gender == TargetGender::All || spot.target_age == TargetAge::All;

    let mut reasons = Vec::new();
    let mut score = match (gender_ok, age_ok) {
        (true, true) if !wildcard => {
            reasons.push(format!("exact match {:?}/{:?}", gender, age));
            SCORE_EXACT
        }
        (true, true) => {
            reasons.push("wildcard match".to_string());
            SCORE_WILDCARD
        }
        (true, false) => {
            reasons.push(format!("gender match {:?}", gender));
            SCORE_PARTIAL
        }
        (false, true) => {
            reasons.push(format!("age match {:?}", age));
            SCORE_PARTIAL
        }
        (false, false) => {
            reasons.push("no match".to_string());
            SCORE_MISMATCH
        }
    };

    if last_played == Some(spot.id.as_str()) {
        score += PENALTY_REPEAT;
        reasons.push("played last".to_string());
    }

    ScoredSpot {
        spot: spot.clone(),
        score,
        reasons,
    }
}

/// 排序结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueOrder {
    /// 全部片段, 按分数降序
    pub ranked: Vec<ScoredSpot>,
    /// 新的播放队列 (前两名)
    pub queue: Vec<ScoredSpot>,
}

/// 播放队列
#[derive(Debug, Clone, Default)]
pub struct AdQueue {
    catalog: Vec<Spot>,
    last_played: Option<String>,
}

impl AdQueue {
    pub fn new(catalog: Vec<Spot>) -> Self {
        Self {
            catalog,
            last_played: None,
        }
    }

    pub fn catalog(&self) -> &[Spot] {
        &self.catalog
    }

    pub fn last_played(&self) -> Option<&str> {
        self.last_played.as_deref()
    }

    /// 只记录最近一次播放
    pub fn mark_played(&mut self, id: &str) {
        self.last_played = Some(id.to_string());
    }

    /// 按受众构成重排, 分数相同时保持节目单原顺序
    pub fn reorder(&self, demographics: &Demographics) -> QueueOrder {
        let mut ranked: Vec<ScoredSpot> = self
            .catalog
            .iter()
            .map(|spot| score_spot(spot, demographics, self.last_played()))
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        let queue = ranked.iter().take(QUEUE_LEN).cloned().collect();
        debug!(
            "📺 重排 {} 个片段 | 主要受众 {:?}/{:?}",
            ranked.len(),
            demographics.dominant_gender(),
            demographics.dominant_age()
        );
        QueueOrder { ranked, queue }
    }
}
