// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 置信度加权投票与滞回稳定
//! Confidence-weighted votes with hysteresis: the settled label only moves
//! once enough evidence and a clear margin have accumulated

use serde::Serialize;

use super::types::{AgeGroup, Gender};

/// 改变结论所需的最少票数
pub const MIN_VOTE_TOTAL: f32 = 0.9;
/// 改变结论所需的最小领先幅度
pub const MIN_VOTE_MARGIN: f32 = 0.25;

/// 性别票
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GenderVotes {
    pub male: f32,
    pub female: f32,
}

impl GenderVotes {
    pub fn add(&mut self, gender: Gender, weight: f32) {
        match gender {
            Gender::Male => self.male += weight,
            Gender::Female => self.female += weight,
        }
    }

    pub fn merge(&mut self, other: &GenderVotes) {
        self.male += other.male;
        self.female += other.female;
    }

    pub fn total(&self) -> f32 {
        self.male + self.female
    }

    /// 票数足够且领先明显时返回胜者
    pub fn decisive(&self) -> Option<Gender> {
        if self.total() < MIN_VOTE_TOTAL || (self.female - self.male).abs() < MIN_VOTE_MARGIN {
            return None;
        }
        if self.female > self.male {
            Some(Gender::Female)
        } else {
            Some(Gender::Male)
        }
    }

    /// 不够决定性时保留之前的结论
    pub fn stabilize(&self, previous: Gender) -> Gender {
        self.decisive().unwrap_or(previous)
    }
}

/// 年龄段票
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AgeVotes {
    pub kid: f32,
    pub young: f32,
    pub adult: f32,
}

impl AgeVotes {
    pub fn add(&mut self, group: AgeGroup, weight: f32) {
        match group {
            AgeGroup::Kid => self.kid += weight,
            AgeGroup::Young => self.young += weight,
            AgeGroup::Adult => self.adult += weight,
        }
    }

    pub fn merge(&mut self, other: &AgeVotes) {
        self.kid += other.kid;
        self.young += other.young;
        self.adult += other.adult;
    }

    pub fn get(&self, group: AgeGroup) -> f32 {
        match group {
            AgeGroup::Kid => self.kid,
            AgeGroup::Young => self.young,
            AgeGroup::Adult => self.adult,
        }
    }

    pub fn total(&self) -> f32 {
        self.kid + self.young + self.adult
    }

    /// 第一名领先第二名足够多时返回第一名
    pub fn decisive(&self) -> Option<AgeGroup> {
        if self.total() < MIN_VOTE_TOTAL {
            return None;
        }
        let mut ranked = AgeGroup::ALL;
        ranked.sort_by(|a, b| self.get(*b).total_cmp(&self.get(*a)));
        let winner = ranked[0];
        let runner_up = ranked[1];
        if self.get(winner) - self.get(runner_up) < MIN_VOTE_MARGIN {
            return None;
        }
        Some(winner)
    }

    pub fn stabilize(&self, previous: AgeGroup) -> AgeGroup {
        self.decisive().unwrap_or(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_gender_needs_total_and_margin() {
        let votes = GenderVotes {
            male: 0.1,
            female: 0.6,
        };
        // 领先足够但总票数不足
        assert_eq!(votes.decisive(), None);

        let votes = GenderVotes {
            male: 0.5,
            female: 0.6,
        };
        // 总票数足够但领先不足
        assert_eq!(votes.stabilize(Gender::Male), Gender::Male);

        let votes = GenderVotes {
            male: 0.3,
            female: 0.7,
        };
        assert_eq!(votes.stabilize(Gender::Male), Gender::Female);
    }

    #[test]
    fn test_age_winner_margin() {
        let votes = AgeVotes {
            kid: 0.1,
            young: 0.6,
            adult: 0.5,
        };
        assert_eq!(votes.stabilize(AgeGroup::Adult), AgeGroup::Adult);

        let votes = AgeVotes {
            kid: 0.1,
            young: 0.9,
            adult: 0.5,
        };
        assert_eq!(votes.stabilize(AgeGroup::Adult), AgeGroup::Young);
    }

    #[test]
    fn test_hysteresis_holds_under_fuzz() {
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..200 {
            let previous = if rng.gen_bool(0.5) {
                Gender::Male
            } else {
                Gender::Female
            };
            let mut votes = GenderVotes::default();
            let mut stable = previous;
            for _ in 0..50 {
                // 每次加票后保持两边差距小于 0.25
                let w = rng.gen_range(0.0..2.0);
                votes.male += w;
                let gap = rng.gen_range(-0.249..0.249);
                votes.female = (votes.male + gap).max(0.0);
                if (votes.female - votes.male).abs() >= MIN_VOTE_MARGIN {
                    continue;
                }
                stable = votes.stabilize(stable);
                assert_eq!(stable, previous);
            }
        }
    }
}
