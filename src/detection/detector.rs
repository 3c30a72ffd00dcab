// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 人脸检测器 (Face Detector)
//! 职责: 多轮检测 → 过滤 → 属性分类 → 偏差校正 → ClassifiedDetection

use tracing::{debug, warn};

use super::bias;
use super::filter::DetectionFilter;
use super::gateway::ModelGateway;
use super::orchestrator::{Orchestrator, PassCounters};
use super::types::{AgeGroup, ClassifiedDetection, Frame, RawCandidate};
use crate::config::{AudienceConfig, SourceKind};
use crate::pipeline::CancelToken;
use crate::utils::enhancer::crop_region;

/// 单帧检测结果
#[derive(Debug, Clone, Default)]
pub struct DetectionOutcome {
    pub detections: Vec<ClassifiedDetection>,
    pub counters: PassCounters,
    /// 通过过滤的候选数
    pub filtered_count: usize,
    /// 分类失败被丢弃的数量
    pub classify_failures: usize,
}

pub struct FaceDetector {
    orchestrator: Orchestrator,
    filter: DetectionFilter,
    female_boost_factor: f32,
    enable_hair_heuristics: bool,
}

impl FaceDetector {
    pub fn from_config(config: &AudienceConfig) -> Self {
        Self {
            orchestrator: Orchestrator::from_config(config),
            filter: DetectionFilter::new(
                config.hard_min_face_score,
                config.filter.clone(),
                config.require_face_texture,
            ),
            female_boost_factor: config.female_boost_factor,
            enable_hair_heuristics: config.enable_hair_heuristics,
        }
    }

    /// 处理单帧检测 (在检测线程中执行)
    pub fn detect(
        &self,
        gateway: &dyn ModelGateway,
        frame: &Frame,
        source: SourceKind,
        cancel: &CancelToken,
    ) -> DetectionOutcome {
        // 1. 多轮检测 + 合并
        let output = self.orchestrator.run(gateway, &frame.image, source, cancel);

        // 2. 过滤
        let accepted: Vec<RawCandidate> = output
            .candidates
            .into_iter()
            .filter(|c| match self.filter.accepts(c, &frame.image) {
                Ok(()) => true,
                Err(reason) => {
                    debug!("🚫 丢弃候选框 {:?}: {:?}", c.face, reason);
                    false
                }
            })
            .collect();
        let filtered_count = accepted.len();

        // 3. 分类 + 偏差校正
        let mut detections = Vec::with_capacity(accepted.len());
        let mut classify_failures = 0;
        for candidate in accepted {
            if cancel.is_cancelled() {
                break;
            }
            match self.classify(gateway, frame, &candidate) {
                Some(detection) => detections.push(detection),
                None => classify_failures += 1,
            }
        }

        DetectionOutcome {
            detections,
            counters: output.counters,
            filtered_count,
            classify_failures,
        }
    }

    fn classify(
        &self,
        gateway: &dyn ModelGateway,
        frame: &Frame,
        candidate: &RawCandidate,
    ) -> Option<ClassifiedDetection> {
        let crop = crop_region(&frame.image, &candidate.face)?;
        let attributes = match gateway.classify(&crop) {
            Ok(a) => a,
            Err(e) => {
                warn!("⚠️ 属性分类失败: {}", e);
                return None;
            }
        };

        let raw_confidence = attributes.gender_probability.clamp(0.0, 1.0);
        let hair = if self.enable_hair_heuristics {
            bias::hair_score(&frame.image, &candidate.face)
        } else {
            0.0
        };
        let (gender, gender_confidence) =
            bias::correct(attributes.gender, raw_confidence, self.female_boost_factor, hair);

        Some(ClassifiedDetection {
            face: candidate.face,
            gender,
            age_group: AgeGroup::from_age(attributes.age),
            gender_confidence,
            raw_gender_confidence: raw_confidence,
            detection_score: candidate.score,
        })
    }
}
