// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 多轮检测结果合并 (去重)
//! Greedy score-ordered suppression across detection passes

use super::types::RawCandidate;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.55;
pub const DEFAULT_CONTAINMENT_THRESHOLD: f32 = 0.85;

/// 按分数降序贪心去重: 与已保留框 IoU 过高或被其包含的候选框被丢弃
pub fn merge(
    mut candidates: Vec<RawCandidate>,
    iou_threshold: f32,
    containment_threshold: f32,
) -> Vec<RawCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut current_index = 0;
    for index in 0..candidates.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let kept = &candidates[prev_index].face;
            let face = &candidates[index].face;
            if face.iou(kept) >= iou_threshold || face.containment_in(kept) >= containment_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            candidates.swap(current_index, index);
            current_index += 1;
        }
    }
    candidates.truncate(current_index);
    candidates
}

/// 把新一轮的候选框并入已有结果
pub fn merge_into(existing: &mut Vec<RawCandidate>, incoming: Vec<RawCandidate>) -> usize {
    let before = existing.len();
    let mut all = std::mem::take(existing);
    all.extend(incoming);
    *existing = merge(all, DEFAULT_IOU_THRESHOLD, DEFAULT_CONTAINMENT_THRESHOLD);
    existing.len().saturating_sub(before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{DetectorSource, FaceBox};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn candidate(x: f32, y: f32, w: f32, h: f32, score: f32, pass_id: u8) -> RawCandidate {
        RawCandidate {
            face: FaceBox::new(x, y, w, h),
            score,
            pass_id,
            source: DetectorSource::Tiny,
        }
    }

    fn random_box(rng: &mut StdRng) -> FaceBox {
        FaceBox::new(
            rng.gen_range(0.0..500.0),
            rng.gen_range(0.0..400.0),
            rng.gen_range(5.0..120.0),
            rng.gen_range(5.0..120.0),
        )
    }

    #[test]
    fn test_iou_properties() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let a = random_box(&mut rng);
            let b = random_box(&mut rng);
            assert!((a.iou(&a) - 1.0).abs() < 1e-5);
            assert!((a.iou(&b) - b.iou(&a)).abs() < 1e-6);
            let iou = a.iou(&b);
            assert!((0.0..=1.0).contains(&iou));
        }
    }

    #[test]
    fn test_highest_score_survives() {
        let merged = merge(
            vec![
                candidate(100.0, 100.0, 50.0, 60.0, 0.4, 1),
                candidate(102.0, 101.0, 50.0, 60.0, 0.8, 2),
                candidate(300.0, 100.0, 50.0, 60.0, 0.5, 1),
            ],
            DEFAULT_IOU_THRESHOLD,
            DEFAULT_CONTAINMENT_THRESHOLD,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].score, 0.8);
        assert_eq!(merged[0].pass_id, 2);
    }

    #[test]
    fn test_contained_box_dropped() {
        // 小框完全落在大框里, IoU 很低但包含度为 1
        let merged = merge(
            vec![
                candidate(100.0, 100.0, 100.0, 120.0, 0.9, 1),
                candidate(120.0, 120.0, 30.0, 30.0, 0.6, 1),
            ],
            DEFAULT_IOU_THRESHOLD,
            DEFAULT_CONTAINMENT_THRESHOLD,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, 0.9);
    }

    #[test]
    fn test_merge_idempotent() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let candidates: Vec<_> = (0..20)
                .map(|_| {
                    let b = random_box(&mut rng);
                    candidate(b.x, b.y, b.width, b.height, rng.gen_range(0.0..1.0), 1)
                })
                .collect();
            let once = merge(candidates, DEFAULT_IOU_THRESHOLD, DEFAULT_CONTAINMENT_THRESHOLD);
            let twice = merge(once.clone(), DEFAULT_IOU_THRESHOLD, DEFAULT_CONTAINMENT_THRESHOLD);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_merge_into_counts_new_faces() {
        let mut existing = vec![candidate(100.0, 100.0, 50.0, 60.0, 0.7, 1)];
        let added = merge_into(
            &mut existing,
            vec![
                candidate(101.0, 100.0, 50.0, 60.0, 0.5, 2),
                candidate(400.0, 100.0, 50.0, 60.0, 0.5, 2),
            ],
        );
        assert_eq!(added, 1);
        assert_eq!(existing.len(), 2);
    }
}
