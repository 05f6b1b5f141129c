// 该文件是 Quanjing （全景） 项目的一部分。
// src/panoptic/resolver.rs - 掩码到全景分割图的解析
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::HashMap;

use tracing::debug;

use crate::{
  model::RawDetection,
  panoptic::{BinaryMask, Panoptic, PanopticError, PanopticMap, SegmentRecord, Shape, VOID},
  taxonomy::Taxonomy,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.85;
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.8;
pub const DEFAULT_MASK_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct MaskResolverBuilder {
  confidence_threshold: f32,
  overlap_threshold: f32,
  mask_threshold: f32,
}

impl Default for MaskResolverBuilder {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
      mask_threshold: DEFAULT_MASK_THRESHOLD,
    }
  }
}

impl MaskResolverBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 低于该置信度的检测直接丢弃
  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  /// 片段被更高置信度片段遮挡后，剩余面积占原面积的最低比例
  pub fn overlap_threshold(mut self, threshold: f32) -> Self {
    self.overlap_threshold = threshold;
    self
  }

  /// 软掩码二值化阈值
  pub fn mask_threshold(mut self, threshold: f32) -> Self {
    self.mask_threshold = threshold;
    self
  }

  pub fn build<T: Taxonomy>(self, taxonomy: T) -> Result<MaskResolver<T>, PanopticError> {
    let confidence_threshold =
      PanopticError::check_threshold("confidence_threshold", self.confidence_threshold, 0.0, 1.0)?;
    let overlap_threshold =
      PanopticError::check_threshold("overlap_threshold", self.overlap_threshold, 0.0, 1.0)?;
    let mask_threshold =
      PanopticError::check_threshold("mask_threshold", self.mask_threshold, 0.0, 1.0)?;

    Ok(MaskResolver {
      confidence_threshold,
      overlap_threshold,
      mask_threshold,
      taxonomy,
    })
  }
}

/// 将每个查询的软掩码按置信度依次认领像素，得到互不重叠的全景分割图
#[derive(Debug, Clone)]
pub struct MaskResolver<T> {
  confidence_threshold: f32,
  overlap_threshold: f32,
  mask_threshold: f32,
  taxonomy: T,
}

struct Candidate {
  query: usize,
  category_id: u32,
  confidence: f32,
  mask: BinaryMask,
}

impl<T: Taxonomy> MaskResolver<T> {
  pub fn taxonomy(&self) -> &T {
    &self.taxonomy
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn overlap_threshold(&self) -> f32 {
    self.overlap_threshold
  }

  pub fn resolve(
    &self,
    detections: &[RawDetection],
    target: Shape,
  ) -> Result<Panoptic, PanopticError> {
    if target.is_empty() {
      return Err(PanopticError::InvalidShape(target));
    }

    let Some(first) = detections.first() else {
      debug!("无检测输入，返回空分割图");
      return Panoptic::empty(target);
    };

    for det in detections {
      det.mask.validate()?;
    }
    let native = first.mask.shape();
    if let Some(det) = detections.iter().find(|d| d.mask.shape() != native) {
      return Err(PanopticError::ShapeMismatch {
        expected: native,
        found: det.mask.shape(),
      });
    }
    if native.is_empty() {
      return Err(PanopticError::InvalidShape(native));
    }

    let mut candidates = self.candidates(detections, target);
    // 稳定排序，置信度相同时保持查询顺序
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut map = PanopticMap::void(target)?;
    let mut segments: Vec<SegmentRecord> = Vec::new();
    let mut stuff_segments: HashMap<u32, usize> = HashMap::new();
    let mut remaining: Vec<usize> = Vec::new();

    for candidate in candidates {
      let claimed = map.as_slice();
      remaining.clear();
      remaining.extend(candidate.mask.indices().filter(|&idx| claimed[idx] == VOID));

      let retained = remaining.len() as f32 / candidate.mask.count() as f32;
      if remaining.is_empty() || retained < self.overlap_threshold {
        debug!(
          "查询 {} (类别 {}, 置信度 {:.3}) 剩余面积比例 {:.3} 低于 {:.3}，丢弃",
          candidate.query,
          candidate.category_id,
          candidate.confidence,
          retained,
          self.overlap_threshold
        );
        continue;
      }

      let is_thing = self.taxonomy.is_thing(candidate.category_id);
      let index = match stuff_segments.get(&candidate.category_id) {
        Some(&index) if !is_thing => index,
        _ => {
          segments.push(SegmentRecord {
            segment_id: segments.len() as u32 + 1,
            category_id: candidate.category_id,
            is_thing,
            area: 0,
            score: candidate.confidence,
          });
          if !is_thing {
            stuff_segments.insert(candidate.category_id, segments.len() - 1);
          }
          segments.len() - 1
        }
      };

      let segment = &mut segments[index];
      segment.area += remaining.len();
      let segment_id = segment.segment_id;
      let pixels = map.as_mut_slice();
      for &idx in &remaining {
        pixels[idx] = segment_id;
      }
    }

    debug!(
      "解析得到 {} 个片段，已标注像素 {}/{}",
      segments.len(),
      map.labeled_pixels(),
      target.area()
    );

    Ok(Panoptic::new(map, segments))
  }

  fn candidates(&self, detections: &[RawDetection], target: Shape) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(detections.len());
    for (query, det) in detections.iter().enumerate() {
      let Some(prediction) = det.prediction() else {
        debug!("查询 {} 预测为无目标，丢弃", query);
        continue;
      };
      if prediction.confidence < self.confidence_threshold {
        debug!(
          "查询 {} 置信度 {:.3} 低于阈值 {:.3}，丢弃",
          query, prediction.confidence, self.confidence_threshold
        );
        continue;
      }

      let mask = BinaryMask::from_soft(&det.mask, self.mask_threshold, target);
      if mask.is_empty() {
        debug!("查询 {} 的二值掩码为空，丢弃", query);
        continue;
      }

      candidates.push(Candidate {
        query,
        category_id: prediction.category_id,
        confidence: prediction.confidence,
        mask,
      });
    }
    candidates
  }
}

/// 以默认掩码阈值解析一张图像的检测结果
pub fn resolve<T: Taxonomy>(
  detections: &[RawDetection],
  confidence_threshold: f32,
  overlap_retention_threshold: f32,
  target_shape: Shape,
  taxonomy: T,
) -> Result<Panoptic, PanopticError> {
  MaskResolverBuilder::new()
    .confidence_threshold(confidence_threshold)
    .overlap_threshold(overlap_retention_threshold)
    .build(taxonomy)?
    .resolve(detections, target_shape)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{model::SoftMask, taxonomy::CocoPanoptic};

  const CAT: usize = 17;
  const DOG: usize = 18;
  const SKY: usize = 187;
  const NUM_CLASSES: usize = 201;

  fn scores(class: usize, confidence: f32) -> Vec<f32> {
    let mut scores = vec![0.0; NUM_CLASSES + 1];
    scores[class] = confidence;
    scores[NUM_CLASSES] = 1.0 - confidence;
    scores
  }

  fn rect_mask(shape: Shape, y0: usize, x0: usize, h: usize, w: usize) -> SoftMask {
    let mut data = vec![0.0; shape.area()];
    for y in y0..y0 + h {
      for x in x0..x0 + w {
        data[y * shape.width + x] = 1.0;
      }
    }
    SoftMask::new(shape, data).unwrap()
  }

  fn detection(class: usize, confidence: f32, mask: SoftMask) -> RawDetection {
    RawDetection::new(scores(class, confidence), mask)
  }

  #[test]
  fn single_full_mask() {
    let shape = Shape::new(4, 4);
    let dets = vec![detection(CAT, 0.9, SoftMask::filled(shape, 1.0))];
    let out = resolve(&dets, 0.85, 0.8, shape, CocoPanoptic).unwrap();

    assert!(out.map.as_slice().iter().all(|&id| id == 1));
    assert_eq!(out.segments.len(), 1);
    let seg = &out.segments[0];
    assert_eq!(seg.segment_id, 1);
    assert_eq!(seg.category_id, CAT as u32);
    assert!(seg.is_thing);
    assert_eq!(seg.area, 16);
  }

  #[test]
  fn subsumed_detection_is_discarded() {
    let shape = Shape::new(4, 4);
    let dets = vec![
      detection(CAT, 0.80, rect_mask(shape, 0, 0, 2, 2)),
      detection(CAT, 0.95, rect_mask(shape, 0, 0, 3, 3)),
    ];
    let out = resolve(&dets, 0.5, 0.5, shape, CocoPanoptic).unwrap();

    assert_eq!(out.segments.len(), 1);
    assert_eq!(out.segments[0].area, 9);
    assert!((out.segments[0].score - 0.95).abs() < 1e-6);
    assert_eq!(out.map.labeled_pixels(), 9);
  }

  #[test]
  fn partially_occluded_detection_keeps_remainder() {
    let shape = Shape::new(4, 4);
    let dets = vec![
      detection(CAT, 0.95, rect_mask(shape, 0, 0, 4, 1)),
      detection(DOG, 0.90, rect_mask(shape, 0, 0, 4, 4)),
    ];
    let out = resolve(&dets, 0.5, 0.5, shape, CocoPanoptic).unwrap();

    assert_eq!(out.segments.len(), 2);
    assert_eq!(out.segments[0].area, 4);
    assert_eq!(out.segments[1].area, 12);
    assert_eq!(out.map.get(0, 0), Some(1));
    assert_eq!(out.map.get(0, 1), Some(2));
  }

  #[test]
  fn no_object_is_discarded() {
    let shape = Shape::new(2, 2);
    let mut class_scores = vec![0.0; NUM_CLASSES + 1];
    class_scores[NUM_CLASSES] = 0.99;
    class_scores[CAT] = 0.01;
    let dets = vec![RawDetection::new(class_scores, SoftMask::filled(shape, 1.0))];
    let out = resolve(&dets, 0.0, 0.0, shape, CocoPanoptic).unwrap();

    assert!(out.is_empty());
    assert_eq!(out.map.labeled_pixels(), 0);
  }

  #[test]
  fn low_confidence_is_discarded() {
    let shape = Shape::new(2, 2);
    let dets = vec![detection(CAT, 0.6, SoftMask::filled(shape, 1.0))];
    let out = resolve(&dets, 0.85, 0.8, shape, CocoPanoptic).unwrap();
    assert!(out.is_empty());
  }

  #[test]
  fn stuff_of_one_category_is_merged() {
    let shape = Shape::new(2, 4);
    let dets = vec![
      detection(SKY, 0.9, rect_mask(shape, 0, 0, 2, 1)),
      detection(CAT, 0.95, rect_mask(shape, 0, 1, 2, 2)),
      detection(SKY, 0.88, rect_mask(shape, 0, 3, 2, 1)),
    ];
    let out = resolve(&dets, 0.5, 0.5, shape, CocoPanoptic).unwrap();

    assert_eq!(out.segments.len(), 2);
    let cat = &out.segments[0];
    let sky = &out.segments[1];
    assert!(cat.is_thing);
    assert!(!sky.is_thing);
    assert_eq!(sky.area, 4);
    assert!((sky.score - 0.9).abs() < 1e-6);
    assert_eq!(out.map.get(0, 0), Some(sky.segment_id));
    assert_eq!(out.map.get(1, 3), Some(sky.segment_id));
  }

  #[test]
  fn things_of_one_category_stay_separate() {
    let shape = Shape::new(2, 4);
    let dets = vec![
      detection(CAT, 0.9, rect_mask(shape, 0, 0, 2, 2)),
      detection(CAT, 0.9, rect_mask(shape, 0, 2, 2, 2)),
    ];
    let out = resolve(&dets, 0.5, 0.5, shape, CocoPanoptic).unwrap();
    assert_eq!(out.segments.len(), 2);
    // 置信度相同时保持查询顺序
    assert_eq!(out.map.get(0, 0), Some(1));
    assert_eq!(out.map.get(0, 3), Some(2));
  }

  #[test]
  fn masks_are_resized_to_target() {
    let native = Shape::new(2, 2);
    let target = Shape::new(4, 6);
    let dets = vec![detection(CAT, 0.9, rect_mask(native, 0, 0, 1, 2))];
    let out = resolve(&dets, 0.5, 0.5, target, CocoPanoptic).unwrap();
    assert_eq!(out.shape(), target);
    assert_eq!(out.segments[0].area, 12);
    assert_eq!(out.map.get(1, 5), Some(1));
    assert_eq!(out.map.get(2, 0), Some(VOID));
  }

  #[test]
  fn empty_input_gives_void_map() {
    let out = resolve(&[], 0.85, 0.8, Shape::new(3, 3), CocoPanoptic).unwrap();
    assert!(out.is_empty());
    assert_eq!(out.map.labeled_pixels(), 0);
    assert_eq!(out.shape(), Shape::new(3, 3));
  }

  #[test]
  fn errors() {
    let dets = vec![
      detection(CAT, 0.9, SoftMask::filled(Shape::new(2, 2), 1.0)),
      detection(CAT, 0.9, SoftMask::filled(Shape::new(3, 2), 1.0)),
    ];
    assert_eq!(
      resolve(&dets, 0.5, 0.5, Shape::new(2, 2), CocoPanoptic).unwrap_err(),
      PanopticError::ShapeMismatch {
        expected: Shape::new(2, 2),
        found: Shape::new(3, 2),
      }
    );
    assert_eq!(
      resolve(&dets, 0.5, 0.5, Shape::new(0, 2), CocoPanoptic).unwrap_err(),
      PanopticError::InvalidShape(Shape::new(0, 2))
    );
    assert!(matches!(
      resolve(&dets, 1.5, 0.5, Shape::new(2, 2), CocoPanoptic),
      Err(PanopticError::InvalidThreshold {
        name: "confidence_threshold",
        ..
      })
    ));
    assert!(matches!(
      resolve(&dets, 0.5, -0.1, Shape::new(2, 2), CocoPanoptic),
      Err(PanopticError::InvalidThreshold {
        name: "overlap_threshold",
        ..
      })
    ));
    assert!(matches!(
      MaskResolverBuilder::new()
        .mask_threshold(1.5)
        .build(CocoPanoptic),
      Err(PanopticError::InvalidThreshold {
        name: "mask_threshold",
        ..
      })
    ));
  }

  #[test]
  fn deserialized_mask_with_short_data_is_rejected() {
    let json = format!(
      r#"{{"class_scores": {:?}, "mask": {{"height": 2, "width": 2, "data": [1.0, 1.0, 1.0]}}}}"#,
      scores(CAT, 0.9)
    );
    let det: RawDetection = serde_json::from_str(&json).unwrap();
    assert_eq!(
      resolve(&[det], 0.5, 0.5, Shape::new(4, 4), CocoPanoptic).unwrap_err(),
      PanopticError::DataLength {
        expected: 4,
        found: 3,
      }
    );
  }
}
