// 该文件是 Quanjing （全景） 项目的一部分。
// src/metric.rs - 全景质量 (PQ) 评估
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

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::panoptic::{Panoptic, PanopticError, SegmentRecord, VOID};

mod quality;
pub use self::quality::{AggregateQuality, ClassQuality, PqStat, QualityReport, Scope};

pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// 一对匹配的片段
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentMatch {
  pub predicted_id: u32,
  pub ground_truth_id: u32,
  pub iou: f64,
}

/// 单个类别的匹配结果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchResult {
  pub category_id: u32,
  pub is_thing: bool,
  pub matches: Vec<SegmentMatch>,
  pub unmatched_predicted: Vec<u32>,
  pub unmatched_ground_truth: Vec<u32>,
}

impl MatchResult {
  fn new(category_id: u32, is_thing: bool) -> Self {
    Self {
      category_id,
      is_thing,
      ..Default::default()
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct PanopticMetricBuilder {
  match_threshold: f32,
  void_aware: bool,
}

impl Default for PanopticMetricBuilder {
  fn default() -> Self {
    Self {
      match_threshold: DEFAULT_MATCH_THRESHOLD,
      void_aware: false,
    }
  }
}

impl PanopticMetricBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// IoU 严格大于该值才算匹配；低于 0.5 时匹配不再唯一，因此不允许
  pub fn match_threshold(mut self, threshold: f32) -> Self {
    self.match_threshold = threshold;
    self
  }

  /// 开启后，并集中扣除落在真值空白区域的预测像素，
  /// 且超过一半像素落在空白区域的未匹配预测片段不计为 FP
  pub fn void_aware(mut self, void_aware: bool) -> Self {
    self.void_aware = void_aware;
    self
  }

  pub fn build(self) -> Result<PanopticMetric, PanopticError> {
    let match_threshold =
      PanopticError::check_threshold("match_threshold", self.match_threshold, 0.5, 1.0)?;
    Ok(PanopticMetric {
      match_threshold: match_threshold as f64,
      void_aware: self.void_aware,
    })
  }
}

/// 比较预测与真值全景分割图，计算 PQ/SQ/RQ
#[derive(Debug, Clone, Copy)]
pub struct PanopticMetric {
  match_threshold: f64,
  void_aware: bool,
}

impl Default for PanopticMetric {
  fn default() -> Self {
    Self {
      match_threshold: DEFAULT_MATCH_THRESHOLD as f64,
      void_aware: false,
    }
  }
}

// 在分割图中有像素且已登记的片段
fn present_segments<'a>(
  panoptic: &'a Panoptic,
  areas: &HashMap<u32, usize>,
) -> HashMap<u32, &'a SegmentRecord> {
  panoptic
    .segments
    .iter()
    .filter(|s| s.segment_id != VOID && areas.get(&s.segment_id).is_some_and(|&a| a > 0))
    .map(|s| (s.segment_id, s))
    .collect()
}

fn warn_unregistered(
  side: &str,
  areas: &HashMap<u32, usize>,
  records: &HashMap<u32, &SegmentRecord>,
) {
  for id in areas.keys().filter(|id| **id != VOID && !records.contains_key(id)) {
    warn!("{}分割图中的片段 {} 未登记，按空白处理", side, id);
  }
}

impl PanopticMetric {
  pub fn match_threshold(&self) -> f64 {
    self.match_threshold
  }

  pub fn is_void_aware(&self) -> bool {
    self.void_aware
  }

  /// 按类别匹配预测片段与真值片段
  pub fn match_segments(
    &self,
    predicted: &Panoptic,
    ground_truth: &Panoptic,
  ) -> Result<BTreeMap<u32, MatchResult>, PanopticError> {
    if predicted.shape() != ground_truth.shape() {
      return Err(PanopticError::ShapeMismatch {
        expected: ground_truth.shape(),
        found: predicted.shape(),
      });
    }

    // 稀疏统计 (预测编号, 真值编号) 的交集像素数
    let mut intersections: HashMap<(u32, u32), usize> = HashMap::new();
    let mut pred_areas: HashMap<u32, usize> = HashMap::new();
    let mut gt_areas: HashMap<u32, usize> = HashMap::new();
    for (&p, &g) in predicted
      .map
      .as_slice()
      .iter()
      .zip(ground_truth.map.as_slice())
    {
      *intersections.entry((p, g)).or_insert(0) += 1;
      *pred_areas.entry(p).or_insert(0) += 1;
      *gt_areas.entry(g).or_insert(0) += 1;
    }

    let pred_records = present_segments(predicted, &pred_areas);
    let gt_records = present_segments(ground_truth, &gt_areas);
    warn_unregistered("预测", &pred_areas, &pred_records);
    warn_unregistered("真值", &gt_areas, &gt_records);

    // 预测片段落在真值空白区域的像素数
    let mut pred_on_void: HashMap<u32, usize> = HashMap::new();
    for (&(p, g), &count) in &intersections {
      if p != VOID && !gt_records.contains_key(&g) {
        *pred_on_void.entry(p).or_insert(0) += count;
      }
    }

    let mut results: BTreeMap<u32, MatchResult> = BTreeMap::new();
    for record in gt_records.values().chain(pred_records.values()) {
      results
        .entry(record.category_id)
        .or_insert_with(|| MatchResult::new(record.category_id, record.is_thing));
    }
    // 真值的 thing/stuff 标记优先
    for record in gt_records.values() {
      if let Some(result) = results.get_mut(&record.category_id) {
        result.is_thing = record.is_thing;
      }
    }

    let mut matched_pred = BTreeSet::new();
    let mut matched_gt = BTreeSet::new();
    for (&(p, g), &intersection) in &intersections {
      let (Some(pred), Some(gt)) = (pred_records.get(&p), gt_records.get(&g)) else {
        continue;
      };
      if pred.category_id != gt.category_id {
        continue;
      }

      let mut union = pred_areas[&p] + gt_areas[&g] - intersection;
      if self.void_aware {
        union -= pred_on_void.get(&p).copied().unwrap_or(0);
      }
      let iou = intersection as f64 / union as f64;
      if iou > self.match_threshold {
        matched_pred.insert(p);
        matched_gt.insert(g);
        if let Some(result) = results.get_mut(&gt.category_id) {
          result.matches.push(SegmentMatch {
            predicted_id: p,
            ground_truth_id: g,
            iou,
          });
        }
      }
    }

    for (&id, record) in &gt_records {
      if !matched_gt.contains(&id)
        && let Some(result) = results.get_mut(&record.category_id)
      {
        result.unmatched_ground_truth.push(id);
      }
    }

    for (&id, record) in &pred_records {
      if matched_pred.contains(&id) {
        continue;
      }
      if self.void_aware {
        let on_void = pred_on_void.get(&id).copied().unwrap_or(0);
        if on_void * 2 > pred_areas[&id] {
          debug!("预测片段 {} 超过一半落在空白区域，不计为 FP", id);
          continue;
        }
      }
      if let Some(result) = results.get_mut(&record.category_id) {
        result.unmatched_predicted.push(id);
      }
    }

    for result in results.values_mut() {
      result.matches.sort_by_key(|m| m.ground_truth_id);
      result.unmatched_predicted.sort_unstable();
      result.unmatched_ground_truth.sort_unstable();
    }

    Ok(results)
  }

  /// 评估一对全景分割结果
  pub fn evaluate(
    &self,
    predicted: &Panoptic,
    ground_truth: &Panoptic,
  ) -> Result<QualityReport, PanopticError> {
    let mut stat = PqStat::default();
    stat.add(&self.match_segments(predicted, ground_truth)?);
    Ok(stat.report())
  }
}

/// 以默认配置评估一对全景分割结果
pub fn evaluate(
  predicted: &Panoptic,
  ground_truth: &Panoptic,
) -> Result<QualityReport, PanopticError> {
  PanopticMetric::default().evaluate(predicted, ground_truth)
}
