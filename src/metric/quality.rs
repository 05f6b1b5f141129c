// 该文件是 Quanjing （全景） 项目的一部分。
// src/metric/quality.rs - PQ/SQ/RQ 统计与汇总
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

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metric::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
  Things,
  Stuff,
  Overall,
}

impl Scope {
  fn includes(self, is_thing: bool) -> bool {
    match self {
      Scope::Things => is_thing,
      Scope::Stuff => !is_thing,
      Scope::Overall => true,
    }
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Scope::Things => "Things",
      Scope::Stuff => "Stuff",
      Scope::Overall => "All",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CategoryStat {
  is_thing: bool,
  tp: usize,
  fp: usize,
  fn_: usize,
  iou_sum: f64,
}

impl CategoryStat {
  fn merge(&mut self, other: &CategoryStat) {
    self.tp += other.tp;
    self.fp += other.fp;
    self.fn_ += other.fn_;
    self.iou_sum += other.iou_sum;
  }
}

/// 跨图像累计的逐类别 TP/FP/FN 与 IoU 之和
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PqStat {
  categories: BTreeMap<u32, CategoryStat>,
}

impl PqStat {
  /// 累加一张图像的匹配结果，没有任何 TP/FP/FN 的类别不计入
  pub fn add(&mut self, matching: &BTreeMap<u32, MatchResult>) {
    for (&category_id, result) in matching {
      let stat = CategoryStat {
        is_thing: result.is_thing,
        tp: result.matches.len(),
        fp: result.unmatched_predicted.len(),
        fn_: result.unmatched_ground_truth.len(),
        iou_sum: result.matches.iter().map(|m| m.iou).sum(),
      };
      if stat.tp + stat.fp + stat.fn_ == 0 {
        continue;
      }
      self
        .categories
        .entry(category_id)
        .or_insert(CategoryStat {
          is_thing: stat.is_thing,
          ..Default::default()
        })
        .merge(&stat);
    }
  }

  pub fn merge(&mut self, other: &PqStat) {
    for (&category_id, stat) in &other.categories {
      self
        .categories
        .entry(category_id)
        .or_insert(CategoryStat {
          is_thing: stat.is_thing,
          ..Default::default()
        })
        .merge(stat);
    }
  }

  pub fn is_empty(&self) -> bool {
    self.categories.is_empty()
  }

  pub fn report(&self) -> QualityReport {
    let classes: BTreeMap<u32, ClassQuality> = self
      .categories
      .iter()
      .map(|(&category_id, stat)| (category_id, ClassQuality::new(category_id, stat)))
      .collect();

    for class in classes.values() {
      debug!(
        "类别 {}: PQ {:.4} SQ {:.4} RQ {:.4} (TP {}, FP {}, FN {})",
        class.category_id, class.pq, class.sq, class.rq, class.tp, class.fp, class.fn_
      );
    }

    QualityReport {
      things: AggregateQuality::over(&classes, Scope::Things),
      stuff: AggregateQuality::over(&classes, Scope::Stuff),
      overall: AggregateQuality::over(&classes, Scope::Overall),
      classes,
    }
  }
}

/// 单个类别的质量
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassQuality {
  pub category_id: u32,
  #[serde(rename = "isthing")]
  pub is_thing: bool,
  pub pq: f64,
  pub sq: f64,
  pub rq: f64,
  pub tp: usize,
  pub fp: usize,
  #[serde(rename = "fn")]
  pub fn_: usize,
}

impl ClassQuality {
  fn new(category_id: u32, stat: &CategoryStat) -> Self {
    let sq = if stat.tp > 0 {
      stat.iou_sum / stat.tp as f64
    } else {
      0.0
    };
    let denominator = stat.tp as f64 + 0.5 * stat.fp as f64 + 0.5 * stat.fn_ as f64;
    let rq = if denominator > 0.0 {
      stat.tp as f64 / denominator
    } else {
      0.0
    };

    Self {
      category_id,
      is_thing: stat.is_thing,
      pq: sq * rq,
      sq,
      rq,
      tp: stat.tp,
      fp: stat.fp,
      fn_: stat.fn_,
    }
  }
}

/// 一组类别的平均质量
///
/// PQ 与 RQ 对所有出现过的类别求平均；SQ 只对至少有一个 TP 的类别求平均。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuality {
  pub pq: f64,
  pub sq: f64,
  pub rq: f64,
  /// 参与 PQ/RQ 平均的类别数
  #[serde(rename = "n")]
  pub classes: usize,
  /// 参与 SQ 平均的类别数
  #[serde(rename = "n_sq")]
  pub sq_classes: usize,
  pub tp: usize,
  pub fp: usize,
  #[serde(rename = "fn")]
  pub fn_: usize,
}

impl AggregateQuality {
  fn over(classes: &BTreeMap<u32, ClassQuality>, scope: Scope) -> Self {
    let mut agg = AggregateQuality::default();
    let mut sq_sum = 0.0;

    for class in classes.values().filter(|c| scope.includes(c.is_thing)) {
      agg.classes += 1;
      agg.pq += class.pq;
      agg.rq += class.rq;
      agg.tp += class.tp;
      agg.fp += class.fp;
      agg.fn_ += class.fn_;
      if class.tp > 0 {
        agg.sq_classes += 1;
        sq_sum += class.sq;
      }
    }

    if agg.classes > 0 {
      agg.pq /= agg.classes as f64;
      agg.rq /= agg.classes as f64;
    }
    if agg.sq_classes > 0 {
      agg.sq = sq_sum / agg.sq_classes as f64;
    }
    agg
  }
}

/// 评估报告：逐类别结果与 thing/stuff/总体 三个范围的汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
  pub classes: BTreeMap<u32, ClassQuality>,
  pub things: AggregateQuality,
  pub stuff: AggregateQuality,
  pub overall: AggregateQuality,
}

impl QualityReport {
  pub fn scope(&self, scope: Scope) -> &AggregateQuality {
    match scope {
      Scope::Things => &self.things,
      Scope::Stuff => &self.stuff,
      Scope::Overall => &self.overall,
    }
  }

  pub fn class(&self, category_id: u32) -> Option<&ClassQuality> {
    self.classes.get(&category_id)
  }
}

impl fmt::Display for QualityReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "{:10} | {:>6} {:>6} {:>6} {:>5}",
      "", "PQ", "SQ", "RQ", "N"
    )?;
    writeln!(f, "{}", "-".repeat(41))?;
    for scope in [Scope::Overall, Scope::Things, Scope::Stuff] {
      let agg = self.scope(scope);
      writeln!(
        f,
        "{:10} | {:6.1} {:6.1} {:6.1} {:5}",
        scope.to_string(),
        100.0 * agg.pq,
        100.0 * agg.sq,
        100.0 * agg.rq,
        agg.classes
      )?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metric::SegmentMatch;

  fn result(category_id: u32, is_thing: bool, ious: &[f64], fp: usize, fn_: usize) -> MatchResult {
    MatchResult {
      category_id,
      is_thing,
      matches: ious
        .iter()
        .enumerate()
        .map(|(i, &iou)| SegmentMatch {
          predicted_id: i as u32 + 1,
          ground_truth_id: i as u32 + 1,
          iou,
        })
        .collect(),
      unmatched_predicted: (0..fp as u32).map(|i| 100 + i).collect(),
      unmatched_ground_truth: (0..fn_ as u32).map(|i| 200 + i).collect(),
    }
  }

  fn matching(results: Vec<MatchResult>) -> BTreeMap<u32, MatchResult> {
    results.into_iter().map(|r| (r.category_id, r)).collect()
  }

  #[test]
  fn aggregates_split_by_scope() {
    let mut stat = PqStat::default();
    stat.add(&matching(vec![
      result(1, true, &[0.8, 0.6], 1, 1),
      result(2, true, &[], 1, 0),
      result(10, false, &[0.9], 0, 0),
    ]));
    let report = stat.report();

    let person = report.class(1).unwrap();
    assert!((person.sq - 0.7).abs() < 1e-12);
    assert!((person.rq - 2.0 / 3.0).abs() < 1e-12);

    assert_eq!(report.things.classes, 2);
    assert_eq!(report.things.sq_classes, 1);
    assert!((report.things.sq - 0.7).abs() < 1e-12);
    assert!((report.things.rq - (2.0 / 3.0) / 2.0).abs() < 1e-12);
    assert!((report.stuff.pq - 0.9).abs() < 1e-12);
    assert_eq!(report.overall.classes, 3);
    assert_eq!(report.overall.tp, 3);
    assert_eq!(report.overall.fp, 2);
    assert_eq!(report.overall.fn_, 1);
  }

  #[test]
  fn accumulate_and_merge_agree() {
    let a = matching(vec![result(1, true, &[0.9], 0, 1)]);
    let b = matching(vec![result(1, true, &[0.7], 1, 0), result(5, false, &[], 0, 2)]);

    let mut sequential = PqStat::default();
    sequential.add(&a);
    sequential.add(&b);

    let mut left = PqStat::default();
    left.add(&a);
    let mut right = PqStat::default();
    right.add(&b);
    left.merge(&right);

    assert_eq!(sequential, left);
    let report = sequential.report();
    let person = report.class(1).unwrap();
    assert_eq!((person.tp, person.fp, person.fn_), (2, 1, 1));
    assert!((person.sq - 0.8).abs() < 1e-12);
    assert_eq!(report.class(5).unwrap().rq, 0.0);
  }

  #[test]
  fn empty_categories_are_skipped() {
    let mut stat = PqStat::default();
    stat.add(&matching(vec![result(3, true, &[], 0, 0)]));
    assert!(stat.is_empty());
    let report = stat.report();
    assert_eq!(report.overall, AggregateQuality::default());
  }

  #[test]
  fn report_serializes_with_coco_keys() {
    let mut stat = PqStat::default();
    stat.add(&matching(vec![result(1, true, &[1.0], 0, 0)]));
    let json = serde_json::to_value(stat.report()).unwrap();
    assert_eq!(json["classes"]["1"]["fn"], 0);
    assert_eq!(json["classes"]["1"]["isthing"], true);
    assert_eq!(json["overall"]["n"], 1);
    assert_eq!(json["things"]["pq"], 1.0);
  }

  #[test]
  fn display_table() {
    let text = QualityReport::default().to_string();
    assert!(text.contains("PQ"));
    assert!(text.contains("Things"));
    assert!(text.contains("Stuff"));
  }
}
