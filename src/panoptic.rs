// 该文件是 Quanjing （全景） 项目的一部分。
// src/panoptic.rs - 全景分割图与片段登记
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

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 未标注像素的保留编号
pub const VOID: u32 = 0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PanopticError {
  #[error("形状不匹配: 期望 {expected}, 实际 {found}")]
  ShapeMismatch { expected: Shape, found: Shape },
  #[error("无效形状: {0}")]
  InvalidShape(Shape),
  #[error("阈值 {name} 无效: {value}, 取值范围应为 [{min}, {max}]")]
  InvalidThreshold {
    name: &'static str,
    value: f32,
    min: f32,
    max: f32,
  },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {found}")]
  DataLength { expected: usize, found: usize },
  #[error("片段编号 {0} 超出可编码范围")]
  InvalidSegmentId(u32),
}

impl PanopticError {
  pub(crate) fn check_threshold(
    name: &'static str,
    value: f32,
    min: f32,
    max: f32,
  ) -> Result<f32, Self> {
    if (min..=max).contains(&value) {
      Ok(value)
    } else {
      Err(PanopticError::InvalidThreshold {
        name,
        value,
        min,
        max,
      })
    }
  }
}

/// 空间尺寸（高 × 宽）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
  pub height: usize,
  pub width: usize,
}

impl Shape {
  pub const fn new(height: usize, width: usize) -> Self {
    Self { height, width }
  }

  pub const fn area(&self) -> usize {
    self.height * self.width
  }

  pub const fn is_empty(&self) -> bool {
    self.height == 0 || self.width == 0
  }
}

impl fmt::Display for Shape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.height, self.width)
  }
}

impl FromStr for Shape {
  type Err = String;

  /// 解析 `高x宽` 形式的字符串，例如 `480x640`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (h, w) = s
      .split_once(['x', 'X'])
      .ok_or_else(|| format!("形状格式应为 高x宽: {}", s))?;
    let height = h
      .trim()
      .parse()
      .map_err(|e| format!("无效高度 '{}': {}", h, e))?;
    let width = w
      .trim()
      .parse()
      .map_err(|e| format!("无效宽度 '{}': {}", w, e))?;
    Ok(Shape::new(height, width))
  }
}

/// 全景分割图：每个像素保存一个片段编号，`VOID` 表示未标注
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanopticMap {
  shape: Shape,
  data: Box<[u32]>,
}

impl PanopticMap {
  /// 创建全部为 `VOID` 的分割图
  pub fn void(shape: Shape) -> Result<Self, PanopticError> {
    if shape.is_empty() {
      return Err(PanopticError::InvalidShape(shape));
    }
    Ok(Self {
      shape,
      data: vec![VOID; shape.area()].into_boxed_slice(),
    })
  }

  pub fn from_raw(shape: Shape, data: Vec<u32>) -> Result<Self, PanopticError> {
    if shape.is_empty() {
      return Err(PanopticError::InvalidShape(shape));
    }
    if data.len() != shape.area() {
      return Err(PanopticError::DataLength {
        expected: shape.area(),
        found: data.len(),
      });
    }
    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> Shape {
    self.shape
  }

  pub fn height(&self) -> usize {
    self.shape.height
  }

  pub fn width(&self) -> usize {
    self.shape.width
  }

  pub fn get(&self, y: usize, x: usize) -> Option<u32> {
    if y < self.shape.height && x < self.shape.width {
      Some(self.data[y * self.shape.width + x])
    } else {
      None
    }
  }

  pub fn as_slice(&self) -> &[u32] {
    &self.data
  }

  pub(crate) fn as_mut_slice(&mut self) -> &mut [u32] {
    &mut self.data
  }

  /// 各非空片段的像素数
  pub fn areas(&self) -> BTreeMap<u32, usize> {
    let mut areas = BTreeMap::new();
    for &id in self.data.iter().filter(|&&id| id != VOID) {
      *areas.entry(id).or_insert(0) += 1;
    }
    areas
  }

  pub fn labeled_pixels(&self) -> usize {
    self.data.iter().filter(|&&id| id != VOID).count()
  }

  /// 片段的外接框 `[x_min, y_min, x_max, y_max]`（含端点）
  pub fn bounding_box(&self, segment_id: u32) -> Option<[usize; 4]> {
    let mut bbox: Option<[usize; 4]> = None;
    for (idx, _) in self
      .data
      .iter()
      .enumerate()
      .filter(|&(_, &id)| id == segment_id)
    {
      let (y, x) = (idx / self.shape.width, idx % self.shape.width);
      bbox = Some(match bbox {
        None => [x, y, x, y],
        Some([x0, y0, x1, y1]) => [x0.min(x), y0.min(y), x1.max(x), y1.max(y)],
      });
    }
    bbox
  }
}

/// 片段登记信息，与全景分割图中的片段编号一一对应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
  #[serde(rename = "id")]
  pub segment_id: u32,
  pub category_id: u32,
  #[serde(rename = "isthing")]
  pub is_thing: bool,
  pub area: usize,
  /// 来源查询的置信度；合并后的 stuff 片段保存参与合并的最高置信度
  #[serde(default)]
  pub score: f32,
}

/// 一张图像的全景分割结果
#[derive(Debug, Clone, PartialEq)]
pub struct Panoptic {
  pub map: PanopticMap,
  pub segments: Box<[SegmentRecord]>,
}

impl Panoptic {
  pub fn new(map: PanopticMap, segments: Vec<SegmentRecord>) -> Self {
    Self {
      map,
      segments: segments.into_boxed_slice(),
    }
  }

  pub fn empty(shape: Shape) -> Result<Self, PanopticError> {
    Ok(Self::new(PanopticMap::void(shape)?, Vec::new()))
  }

  pub fn shape(&self) -> Shape {
    self.map.shape()
  }

  pub fn segment(&self, segment_id: u32) -> Option<&SegmentRecord> {
    self.segments.iter().find(|s| s.segment_id == segment_id)
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }
}

mod mask;
pub mod png;
mod resolver;

pub use self::mask::BinaryMask;
pub use self::resolver::{
  DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MASK_THRESHOLD, DEFAULT_OVERLAP_THRESHOLD, MaskResolver,
  MaskResolverBuilder, resolve,
};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shape_parses_and_displays() {
    let shape: Shape = "480x640".parse().unwrap();
    assert_eq!(shape, Shape::new(480, 640));
    assert_eq!(shape.to_string(), "480x640");
    assert!("480".parse::<Shape>().is_err());
    assert!("ax3".parse::<Shape>().is_err());
  }

  #[test]
  fn void_map_rejects_empty_shape() {
    assert_eq!(
      PanopticMap::void(Shape::new(0, 4)),
      Err(PanopticError::InvalidShape(Shape::new(0, 4)))
    );
  }

  #[test]
  fn areas_and_bbox() {
    let map = PanopticMap::from_raw(Shape::new(2, 3), vec![0, 1, 1, 2, 0, 1]).unwrap();
    let areas = map.areas();
    assert_eq!(areas.get(&1), Some(&3));
    assert_eq!(areas.get(&2), Some(&1));
    assert_eq!(areas.get(&VOID), None);
    assert_eq!(map.labeled_pixels(), 4);
    assert_eq!(map.bounding_box(1), Some([1, 0, 2, 1]));
    assert_eq!(map.bounding_box(7), None);
  }

  #[test]
  fn threshold_check() {
    assert!(PanopticError::check_threshold("t", 0.5, 0.0, 1.0).is_ok());
    assert!(PanopticError::check_threshold("t", 1.5, 0.0, 1.0).is_err());
    assert!(PanopticError::check_threshold("t", f32::NAN, 0.0, 1.0).is_err());
  }
}
