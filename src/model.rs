// 该文件是 Quanjing （全景） 项目的一部分。
// src/model.rs - 上游模型边界
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

use serde::{Deserialize, Serialize};

use crate::panoptic::{PanopticError, Shape};

/// 上游推理模型，对外部检测/分割后端的抽象
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 单个查询的软掩码，行优先存储，取值范围 [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftMask {
  height: usize,
  width: usize,
  data: Box<[f32]>,
}

impl SoftMask {
  pub fn new(shape: Shape, data: Vec<f32>) -> Result<Self, PanopticError> {
    if data.len() != shape.area() {
      return Err(PanopticError::DataLength {
        expected: shape.area(),
        found: data.len(),
      });
    }

    Ok(Self {
      height: shape.height,
      width: shape.width,
      data: data.into_boxed_slice(),
    })
  }

  /// 由掩码 logits 经 sigmoid 得到概率掩码
  pub fn from_logits(shape: Shape, logits: &[f32]) -> Result<Self, PanopticError> {
    Self::new(shape, logits.iter().map(|&x| sigmoid(x)).collect())
  }

  /// 以常数填充的掩码
  pub fn filled(shape: Shape, value: f32) -> Self {
    Self {
      height: shape.height,
      width: shape.width,
      data: vec![value; shape.area()].into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> Shape {
    Shape::new(self.height, self.width)
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn get(&self, y: usize, x: usize) -> Option<f32> {
    if y < self.height && x < self.width {
      Some(self.data[y * self.width + x])
    } else {
      None
    }
  }

  /// 反序列化后校验数据长度与形状一致
  pub fn validate(&self) -> Result<(), PanopticError> {
    let expected = self.height * self.width;
    if self.data.len() != expected {
      return Err(PanopticError::DataLength {
        expected,
        found: self.data.len(),
      });
    }
    Ok(())
  }
}

/// 单个类别预测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
  pub category_id: u32,
  pub confidence: f32,
}

/// 单个查询槽位的原始输出
///
/// `class_scores` 的最后一项为保留的“无目标”类别，其余下标即类别编号。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
  pub class_scores: Box<[f32]>,
  pub mask: SoftMask,
}

impl RawDetection {
  pub fn new(class_scores: Vec<f32>, mask: SoftMask) -> Self {
    Self {
      class_scores: class_scores.into_boxed_slice(),
      mask,
    }
  }

  /// 由分类 logits 与掩码 logits 构造，分类经 softmax、掩码经 sigmoid
  pub fn from_logits(
    class_logits: &[f32],
    mask_shape: Shape,
    mask_logits: &[f32],
  ) -> Result<Self, PanopticError> {
    Ok(Self::new(
      softmax(class_logits),
      SoftMask::from_logits(mask_shape, mask_logits)?,
    ))
  }

  pub fn no_object_index(&self) -> Option<usize> {
    self.class_scores.len().checked_sub(1)
  }

  /// 在全部类别（含无目标）上取最大值；若最大值落在无目标类别上则返回 None
  pub fn prediction(&self) -> Option<Prediction> {
    let no_object = self.no_object_index()?;
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (idx, &score) in self.class_scores.iter().enumerate() {
      if score > best_score {
        best_score = score;
        best = idx;
      }
    }

    if best == no_object {
      return None;
    }

    Some(Prediction {
      category_id: best as u32,
      confidence: best_score,
    })
  }
}

pub(crate) fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

mod detection_file;
pub use self::detection_file::{DetectionFile, DetectionFileError};
