// 该文件是 Quanjing （全景） 项目的一部分。
// src/model/detection_file.rs - 从文件回放上游模型输出
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, RawDetection},
  panoptic::PanopticError,
};

#[derive(Error, Debug)]
pub enum DetectionFileError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: String, found: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("检测 {index} 的掩码无效: {source}")]
  InvalidMask { index: usize, source: PanopticError },
}

/// 预先导出的检测结果 JSON，作为上游模型回放
///
/// 文件格式为 `RawDetection` 数组。推理时忽略输入，每次返回相同的检测集合。
#[derive(Debug, Clone)]
pub struct DetectionFile<Frame> {
  detections: Box<[RawDetection]>,
  _phantom: std::marker::PhantomData<Frame>,
}

impl<Frame> FromUrlWithScheme for DetectionFile<Frame> {
  const SCHEME: &'static str = "detections";
}

impl<Frame> FromUrl for DetectionFile<Frame> {
  type Error = DetectionFileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectionFileError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        found: url.scheme().to_string(),
      });
    }

    Self::open(url.path())
  }
}

impl<Frame> DetectionFile<Frame> {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DetectionFileError> {
    info!("加载检测文件: {}", path.as_ref().display());
    let content = std::fs::read_to_string(path)?;
    Self::from_json(&content)
  }

  pub fn from_json(content: &str) -> Result<Self, DetectionFileError> {
    let detections: Vec<RawDetection> = serde_json::from_str(content)?;
    for (index, det) in detections.iter().enumerate() {
      det
        .mask
        .validate()
        .map_err(|source| DetectionFileError::InvalidMask { index, source })?;
    }
    debug!("检测文件包含 {} 个查询", detections.len());

    Ok(Self::from_detections(detections))
  }

  pub fn from_detections(detections: Vec<RawDetection>) -> Self {
    Self {
      detections: detections.into_boxed_slice(),
      _phantom: std::marker::PhantomData,
    }
  }

  pub fn detections(&self) -> &[RawDetection] {
    &self.detections
  }
}

impl<Frame> Model for DetectionFile<Frame> {
  type Input = Frame;
  type Output = Box<[RawDetection]>;
  type Error = DetectionFileError;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(self.detections.clone())
  }
}
