// 该文件是 Quanjing （全景） 项目的一部分。
// src/input/panoptic_folder.rs - 读取 COCO 全景格式的样本目录
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::Model,
  panoptic::{Panoptic, PanopticError, SegmentRecord, png},
};

#[derive(Error, Debug)]
pub enum PanopticFolderError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("全景分割图无效: {0}")]
  Panoptic(#[from] PanopticError),
  #[error("样本不存在: {0}")]
  MissingSample(String),
}

/// 样本 `stem` 的分割图与片段登记文件路径
pub(crate) fn sample_paths(directory: &Path, stem: &str) -> (PathBuf, PathBuf) {
  (
    directory.join(format!("{}.png", stem)),
    directory.join(format!("{}.json", stem)),
  )
}

/// 一个命名的全景分割样本
#[derive(Debug, Clone, PartialEq)]
pub struct PanopticSample {
  pub stem: String,
  pub panoptic: Panoptic,
}

/// 目录中的每个样本由 `<stem>.png`（编号按 RGB 编码）与 `<stem>.json`（片段登记）组成
pub struct PanopticFolderInput {
  directory: PathBuf,
  stems: Vec<String>,
  cursor: usize,
}

impl FromUrlWithScheme for PanopticFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for PanopticFolderInput {
  type Error = PanopticFolderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(PanopticFolderError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Self::open(url.path())
  }
}

impl PanopticFolderInput {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, PanopticFolderError> {
    let directory = directory.as_ref().to_path_buf();
    info!("打开全景样本目录: {}", directory.display());

    let mut stems = Vec::new();
    for entry in std::fs::read_dir(&directory)? {
      let path = entry?.path();
      if path.extension().is_none_or(|ext| ext != "png") {
        continue;
      }
      let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        continue;
      };
      if !path.with_extension("json").is_file() {
        warn!("样本 {} 缺少片段登记文件，跳过", stem);
        continue;
      }
      stems.push(stem.to_string());
    }
    stems.sort();
    debug!("目录中共有 {} 个样本", stems.len());

    Ok(Self {
      directory,
      stems,
      cursor: 0,
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn stems(&self) -> &[String] {
    &self.stems
  }

  pub fn contains(&self, stem: &str) -> bool {
    self.stems.binary_search_by(|s| s.as_str().cmp(stem)).is_ok()
  }

  pub fn load(&self, stem: &str) -> Result<Panoptic, PanopticFolderError> {
    if !self.contains(stem) {
      return Err(PanopticFolderError::MissingSample(stem.to_string()));
    }

    let (png_path, json_path) = sample_paths(&self.directory, stem);
    let image = image::open(&png_path)?.into_rgb8();
    let map = png::decode(&image)?;
    let segments: Vec<SegmentRecord> = serde_json::from_str(&std::fs::read_to_string(json_path)?)?;

    let areas = map.areas();
    for segment in &segments {
      let actual = areas.get(&segment.segment_id).copied().unwrap_or(0);
      if actual != segment.area {
        warn!(
          "样本 {} 的片段 {} 登记面积 {} 与实际面积 {} 不符",
          stem, segment.segment_id, segment.area, actual
        );
      }
    }

    Ok(Panoptic::new(map, segments))
  }
}

impl Iterator for PanopticFolderInput {
  type Item = Result<PanopticSample, PanopticFolderError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stem = self.stems.get(self.cursor)?.clone();
    self.cursor += 1;
    Some(self.load(&stem).map(|panoptic| PanopticSample { stem, panoptic }))
  }
}

/// 作为预测来源：按真值样本的 `stem` 取出同名预测，缺失时返回空结果
impl Model for PanopticFolderInput {
  type Input = PanopticSample;
  type Output = Panoptic;
  type Error = PanopticFolderError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if self.contains(&input.stem) {
      return self.load(&input.stem);
    }
    warn!("样本 {} 没有对应的预测，全部真值片段计为 FN", input.stem);
    Ok(Panoptic::empty(input.panoptic.shape())?)
  }
}
