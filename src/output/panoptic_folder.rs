// 该文件是 Quanjing （全景） 项目的一部分。
// src/output/panoptic_folder.rs - 以 COCO 全景格式写出样本
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicUsize, Ordering},
};

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{PanopticFolderError, sample_paths},
  output::Render,
  panoptic::{Panoptic, png},
};

/// `folder:///dir?stem=name`，未给出 `stem` 时按序号命名
pub struct PanopticFolderOutput {
  directory: PathBuf,
  stem: Option<String>,
  counter: AtomicUsize,
}

impl FromUrlWithScheme for PanopticFolderOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for PanopticFolderOutput {
  type Error = PanopticFolderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(PanopticFolderError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let stem = url
      .query_pairs()
      .find(|(key, _)| key == "stem")
      .map(|(_, value)| value.into_owned());
    let mut output = Self::create(url.path())?;
    output.stem = stem;
    Ok(output)
  }
}

impl PanopticFolderOutput {
  pub fn create<P: AsRef<Path>>(directory: P) -> Result<Self, PanopticFolderError> {
    let directory = directory.as_ref().to_path_buf();
    std::fs::create_dir_all(&directory)?;
    Ok(Self {
      directory,
      stem: None,
      counter: AtomicUsize::new(0),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 写出 `<stem>.png` 与 `<stem>.json`
  pub fn save(&self, stem: &str, panoptic: &Panoptic) -> Result<(), PanopticFolderError> {
    let (png_path, json_path) = sample_paths(&self.directory, stem);
    png::encode(&panoptic.map)?.save(&png_path)?;
    std::fs::write(&json_path, serde_json::to_string_pretty(&panoptic.segments)?)?;
    info!(
      "保存全景分割样本 {} ({} 个片段) 到 {}",
      stem,
      panoptic.segments.len(),
      self.directory.display()
    );
    Ok(())
  }
}

impl<Frame> Render<Frame, Panoptic> for PanopticFolderOutput {
  type Error = PanopticFolderError;

  fn render_result(&self, _frame: &Frame, result: &Panoptic) -> Result<(), Self::Error> {
    let index = self.counter.fetch_add(1, Ordering::Relaxed);
    let stem = match &self.stem {
      Some(stem) if index == 0 => stem.clone(),
      Some(stem) => format!("{}_{:06}", stem, index),
      None => format!("{:06}", index),
    };
    self.save(&stem, result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    input::PanopticFolderInput,
    panoptic::{PanopticMap, SegmentRecord, Shape},
  };

  fn sample() -> Panoptic {
    let map = PanopticMap::from_raw(Shape::new(2, 2), vec![0, 300, 300, 300]).unwrap();
    Panoptic::new(
      map,
      vec![SegmentRecord {
        segment_id: 300,
        category_id: 184,
        is_thing: false,
        area: 3,
        score: 0.95,
      }],
    )
  }

  #[test]
  fn written_samples_can_be_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}/pred", dir.path().display())).unwrap();
    let output = PanopticFolderOutput::from_url(&url).unwrap();
    output.render_result(&(), &sample()).unwrap();
    output.render_result(&(), &sample()).unwrap();

    let input = PanopticFolderInput::open(output.directory()).unwrap();
    assert_eq!(input.stems(), ["000000".to_string(), "000001".to_string()]);
    assert_eq!(input.load("000001").unwrap(), sample());
  }

  #[test]
  fn named_stem() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}?stem=frame", dir.path().display())).unwrap();
    let output = PanopticFolderOutput::from_url(&url).unwrap();
    output.render_result(&(), &sample()).unwrap();
    output.render_result(&(), &sample()).unwrap();

    let input = PanopticFolderInput::open(dir.path()).unwrap();
    assert_eq!(input.stems(), ["frame".to_string(), "frame_000001".to_string()]);
  }

  #[test]
  fn unencodable_segment_id_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = PanopticFolderOutput::create(dir.path()).unwrap();
    let map = PanopticMap::from_raw(Shape::new(1, 2), vec![1, png::MAX_SEGMENT_ID + 2]).unwrap();
    let panoptic = Panoptic::new(map, Vec::new());

    assert!(matches!(
      output.save("big", &panoptic),
      Err(PanopticFolderError::Panoptic(
        crate::panoptic::PanopticError::InvalidSegmentId(_)
      ))
    ));
    assert!(!dir.path().join("big.png").exists());
  }
}
