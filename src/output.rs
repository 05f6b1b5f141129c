// 该文件是 Quanjing （全景） 项目的一部分。
// src/output.rs - 输出定义
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

#[cfg(any(feature = "save_image_file", feature = "panoptic_file"))]
use crate::FromUrlWithScheme;
use crate::{FromUrl, panoptic::Panoptic};
use image::RgbImage;
use thiserror::Error;
use url::Url;

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

// 未配置输出时什么也不做
impl<Frame, Output, R: Render<Frame, Output>> Render<Frame, Output> for Option<R> {
  type Error = R::Error;

  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error> {
    match self {
      Some(render) => render.render_result(frame, result),
      None => Ok(()),
    }
  }
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "panoptic_file")]
mod panoptic_folder;
#[cfg(feature = "panoptic_file")]
pub use self::panoptic_folder::PanopticFolderOutput;

mod report_file;
pub use self::report_file::{ReportFileError, ReportFileOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "panoptic_file")]
  #[error("全景样本目录错误: {0}")]
  PanopticFolderError(#[from] crate::input::PanopticFolderError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "panoptic_file")]
  PanopticFolderOutput(PanopticFolderOutput),
}

impl OutputWrapper {
  /// 可视化输出使用的类别表（颜色与 thing/stuff 信息）
  pub fn with_categories(self, categories: crate::taxonomy::CategoryTable) -> Self {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => {
        OutputWrapper::SaveImageFileOutput(output.with_categories(categories))
      }
      #[allow(unreachable_patterns)]
      other => {
        let _ = categories;
        other
      }
    }
  }
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "panoptic_file")]
      PanopticFolderOutput::SCHEME => {
        let output = PanopticFolderOutput::from_url(url)?;
        Ok(OutputWrapper::PanopticFolderOutput(output))
      }
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl Render<RgbImage, Panoptic> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &Panoptic) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "panoptic_file")]
      OutputWrapper::PanopticFolderOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[allow(unreachable_patterns)]
      _ => {
        let _ = (frame, result);
        Ok(())
      }
    }
  }
}
