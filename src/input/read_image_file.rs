// 该文件是 Quanjing （全景） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, panoptic::Shape};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("无效的画布尺寸: {0}")]
  InvalidShape(Shape),
}

/// 单张图像输入，迭代一次后结束
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url.path();
    info!("读取图像文件: {}", path);
    let image = ImageReader::open(path)?.decode()?;

    Ok(ImageFileInput {
      image: Some(image.into_rgb8()),
    })
  }
}

impl ImageFileInput {
  /// 没有原图时使用的黑色画布
  pub fn blank(shape: Shape) -> Result<Self, ImageFileInputError> {
    if shape.is_empty() {
      return Err(ImageFileInputError::InvalidShape(shape));
    }
    Ok(ImageFileInput {
      image: Some(RgbImage::new(shape.width as u32, shape.height as u32)),
    })
  }

  pub fn from_image(image: RgbImage) -> Self {
    ImageFileInput { image: Some(image) }
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::FrameShape;

  #[test]
  fn blank_frame_rejects_empty_shape() {
    let err = ImageFileInput::blank(Shape::new(0, 5)).err().unwrap();
    assert_eq!(err.to_string(), "无效的画布尺寸: 0x5");
  }

  #[test]
  fn blank_frame_has_shape() {
    let mut input = ImageFileInput::blank(Shape::new(3, 5)).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.frame_shape(), Shape::new(3, 5));
    assert!(input.next().is_none());
  }

  #[test]
  fn reads_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    RgbImage::from_pixel(4, 2, image::Rgb([10, 20, 30]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let frame = ImageFileInput::from_url(&url).unwrap().next().unwrap();
    assert_eq!(frame.frame_shape(), Shape::new(2, 4));
    assert_eq!(frame.get_pixel(1, 1).0, [10, 20, 30]);
  }
}
