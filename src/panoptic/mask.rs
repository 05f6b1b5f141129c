// 该文件是 Quanjing （全景） 项目的一部分。
// src/panoptic/mask.rs - 掩码二值化与缩放
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

use image::{GrayImage, ImageBuffer, Luma, imageops::FilterType};

use crate::{model::SoftMask, panoptic::Shape};

const FOREGROUND: u8 = u8::MAX;
const BACKGROUND: u8 = 0;

/// 二值掩码，行优先存储
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
  shape: Shape,
  pixels: Box<[bool]>,
  count: usize,
}

impl BinaryMask {
  /// 以 `threshold` 二值化软掩码（`p >= threshold` 为前景），
  /// 尺寸不同时以最近邻插值缩放到 `target`
  pub fn from_soft(mask: &SoftMask, threshold: f32, target: Shape) -> Self {
    let native = mask.shape();
    let values = mask.as_slice();

    if native == target {
      let pixels: Box<[bool]> = values.iter().map(|&p| p >= threshold).collect();
      return Self::from_pixels(target, pixels);
    }

    let image: GrayImage = ImageBuffer::from_fn(native.width as u32, native.height as u32, |x, y| {
      let p = values[y as usize * native.width + x as usize];
      Luma([if p >= threshold { FOREGROUND } else { BACKGROUND }])
    });
    let resized = image::imageops::resize(
      &image,
      target.width as u32,
      target.height as u32,
      FilterType::Nearest,
    );
    let pixels: Box<[bool]> = resized.pixels().map(|p| p[0] != BACKGROUND).collect();

    Self::from_pixels(target, pixels)
  }

  fn from_pixels(shape: Shape, pixels: Box<[bool]>) -> Self {
    let count = pixels.iter().filter(|&&p| p).count();
    Self {
      shape,
      pixels,
      count,
    }
  }

  pub fn shape(&self) -> Shape {
    self.shape
  }

  /// 前景像素数
  pub fn count(&self) -> usize {
    self.count
  }

  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  pub fn contains(&self, y: usize, x: usize) -> bool {
    y < self.shape.height && x < self.shape.width && self.pixels[y * self.shape.width + x]
  }

  /// 前景像素的行优先下标
  pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
    self
      .pixels
      .iter()
      .enumerate()
      .filter_map(|(idx, &p)| p.then_some(idx))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn binarize_at_threshold() {
    let soft = SoftMask::new(Shape::new(1, 4), vec![0.2, 0.5, 0.49, 0.9]).unwrap();
    let mask = BinaryMask::from_soft(&soft, 0.5, Shape::new(1, 4));
    assert_eq!(mask.count(), 2);
    assert_eq!(mask.indices().collect::<Vec<_>>(), vec![1, 3]);
  }

  #[test]
  fn upscale_keeps_layout() {
    // 左半为前景的 2x2 掩码放大到 4x4
    let soft = SoftMask::new(Shape::new(2, 2), vec![1.0, 0.0, 1.0, 0.0]).unwrap();
    let mask = BinaryMask::from_soft(&soft, 0.5, Shape::new(4, 4));
    assert_eq!(mask.shape(), Shape::new(4, 4));
    assert_eq!(mask.count(), 8);
    for y in 0..4 {
      assert!(mask.contains(y, 0));
      assert!(mask.contains(y, 1));
      assert!(!mask.contains(y, 2));
      assert!(!mask.contains(y, 3));
    }
  }

  #[test]
  fn downscale_full_mask() {
    let soft = SoftMask::filled(Shape::new(8, 6), 0.8);
    let mask = BinaryMask::from_soft(&soft, 0.5, Shape::new(4, 3));
    assert_eq!(mask.count(), 12);
  }
}
