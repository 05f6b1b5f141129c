// 该文件是 Quanjing （全景） 项目的一部分。
// src/panoptic/png.rs - COCO 全景格式的片段编号编码
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

//! 片段编号按 `id = R + 256 * G + 256 * 256 * B` 存放在 RGB 图像中。

use image::{ImageBuffer, Rgb, RgbImage};

use crate::panoptic::{PanopticError, PanopticMap, Shape};

/// 可编码的最大片段编号
pub const MAX_SEGMENT_ID: u32 = 0x00FF_FFFF;

pub fn id_to_rgb(id: u32) -> [u8; 3] {
  [
    (id & 0xFF) as u8,
    ((id >> 8) & 0xFF) as u8,
    ((id >> 16) & 0xFF) as u8,
  ]
}

pub fn rgb_to_id(rgb: [u8; 3]) -> u32 {
  rgb[0] as u32 + 256 * rgb[1] as u32 + 256 * 256 * rgb[2] as u32
}

/// 编号超过 `MAX_SEGMENT_ID` 时无法无损编码，返回 `InvalidSegmentId`
pub fn encode(map: &PanopticMap) -> Result<RgbImage, PanopticError> {
  let width = map.width();
  let data = map.as_slice();
  if let Some(&id) = data.iter().find(|&&id| id > MAX_SEGMENT_ID) {
    return Err(PanopticError::InvalidSegmentId(id));
  }
  Ok(ImageBuffer::from_fn(
    map.width() as u32,
    map.height() as u32,
    |x, y| Rgb(id_to_rgb(data[y as usize * width + x as usize])),
  ))
}

pub fn decode(image: &RgbImage) -> Result<PanopticMap, PanopticError> {
  let shape = Shape::new(image.height() as usize, image.width() as usize);
  let data = image.pixels().map(|p| rgb_to_id(p.0)).collect();
  PanopticMap::from_raw(shape, data)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn id_color_mapping() {
    assert_eq!(id_to_rgb(0), [0, 0, 0]);
    assert_eq!(id_to_rgb(258), [2, 1, 0]);
    assert_eq!(rgb_to_id([2, 1, 0]), 258);
    assert_eq!(rgb_to_id(id_to_rgb(MAX_SEGMENT_ID)), MAX_SEGMENT_ID);
  }

  #[test]
  fn decode_encoded_map() {
    let map = PanopticMap::from_raw(Shape::new(2, 2), vec![0, 1, 300, 70000]).unwrap();
    assert_eq!(decode(&encode(&map).unwrap()).unwrap(), map);
  }

  #[test]
  fn ids_beyond_24_bits_are_rejected() {
    let map = PanopticMap::from_raw(Shape::new(1, 2), vec![1, MAX_SEGMENT_ID + 2]).unwrap();
    assert_eq!(
      encode(&map).unwrap_err(),
      PanopticError::InvalidSegmentId(MAX_SEGMENT_ID + 2)
    );
  }
}
