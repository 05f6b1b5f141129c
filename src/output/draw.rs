// 该文件是 Quanjing （全景） 项目的一部分。
// src/output/draw.rs - 全景分割结果可视化
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

use std::collections::BTreeMap;

use image::{Rgb, RgbImage, imageops::FilterType};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use tracing::debug;

use crate::{
  panoptic::{Panoptic, SegmentRecord, VOID},
  taxonomy::{CategoryTable, Taxonomy},
};

pub const DEFAULT_ALPHA: f32 = 0.6;
const OUTLINE_THICKNESS: u32 = 2;
// 同类 thing 实例之间的颜色抖动幅度
const JITTER: i16 = 24;

pub struct Draw {
  alpha: f32,
  outline_things: bool,
  categories: CategoryTable,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      alpha: DEFAULT_ALPHA,
      outline_things: true,
      categories: CategoryTable::coco_panoptic(),
    }
  }
}

impl Draw {
  /// 叠加透明度，截断到 [0, 1]
  pub fn with_alpha(mut self, alpha: f32) -> Self {
    self.alpha = alpha.clamp(0.0, 1.0);
    self
  }

  pub fn with_outline(mut self, outline_things: bool) -> Self {
    self.outline_things = outline_things;
    self
  }

  pub fn with_categories(mut self, categories: CategoryTable) -> Self {
    self.categories = categories;
    self
  }

  pub fn alpha(&self) -> f32 {
    self.alpha
  }

  /// 片段颜色：优先使用类别表中的颜色，thing 实例在类别颜色上按编号抖动
  pub fn segment_color(&self, segment: &SegmentRecord) -> [u8; 3] {
    let base = self
      .categories
      .color(segment.category_id)
      .unwrap_or_else(|| palette(segment.category_id));
    if !segment.is_thing {
      return base;
    }

    let mut color = base;
    for (c, channel) in color.iter_mut().enumerate() {
      let seed = segment.segment_id.wrapping_mul(37).wrapping_add(c as u32 * 17);
      let offset = (seed % (2 * JITTER as u32 + 1)) as i16 - JITTER;
      *channel = (*channel as i16 + offset).clamp(0, 255) as u8;
    }
    color
  }

  fn colors(&self, panoptic: &Panoptic) -> BTreeMap<u32, [u8; 3]> {
    panoptic
      .segments
      .iter()
      .map(|s| (s.segment_id, self.segment_color(s)))
      .collect()
  }

  /// 仅绘制分割图本身，VOID 像素为黑色
  pub fn colorize(&self, panoptic: &Panoptic) -> RgbImage {
    let colors = self.colors(panoptic);
    let map = &panoptic.map;
    RgbImage::from_fn(map.width() as u32, map.height() as u32, |x, y| {
      let id = map.get(y as usize, x as usize).unwrap_or(VOID);
      Rgb(colors.get(&id).copied().unwrap_or([0, 0, 0]))
    })
  }

  /// 将分割结果半透明叠加到原图上，尺寸不一致时先把原图缩放到分割图尺寸
  pub fn draw_panoptic(&self, frame: &RgbImage, panoptic: &Panoptic) -> RgbImage {
    let map = &panoptic.map;
    let (w, h) = (map.width() as u32, map.height() as u32);
    let mut image = if frame.dimensions() == (w, h) {
      frame.clone()
    } else {
      debug!(
        "原图尺寸 {}x{} 与分割图 {} 不一致，缩放原图",
        frame.height(),
        frame.width(),
        map.shape()
      );
      image::imageops::resize(frame, w, h, FilterType::Triangle)
    };

    let colors = self.colors(panoptic);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
      let id = map.get(y as usize, x as usize).unwrap_or(VOID);
      if let Some(color) = colors.get(&id) {
        for c in 0..3 {
          let blended = (1.0 - self.alpha) * pixel.0[c] as f32 + self.alpha * color[c] as f32;
          pixel.0[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
      }
    }

    if self.outline_things {
      for segment in panoptic.segments.iter().filter(|s| s.is_thing) {
        let Some([x0, y0, x1, y1]) = map.bounding_box(segment.segment_id) else {
          continue;
        };
        let color = Rgb(colors[&segment.segment_id]);
        let (bw, bh) = ((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
        for t in 0..OUTLINE_THICKNESS.min(bw.div_ceil(2)).min(bh.div_ceil(2)) {
          let rect = Rect::at((x0 as u32 + t) as i32, (y0 as u32 + t) as i32)
            .of_size(bw - 2 * t, bh - 2 * t);
          draw_hollow_rect_mut(&mut image, rect, color);
        }
      }
    }

    image
  }
}

/// 按黄金分割角在色环上取色，保证相邻编号颜色差异明显
pub fn palette(seed: u32) -> [u8; 3] {
  let hue = (seed as f32 * 0.618_034).fract() * 6.0;
  let (s, v) = (0.65_f32, 0.95_f32);
  let chroma = v * s;
  let x = chroma * (1.0 - (hue % 2.0 - 1.0).abs());
  let m = v - chroma;
  let (r, g, b) = match hue as u32 {
    0 => (chroma, x, 0.0),
    1 => (x, chroma, 0.0),
    2 => (0.0, chroma, x),
    3 => (0.0, x, chroma),
    4 => (x, 0.0, chroma),
    _ => (chroma, 0.0, x),
  };
  [r, g, b].map(|c| ((c + m) * 255.0).round() as u8)
}
