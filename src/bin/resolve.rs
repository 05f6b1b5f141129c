// 该文件是 Quanjing （全景） 项目的一部分。
// src/bin/resolve.rs - 将查询掩码解析为全景分割结果
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

use anyhow::Result;
use clap::Parser;
use image::RgbImage;
use tracing::info;
use url::Url;

use quanjing::{
  FromUrl, MaskResolverBuilder,
  input::ImageFileInput,
  model::DetectionFile,
  output::OutputWrapper,
  panoptic::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MASK_THRESHOLD, DEFAULT_OVERLAP_THRESHOLD, Shape,
  },
  task::{ResolveTask, Task},
  taxonomy::CategoryTable,
};

/// Quanjing 解析参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测结果文件，例如 detections:///path/dets.json
  #[arg(long, value_name = "DETECTIONS")]
  pub detections: Url,
  /// 原图，例如 image:///path/frame.jpg；缺省时使用掩码原始尺寸的黑色画布
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<Url>,
  /// 输出：image:///out.png?alpha=0.6 或 folder:///dir?stem=name
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 类别文件，例如 categories:///path/categories.json；缺省为 COCO 全景类别
  #[arg(long, value_name = "CATEGORIES")]
  pub categories: Option<Url>,
  /// 输出分割图尺寸 高x宽，缺省为输入帧尺寸
  #[arg(long, value_name = "HxW")]
  pub target_shape: Option<Shape>,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,
  /// 遮挡后保留比例阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_OVERLAP_THRESHOLD, value_name = "THRESHOLD")]
  pub overlap: f32,
  /// 掩码二值化阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_MASK_THRESHOLD, value_name = "THRESHOLD")]
  pub mask_threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测结果: {}", args.detections);
  info!("输出路径: {}", args.output);

  let categories = match &args.categories {
    Some(url) => CategoryTable::from_url(url)?,
    None => CategoryTable::coco_panoptic(),
  };
  info!("类别数: {}", categories.len());

  let model = DetectionFile::<RgbImage>::from_url(&args.detections)?;
  let input = match &args.input {
    Some(url) => ImageFileInput::from_url(url)?,
    None => {
      let native = model
        .detections()
        .first()
        .map(|d| d.mask.shape())
        .or(args.target_shape)
        .unwrap_or(Shape::new(1, 1));
      info!("未指定原图，使用 {} 黑色画布", native);
      ImageFileInput::blank(native)?
    }
  };
  let output = OutputWrapper::from_url(&args.output)?.with_categories(categories.clone());

  let resolver = MaskResolverBuilder::new()
    .confidence_threshold(args.confidence)
    .overlap_threshold(args.overlap)
    .mask_threshold(args.mask_threshold)
    .build(categories)?;

  ResolveTask::new(resolver)
    .with_target_shape(args.target_shape)
    .run_task(input, model, output)?;

  Ok(())
}
