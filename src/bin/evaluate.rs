// 该文件是 Quanjing （全景） 项目的一部分。
// src/bin/evaluate.rs - 全景质量评估
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
use tracing::info;
use url::Url;

use quanjing::{
  FromUrl, PanopticMetricBuilder,
  input::PanopticFolderInput,
  metric::DEFAULT_MATCH_THRESHOLD,
  output::ReportFileOutput,
  task::{BatchEvaluationTask, Task},
};

/// Quanjing 评估参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 真值样本目录，例如 folder:///data/gt
  #[arg(long, value_name = "GROUND_TRUTH")]
  pub ground_truth: Url,
  /// 预测样本目录，例如 folder:///data/pred
  #[arg(long, value_name = "PREDICTION")]
  pub prediction: Url,
  /// 评估报告输出，例如 report:///data/report.json
  #[arg(long, value_name = "REPORT")]
  pub report: Option<Url>,
  /// 匹配 IoU 阈值 (0.5 - 1.0)
  #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD, value_name = "THRESHOLD")]
  pub match_threshold: f32,
  /// 排除落在真值 VOID 区域上的预测像素
  #[arg(long)]
  pub void_aware: bool,
  /// 最大评估样本数
  #[arg(long, value_name = "COUNT")]
  pub max_samples: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("真值目录: {}", args.ground_truth);
  info!("预测目录: {}", args.prediction);

  let ground_truth = PanopticFolderInput::from_url(&args.ground_truth)?;
  let prediction = PanopticFolderInput::from_url(&args.prediction)?;
  let report_output = args
    .report
    .as_ref()
    .map(ReportFileOutput::from_url)
    .transpose()?;

  let metric = PanopticMetricBuilder::new()
    .match_threshold(args.match_threshold)
    .void_aware(args.void_aware)
    .build()?;

  let report = BatchEvaluationTask::new(metric)
    .with_limit(args.max_samples)
    .run_task(ground_truth, prediction, report_output)?;

  for line in report.to_string().lines() {
    info!("{}", line);
  }

  Ok(())
}
