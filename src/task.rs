// 该文件是 Quanjing （全景） 项目的一部分。
// src/task.rs - 任务流程
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
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{
  input::FrameShape,
  model::{Model, RawDetection},
  output::Render,
  panoptic::{MaskResolver, Panoptic, Shape},
  taxonomy::Taxonomy,
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

// 中断信号只能注册一次，重复注册时仅告警，返回的通道不会收到信号
fn interrupt_channel() -> Receiver<()> {
  let (tx, rx) = mpsc::channel();
  if let Err(e) = ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  }) {
    warn!("无法设置中断信号处理: {}", e);
  }
  rx
}

/// 逐帧推理并解析为全景分割结果，返回处理的帧数
pub struct ResolveTask<T> {
  resolver: MaskResolver<T>,
  target: Option<Shape>,
  frame_number: Option<usize>,
}

impl<T: Taxonomy> ResolveTask<T> {
  pub fn new(resolver: MaskResolver<T>) -> Self {
    Self {
      resolver,
      target: None,
      frame_number: None,
    }
  }

  /// 输出尺寸；未指定时使用输入帧的尺寸
  pub fn with_target_shape(mut self, target: Option<Shape>) -> Self {
    self.target = target;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F: FrameShape,
  T: Taxonomy,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = Box<[RawDetection]>, Error = ME>,
  O: Render<F, Panoptic, Error = RE>,
> Task<I, M, O> for ResolveTask<T>
{
  type Output = usize;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始解析任务...");
    let rx = interrupt_channel();

    let mut frame_index = 0;
    for frame in input {
      frame_index += 1;
      let target = self.target.unwrap_or_else(|| frame.frame_shape());
      let now = Instant::now();
      let detections = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      let panoptic = self.resolver.resolve(&detections, target)?;
      let elapsed_b = now.elapsed();
      output.render_result(&frame, &panoptic)?;
      info!(
        "第 {} 帧: {} 个查询 -> {} 个片段，耗时: {:.2?} / {:.2?} / {:.2?}",
        frame_index,
        detections.len(),
        panoptic.segments.len(),
        elapsed_a,
        elapsed_b,
        now.elapsed()
      );

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(frame_index)
  }
}

#[cfg(feature = "batch_evaluation")]
mod batch_evaluation {
  use tracing::{debug, info, warn};

  use super::{Task, interrupt_channel};
  use crate::{
    input::PanopticSample,
    metric::{PanopticMetric, PqStat, QualityReport},
    model::Model,
    output::Render,
    panoptic::Panoptic,
  };

  /// 在整个数据集上累计 PQ 统计
  ///
  /// 输入为真值样本序列，“模型”按样本给出对应的预测结果。
  #[derive(Default)]
  pub struct BatchEvaluationTask {
    metric: PanopticMetric,
    limit: Option<usize>,
  }

  impl BatchEvaluationTask {
    pub fn new(metric: PanopticMetric) -> Self {
      Self {
        metric,
        limit: None,
      }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
      self.limit = limit;
      self
    }
  }

  impl<
    IE: std::error::Error + Sync + Send + 'static,
    ME: std::error::Error + Sync + Send + 'static,
    RE: std::error::Error + Sync + Send + 'static,
    I: Iterator<Item = Result<PanopticSample, IE>>,
    M: Model<Input = PanopticSample, Output = Panoptic, Error = ME>,
    O: Render<(), QualityReport, Error = RE>,
  > Task<I, M, O> for BatchEvaluationTask
  {
    type Output = QualityReport;
    type Error = anyhow::Error;

    fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
      info!("开始评估任务...");
      let rx = interrupt_channel();

      let mut stat = PqStat::default();
      let mut count = 0;
      for sample in input {
        if self.limit.is_some_and(|n| count >= n) {
          info!("达到指定样本数 {}, 停止评估", count);
          break;
        }
        let sample = sample?;
        let predicted = model.infer(&sample)?;
        let matching = self.metric.match_segments(&predicted, &sample.panoptic)?;
        stat.add(&matching);
        count += 1;
        debug!("已评估样本 {} ({})", sample.stem, count);

        if rx.try_recv().is_ok() {
          warn!("中断信号接收，停止评估");
          break;
        }
      }

      if stat.is_empty() {
        warn!("没有可统计的片段");
      }
      let report = stat.report();
      info!(
        "共评估 {} 个样本: PQ {:.4} SQ {:.4} RQ {:.4}",
        count, report.overall.pq, report.overall.sq, report.overall.rq
      );
      output.render_result(&(), &report)?;
      Ok(report)
    }
  }
}

#[cfg(feature = "batch_evaluation")]
pub use self::batch_evaluation::BatchEvaluationTask;
