// 该文件是 Quanjing （全景） 项目的一部分。
// src/output/report_file.rs - 评估报告输出
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
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, metric::QualityReport, output::Render};

#[derive(Error, Debug)]
pub enum ReportFileError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// `report:///path/report.json`
pub struct ReportFileOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for ReportFileOutput {
  const SCHEME: &'static str = "report";
}

impl FromUrl for ReportFileOutput {
  type Error = ReportFileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReportFileError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(Self::new(url.path()))
  }
}

impl ReportFileOutput {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn write(&self, report: &QualityReport) -> Result<(), ReportFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&self.path, serde_json::to_string_pretty(report)?)?;
    info!("评估报告已写入: {}", self.path.display());
    Ok(())
  }
}

impl<Frame> Render<Frame, QualityReport> for ReportFileOutput {
  type Error = ReportFileError;

  fn render_result(&self, _frame: &Frame, result: &QualityReport) -> Result<(), Self::Error> {
    self.write(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metric::PqStat;

  #[test]
  fn writes_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/report.json");
    let url = Url::parse(&format!("report://{}", path.display())).unwrap();
    let output = ReportFileOutput::from_url(&url).unwrap();

    let report = PqStat::default().report();
    output.render_result(&(), &report).unwrap();

    let read: QualityReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(read, report);
  }

  #[test]
  fn scheme_mismatch() {
    let url = Url::parse("image:///tmp/report.json").unwrap();
    assert!(matches!(
      ReportFileOutput::from_url(&url),
      Err(ReportFileError::SchemeMismatch(_))
    ));
  }
}
