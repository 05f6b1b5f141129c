// 该文件是 Quanjing （全景） 项目的一部分。
// src/taxonomy.rs - 类别元数据
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

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod coco;
pub use self::coco::{COCO_PANOPTIC_CATEGORIES, CocoPanoptic};

/// 类别元数据：区分可数的 thing 与不可数的 stuff
pub trait Taxonomy {
  fn is_thing(&self, category_id: u32) -> bool;

  fn label(&self, category_id: u32) -> Option<&str>;

  fn color(&self, _category_id: u32) -> Option<[u8; 3]> {
    None
  }
}

impl<T: Taxonomy + ?Sized> Taxonomy for &T {
  fn is_thing(&self, category_id: u32) -> bool {
    (**self).is_thing(category_id)
  }

  fn label(&self, category_id: u32) -> Option<&str> {
    (**self).label(category_id)
  }

  fn color(&self, category_id: u32) -> Option<[u8; 3]> {
    (**self).color(category_id)
  }
}

#[derive(Error, Debug)]
pub enum TaxonomyError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("类别编号重复: {0}")]
  DuplicateCategory(u32),
}

/// COCO 全景标注中 `categories` 数组的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: u32,
  pub name: String,
  #[serde(rename = "isthing", with = "int_bool")]
  pub is_thing: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub color: Option<[u8; 3]>,
}

/// 从 JSON 加载的类别表，未登记的编号视为 stuff
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
  categories: BTreeMap<u32, Category>,
}

impl FromUrlWithScheme for CategoryTable {
  const SCHEME: &'static str = "categories";
}

impl FromUrl for CategoryTable {
  type Error = TaxonomyError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TaxonomyError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Self::open(url.path())
  }
}

impl CategoryTable {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TaxonomyError> {
    info!("加载类别文件: {}", path.as_ref().display());
    let content = std::fs::read_to_string(path)?;
    Self::from_json(&content)
  }

  pub fn from_json(content: &str) -> Result<Self, TaxonomyError> {
    let categories: Vec<Category> = serde_json::from_str(content)?;
    Self::from_categories(categories)
  }

  pub fn from_categories(categories: Vec<Category>) -> Result<Self, TaxonomyError> {
    let mut table = BTreeMap::new();
    for category in categories {
      let id = category.id;
      if table.insert(id, category).is_some() {
        return Err(TaxonomyError::DuplicateCategory(id));
      }
    }
    Ok(Self { categories: table })
  }

  /// 内置 COCO 全景类别
  pub fn coco_panoptic() -> Self {
    let categories = COCO_PANOPTIC_CATEGORIES
      .iter()
      .map(|&(id, name, is_thing)| {
        (
          id,
          Category {
            id,
            name: name.to_string(),
            is_thing,
            color: None,
          },
        )
      })
      .collect();
    Self { categories }
  }

  pub fn get(&self, category_id: u32) -> Option<&Category> {
    self.categories.get(&category_id)
  }

  pub fn len(&self) -> usize {
    self.categories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.categories.is_empty()
  }
}

impl Taxonomy for CategoryTable {
  fn is_thing(&self, category_id: u32) -> bool {
    self.get(category_id).is_some_and(|c| c.is_thing)
  }

  fn label(&self, category_id: u32) -> Option<&str> {
    self.get(category_id).map(|c| c.name.as_str())
  }

  fn color(&self, category_id: u32) -> Option<[u8; 3]> {
    self.get(category_id).and_then(|c| c.color)
  }
}

// COCO 标注以 0/1 表示布尔值
mod int_bool {
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrBool {
      Int(u8),
      Bool(bool),
    }

    Ok(match IntOrBool::deserialize(deserializer)? {
      IntOrBool::Int(v) => v != 0,
      IntOrBool::Bool(v) => v,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const CATEGORIES: &str = r#"[
    {"id": 1, "name": "person", "isthing": 1, "color": [220, 20, 60]},
    {"id": 7, "name": "sky", "isthing": 0},
    {"id": 9, "name": "road", "isthing": false}
  ]"#;

  #[test]
  fn load_from_json() {
    let table = CategoryTable::from_json(CATEGORIES).unwrap();
    assert_eq!(table.len(), 3);
    assert!(table.is_thing(1));
    assert!(!table.is_thing(7));
    assert!(!table.is_thing(9));
    assert!(!table.is_thing(42));
    assert_eq!(table.label(7), Some("sky"));
    assert_eq!(table.color(1), Some([220, 20, 60]));
    assert_eq!(table.color(7), None);
  }

  #[test]
  fn duplicate_ids_are_rejected() {
    let json = r#"[{"id": 1, "name": "a", "isthing": 1}, {"id": 1, "name": "b", "isthing": 0}]"#;
    assert!(matches!(
      CategoryTable::from_json(json),
      Err(TaxonomyError::DuplicateCategory(1))
    ));
  }

  #[test]
  fn coco_table_agrees_with_builtin() {
    let table = CategoryTable::coco_panoptic();
    for &(id, name, thing) in COCO_PANOPTIC_CATEGORIES.iter() {
      assert_eq!(table.is_thing(id), thing);
      assert_eq!(table.label(id), CocoPanoptic.label(id));
      assert_eq!(table.label(id), Some(name));
    }
  }

  #[test]
  fn from_url_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("categories.json");
    std::fs::write(&path, CATEGORIES).unwrap();
    let url = Url::parse(&format!("categories://{}", path.display())).unwrap();
    let table = CategoryTable::from_url(&url).unwrap();
    assert_eq!(table.len(), 3);
  }
}
