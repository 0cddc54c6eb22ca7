// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Criteria documents accepted from callers
//!
//! `repo_criteria` selects repositories for applicability regeneration;
//! unit criteria select the content copied by an association.

use depot_core::Repository;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Parsed `repo_criteria`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCriteria {
    /// `{}` or `{"filters": {}}`
    All,
    /// `{"filters": {"id": "zoo"}}` or `{"filters": {"id": {"$in": [...]}}}`
    Ids(BTreeSet<String>),
}

impl RepoCriteria {
    pub fn parse(criteria: &Value) -> Result<Self, String> {
        let Some(criteria) = criteria.as_object() else {
            return Err("repo_criteria must be an object".to_string());
        };
        if let Some(key) = criteria.keys().find(|k| k.as_str() != "filters") {
            return Err(format!("unsupported criteria key: {key}"));
        }

        let filters = match criteria.get("filters") {
            None | Some(Value::Null) => return Ok(RepoCriteria::All),
            Some(Value::Object(filters)) => filters,
            Some(_) => return Err("filters must be an object".to_string()),
        };
        if let Some(key) = filters.keys().find(|k| k.as_str() != "id") {
            return Err(format!("unsupported filter field: {key}"));
        }

        match filters.get("id") {
            None => Ok(RepoCriteria::All),
            Some(Value::String(id)) => Ok(RepoCriteria::Ids(BTreeSet::from([id.clone()]))),
            Some(Value::Object(op)) => {
                let ids = match (op.len(), op.get("$in")) {
                    (1, Some(Value::Array(ids))) => ids,
                    _ => return Err("id filter supports only $in".to_string()),
                };
                ids.iter()
                    .map(|id| {
                        id.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| "$in values must be strings".to_string())
                    })
                    .collect::<Result<BTreeSet<_>, _>>()
                    .map(RepoCriteria::Ids)
            }
            Some(_) => Err("id filter must be a string or an object".to_string()),
        }
    }

    pub fn matches(&self, repository: &Repository) -> bool {
        match self {
            RepoCriteria::All => true,
            RepoCriteria::Ids(ids) => ids.contains(&repository.id),
        }
    }

    /// Ids of the matching repositories, in catalog order
    pub fn select<'a>(&self, repositories: impl IntoIterator<Item = &'a Repository>) -> Vec<String> {
        repositories
            .into_iter()
            .filter(|r| self.matches(r))
            .map(|r| r.id.clone())
            .collect()
    }
}

/// Parsed unit association criteria
///
/// Filters are passed through to the importer untouched; only their shape
/// is checked here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitCriteria {
    pub type_ids: Vec<String>,
    pub unit_filters: Map<String, Value>,
    pub association_filters: Map<String, Value>,
    pub unit_fields: Option<Vec<String>>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

impl UnitCriteria {
    pub fn parse(criteria: &Value) -> Result<Self, String> {
        let Some(criteria) = criteria.as_object() else {
            return Err("criteria must be an object".to_string());
        };
        let mut parsed = UnitCriteria::default();
        for (key, value) in criteria {
            match key.as_str() {
                "type_ids" => parsed.type_ids = string_list(value, "type_ids")?,
                "filters" => {
                    let filters = object(value, "filters")?;
                    for (scope, filter) in filters {
                        let filter = object(filter, "filters")?.clone();
                        match scope.as_str() {
                            "unit" => parsed.unit_filters = filter,
                            "association" => parsed.association_filters = filter,
                            other => return Err(format!("unsupported filter scope: {other}")),
                        }
                    }
                }
                "fields" => {
                    let fields = object(value, "fields")?;
                    for (scope, list) in fields {
                        match scope.as_str() {
                            "unit" => parsed.unit_fields = Some(string_list(list, "fields")?),
                            "association" => {
                                string_list(list, "fields")?;
                            }
                            other => return Err(format!("unsupported fields scope: {other}")),
                        }
                    }
                }
                "limit" => parsed.limit = Some(count(value, "limit")?),
                "skip" => parsed.skip = Some(count(value, "skip")?),
                other => return Err(format!("unsupported criteria key: {other}")),
            }
        }
        Ok(parsed)
    }

    /// Normalized form handed to the importer
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if !self.type_ids.is_empty() {
            map.insert("type_ids".to_string(), self.type_ids.clone().into());
        }
        let mut filters = Map::new();
        if !self.unit_filters.is_empty() {
            filters.insert("unit".to_string(), Value::Object(self.unit_filters.clone()));
        }
        if !self.association_filters.is_empty() {
            filters.insert(
                "association".to_string(),
                Value::Object(self.association_filters.clone()),
            );
        }
        if !filters.is_empty() {
            map.insert("filters".to_string(), Value::Object(filters));
        }
        if let Some(fields) = &self.unit_fields {
            map.insert("unit_fields".to_string(), fields.clone().into());
        }
        if let Some(limit) = self.limit {
            map.insert("limit".to_string(), limit.into());
        }
        if let Some(skip) = self.skip {
            map.insert("skip".to_string(), skip.into());
        }
        map
    }
}

fn object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, String> {
    value
        .as_object()
        .ok_or_else(|| format!("{field} must be an object"))
}

fn string_list(value: &Value, field: &str) -> Result<Vec<String>, String> {
    let Some(items) = value.as_array() else {
        return Err(format!("{field} must be a list"));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("{field} values must be strings"))
        })
        .collect()
}

fn count(value: &Value, field: &str) -> Result<u64, String> {
    value
        .as_u64()
        .ok_or_else(|| format!("{field} must be a non-negative integer"))
}
