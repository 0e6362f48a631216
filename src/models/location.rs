// src/models/location.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::common::{impl_soft_delete, Record};
use crate::error::LocationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Farm,
    Market,
    Port,
    #[default]
    Region,
    Country,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(flatten)]
    pub record: Record,
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(rename = "type", default)]
    pub location_type: LocationType,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub description: String,
}

impl_soft_delete!(Location);

/// Locations indexed by id. Parent links always form a forest; inserts that
/// would close a loop are refused.
#[derive(Debug, Default)]
pub struct LocationTree {
    nodes: HashMap<i64, Location>,
}

impl LocationTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a location. The parent, if any, must already exist
    /// and must not be the node itself or one of its descendants.
    pub fn insert(&mut self, loc: Location) -> Result<(), LocationError> {
        let id = loc.record.id;
        if let Some(parent) = loc.parent_id {
            if !self.nodes.contains_key(&parent) && parent != id {
                return Err(LocationError::UnknownParent { child: id, parent });
            }
            // Walking up from the new parent must never reach `id`.
            let mut cur = Some(parent);
            let mut steps = 0usize;
            while let Some(c) = cur {
                if c == id || steps > self.nodes.len() {
                    return Err(LocationError::Cycle(id));
                }
                cur = self.nodes.get(&c).and_then(|n| n.parent_id);
                steps += 1;
            }
        }
        self.nodes.insert(id, loc);
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<&Location> {
        self.nodes.get(&id)
    }

    /// Parents of `id`, nearest first.
    pub fn ancestors(&self, id: i64) -> Result<Vec<&Location>, LocationError> {
        let node = self.nodes.get(&id).ok_or(LocationError::NotFound(id))?;
        let mut out = Vec::new();
        let mut cur = node.parent_id;
        while let Some(p) = cur {
            let parent = self.nodes.get(&p).ok_or(LocationError::NotFound(p))?;
            out.push(parent);
            cur = parent.parent_id;
        }
        Ok(out)
    }

    pub fn children(&self, id: i64) -> Vec<&Location> {
        let mut out: Vec<&Location> = self
            .nodes
            .values()
            .filter(|n| n.parent_id == Some(id))
            .collect();
        out.sort_by_key(|n| n.record.id);
        out
    }

    /// Node name followed by every ancestor up to the root, e.g. "Lima, Peru".
    pub fn full_path(&self, id: i64) -> Result<String, LocationError> {
        let node = self.nodes.get(&id).ok_or(LocationError::NotFound(id))?;
        let mut parts = vec![node.name.as_str()];
        parts.extend(self.ancestors(id)?.into_iter().map(|l| l.name.as_str()));
        Ok(parts.join(", "))
    }
}
