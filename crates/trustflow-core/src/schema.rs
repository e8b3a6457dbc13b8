//! Relation schemas with per-column trust sets. Pure data; no values here.
//!
//! A column's trust set lists the parties allowed to see its raw values. A
//! relation is *stored with* the parties that hold (shares of) it; that set
//! decides whether it lives in the clear or secret-shared.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::PartyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float64,
    Utf8,
}

impl DataType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Boolean" | "BOOLEAN" | "bool" => Some(DataType::Boolean),
            "Int32" | "i32" => Some(DataType::Int32),
            "Int64" | "INTEGER" | "i64" => Some(DataType::Int64),
            "Float64" | "FLOAT" | "f64" => Some(DataType::Float64),
            "Utf8" | "STRING" | "str" => Some(DataType::Utf8),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    /// Parties allowed to see raw values of this column.
    #[serde(default)]
    pub trust: BTreeSet<PartyId>,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        data_type: DataType,
        trust: impl IntoIterator<Item = PartyId>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            trust: trust.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Unique within a workflow.
    pub name: String,
    pub columns: Vec<Column>,
    /// Parties holding this relation (in the clear if one, as shares if many).
    pub stored_with: BTreeSet<PartyId>,
    /// Explicit visibility for released results; overrides column trust.
    #[serde(default)]
    pub visible_to: Option<BTreeSet<PartyId>>,
}

impl Relation {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<Column>,
        stored_with: impl IntoIterator<Item = PartyId>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            stored_with: stored_with.into_iter().collect(),
            visible_to: None,
        }
    }

    /// Parties allowed to see the whole relation unencrypted.
    ///
    /// Intersection of the column trust sets unless the relation is an
    /// explicit result, in which case the override wins.
    pub fn visibility(&self) -> BTreeSet<PartyId> {
        if let Some(explicit) = &self.visible_to {
            return explicit.clone();
        }
        let mut cols = self.columns.iter();
        let Some(first) = cols.next() else {
            return BTreeSet::new();
        };
        cols.fold(first.trust.clone(), |acc, c| {
            acc.intersection(&c.trust).copied().collect()
        })
    }

    /// True when the relation is held by more than one party.
    pub fn is_shared(&self) -> bool {
        self.stored_with.len() > 1
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}
