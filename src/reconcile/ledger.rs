//! Per-run progress of composite resources
//!
//! A composite (a security group and its rules) moves
//! `Absent -> PartiallyCreated -> Ready`. The ledger lives for one run;
//! re-running after a crash re-derives progress from the platform.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::platform::ResourceKind;

/// Identity of a composite parent within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CompositeKey {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl CompositeKey {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.map(String::from),
            name: name.into(),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum CompositeState {
    Absent,
    /// Parent exists, `completed` children are in place
    PartiallyCreated { completed: usize },
    Ready,
}

impl fmt::Display for CompositeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeState::Absent => f.write_str("absent"),
            CompositeState::PartiallyCreated { completed } => {
                write!(f, "partially-created ({} children)", completed)
            }
            CompositeState::Ready => f.write_str("ready"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub state: CompositeState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ProgressLedger {
    entries: DashMap<CompositeKey, LedgerEntry>,
}

impl ProgressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; unknown composites are `Absent`
    pub fn state(&self, key: &CompositeKey) -> CompositeState {
        self.entries
            .get(key)
            .map(|e| e.state)
            .unwrap_or(CompositeState::Absent)
    }

    pub fn set(&self, key: &CompositeKey, state: CompositeState) {
        self.entries.insert(
            key.clone(),
            LedgerEntry {
                state,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn reset(&self, key: &CompositeKey) {
        self.entries.remove(key);
    }

    /// Snapshot of all entries, sorted by key
    pub fn entries(&self) -> Vec<(CompositeKey, LedgerEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
        entries
    }
}
