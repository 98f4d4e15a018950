//! Append-only audit trail, one entry per executed stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;

use crate::types::RunId;
use crate::NpvValidatorResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: RunId,
    /// Position in execution order, from 1
    pub sequence: usize,
    pub stage: String,
    pub status: StageStatus,
    pub metrics: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    run_id: RunId,
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            entries: Vec::new(),
        }
    }

    pub fn append(
        &mut self,
        stage: &str,
        status: StageStatus,
        metrics: BTreeMap<String, Value>,
        notes: Vec<String>,
    ) -> &AuditEntry {
        let entry = AuditEntry {
            run_id: self.run_id.clone(),
            sequence: self.entries.len() + 1,
            stage: stage.to_string(),
            status,
            metrics,
            notes,
            timestamp: Utc::now(),
        };
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.entries.last()
    }

    /// One JSON object per line.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> NpvValidatorResult<()> {
        for entry in &self.entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}
