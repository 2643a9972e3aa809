use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque BV-BRC genome identifier. The API treats these as strings
/// (e.g. "83332.12"); no shape is assumed here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenomeId(String);

impl GenomeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GenomeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One row of the genome metadata lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeSummary {
    pub genome_id: GenomeId,
    pub genome_name: String,
}

/// The caller's full genome set in presentation order: sorted by display
/// name, ties broken by genome id. Every genome from the job input is
/// present, including genomes the metadata lookup did not know (their name
/// is empty, which sorts them first).
#[derive(Debug, Clone)]
pub struct GenomeDirectory {
    ordered: Vec<GenomeSummary>,
}

impl GenomeDirectory {
    pub fn new(input_ids: &[GenomeId], metadata: Vec<GenomeSummary>) -> Self {
        let names: BTreeMap<GenomeId, String> = metadata
            .into_iter()
            .map(|entry| (entry.genome_id, entry.genome_name))
            .collect();
        let mut ordered: Vec<GenomeSummary> = input_ids
            .iter()
            .map(|id| GenomeSummary {
                genome_id: id.clone(),
                genome_name: names.get(id).cloned().unwrap_or_default(),
            })
            .collect();
        ordered.sort_by(|a, b| {
            (a.genome_name.as_str(), a.genome_id.as_str())
                .cmp(&(b.genome_name.as_str(), b.genome_id.as_str()))
        });
        Self { ordered }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &GenomeId> {
        self.ordered.iter().map(|entry| &entry.genome_id)
    }

    /// Encodes per-genome occurrence counts as one two-hex-digit token per
    /// genome in directory order. A genome with no occurrences encodes as
    /// "00". Counts wrap at 256: values 256 apart share a token, a known
    /// collision of the fixed-width format.
    pub fn encode_presence(&self, counts: &BTreeMap<GenomeId, u64>) -> String {
        use std::fmt::Write;

        let mut encoded = String::with_capacity(self.ordered.len() * 2);
        for entry in &self.ordered {
            let count = counts.get(&entry.genome_id).copied().unwrap_or(0);
            let _ = write!(encoded, "{:02x}", count & 0xff);
        }
        encoded
    }

    /// Splits the directory into the ids/names actually covered by a
    /// domain, preserving directory order.
    pub fn covered(&self, present: &BTreeSet<GenomeId>) -> (Vec<GenomeId>, Vec<String>) {
        let mut ids = Vec::new();
        let mut names = Vec::new();
        for entry in &self.ordered {
            if present.contains(&entry.genome_id) {
                ids.push(entry.genome_id.clone());
                names.push(entry.genome_name.clone());
            }
        }
        (ids, names)
    }
}

/// Result of one domain run. `NoData` (the stream produced zero records)
/// is a distinct outcome from a run that covered only part of the genome
/// set, and from a run that failed outright.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DomainOutcome {
    Complete { genomes: Vec<GenomeId> },
    NoData,
    Failed { message: String },
}

impl DomainOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, DomainOutcome::Complete { .. })
    }
}
