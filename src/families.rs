use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bvbrc::{Collection, QueryClient};
use crate::domain::{DomainOutcome, GenomeDirectory, GenomeId};
use crate::error::CompareError;
use crate::report::write_json;
use crate::stream::{family_ref_query, feature_query, RecordStream, FAMILY_REF_CHUNK};

/// Fields every feature record must expose; absent ones are blank-filled.
pub const FEATURE_REQUIRED: &[&str] = &[
    "genome_id",
    "feature_id",
    "patric_id",
    "plfam_id",
    "pgfam_id",
    "aa_length",
    "product",
    "gene",
];

pub const FAMILY_TSV_HEADER: &str = "family_id\tfeature_count\tgenome_count\tproduct\t\
aa_length_min\taa_length_max\taa_length_mean\taa_length_std\tgenomes";

/// Derived amino-acid length statistics for one family.
#[derive(Debug, Clone, PartialEq)]
pub struct LengthStats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub std: f64,
}

impl LengthStats {
    /// Population statistics over the collected samples.
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        let first = *samples.first()?;
        let mut min = first;
        let mut max = first;
        let mut sum = 0.0f64;
        for &value in samples {
            min = min.min(value);
            max = max.max(value);
            sum += value as f64;
        }
        let mean = sum / samples.len() as f64;
        let variance = samples
            .iter()
            .map(|&value| {
                let delta = value as f64 - mean;
                delta * delta
            })
            .sum::<f64>()
            / samples.len() as f64;
        Some(Self {
            min,
            max,
            mean,
            std: variance.sqrt(),
        })
    }
}

#[derive(Debug, Default)]
struct FamilyEntry {
    aa_lengths: Vec<u64>,
    feature_count: u64,
    product: String,
    per_genome: BTreeMap<GenomeId, u64>,
}

/// Streaming accumulator for one family system (plfam or pgfam).
/// Finalization consumes the accumulator; there is no way back to the
/// accumulating state.
#[derive(Debug, Default)]
pub struct FamilyAccumulator {
    families: BTreeMap<String, FamilyEntry>,
}

impl FamilyAccumulator {
    /// Blank family ids are the valid "no family assigned" case and never
    /// create an entry.
    pub fn observe(&mut self, family_id: &str, genome_id: &GenomeId, aa_length: u64, product: &str) {
        if family_id.is_empty() {
            return;
        }
        let entry = self
            .families
            .entry(family_id.to_string())
            .or_insert_with(|| FamilyEntry {
                product: product.to_string(),
                ..FamilyEntry::default()
            });
        entry.aa_lengths.push(aa_length);
        entry.feature_count += 1;
        *entry.per_genome.entry(genome_id.clone()).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn family_ids(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    pub fn finalize(
        self,
        directory: &GenomeDirectory,
        products: &BTreeMap<String, String>,
    ) -> FamilyTable {
        let mut lines = vec![FAMILY_TSV_HEADER.to_string()];
        let mut family_genomes = BTreeMap::new();
        for (family_id, entry) in self.families {
            let Some(stats) = LengthStats::from_samples(&entry.aa_lengths) else {
                continue;
            };
            let genome_count = entry.per_genome.len();
            let product = products.get(&family_id).unwrap_or(&entry.product);
            let genomes = directory.encode_presence(&entry.per_genome);
            lines.push(format!(
                "{family_id}\t{}\t{genome_count}\t{product}\t{}\t{}\t{}\t{}\t{genomes}",
                entry.feature_count, stats.min, stats.max, stats.mean, stats.std
            ));
            let present: BTreeSet<GenomeId> = entry.per_genome.into_keys().collect();
            let (covered, _) = directory.covered(&present);
            family_genomes.insert(family_id, covered);
        }
        FamilyTable {
            tsv: lines.join("\n"),
            family_genomes,
        }
    }
}

/// Finalized output for one family system.
#[derive(Debug)]
pub struct FamilyTable {
    pub tsv: String,
    pub family_genomes: BTreeMap<String, Vec<GenomeId>>,
}

#[derive(Debug, Serialize)]
pub struct ProteinFamiliesDocument {
    pub plfam: String,
    pub pgfam: String,
    pub genome_ids: Vec<GenomeId>,
    pub genome_names: Vec<String>,
    pub job_name: String,
    pub plfam_genomes: BTreeMap<String, Vec<GenomeId>>,
    pub pgfam_genomes: BTreeMap<String, Vec<GenomeId>>,
}

pub fn run_families<C: QueryClient>(
    client: &C,
    genome_ids: &[GenomeId],
    directory: &GenomeDirectory,
    job_name: &str,
    output_dir: &Utf8Path,
) -> Result<DomainOutcome, CompareError> {
    let mut plfam = FamilyAccumulator::default();
    let mut pgfam = FamilyAccumulator::default();
    let mut present: BTreeSet<GenomeId> = BTreeSet::new();
    let mut records_seen = false;

    let stream = RecordStream::new(
        client,
        Collection::GenomeFeature,
        genome_ids,
        feature_query,
        FEATURE_REQUIRED,
    );
    for record in stream {
        let record = record?;
        records_seen = true;
        let Ok(aa_length) = record.get("aa_length").parse::<u64>() else {
            // Pseudogenes and partial annotations carry no usable length.
            debug!(feature_id = record.get("feature_id"), "no aa_length, excluded");
            continue;
        };
        let genome_id = GenomeId::from(record.get("genome_id"));
        present.insert(genome_id.clone());
        plfam.observe(record.get("plfam_id"), &genome_id, aa_length, record.get("product"));
        pgfam.observe(record.get("pgfam_id"), &genome_id, aa_length, record.get("product"));
    }

    if !records_seen {
        warn!("protein families: no feature records for any requested genome");
        return Ok(DomainOutcome::NoData);
    }

    let products = fetch_family_products(client, &plfam, &pgfam)?;
    let plfam_table = plfam.finalize(directory, &products);
    let pgfam_table = pgfam.finalize(directory, &products);
    let (covered_ids, covered_names) = directory.covered(&present);

    let document = ProteinFamiliesDocument {
        plfam: plfam_table.tsv,
        pgfam: pgfam_table.tsv,
        genome_ids: covered_ids.clone(),
        genome_names: covered_names,
        job_name: job_name.to_string(),
        plfam_genomes: plfam_table.family_genomes,
        pgfam_genomes: pgfam_table.family_genomes,
    };
    write_json(
        &output_dir.join(format!("{job_name}_proteinfams_tables.json")),
        &document,
    )?;

    info!(genomes = covered_ids.len(), "protein families complete");
    Ok(DomainOutcome::Complete {
        genomes: covered_ids,
    })
}

/// Authoritative family descriptions from the reference collection. The
/// first-seen feature product remains the fallback for ids the reference
/// does not list.
fn fetch_family_products<C: QueryClient>(
    client: &C,
    plfam: &FamilyAccumulator,
    pgfam: &FamilyAccumulator,
) -> Result<BTreeMap<String, String>, CompareError> {
    let ids: Vec<String> = plfam
        .family_ids()
        .chain(pgfam.family_ids())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut products = BTreeMap::new();
    for chunk in ids.chunks(FAMILY_REF_CHUNK) {
        let query = family_ref_query(chunk);
        for row in client.fetch_records(Collection::ProteinFamilyRef, &query)? {
            let (Some(family_id), Some(product)) = (
                row.get("family_id").and_then(serde_json::Value::as_str),
                row.get("family_product").and_then(serde_json::Value::as_str),
            ) else {
                continue;
            };
            products.insert(family_id.to_string(), product.to_string());
        }
    }
    Ok(products)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GenomeSummary;

    fn directory() -> GenomeDirectory {
        GenomeDirectory::new(
            &[GenomeId::from("1.1"), GenomeId::from("2.2")],
            vec![
                GenomeSummary {
                    genome_id: GenomeId::from("1.1"),
                    genome_name: "Alpha".to_string(),
                },
                GenomeSummary {
                    genome_id: GenomeId::from("2.2"),
                    genome_name: "Beta".to_string(),
                },
            ],
        )
    }

    #[test]
    fn length_stats_population_std() {
        let stats = LengthStats::from_samples(&[100, 200]).unwrap();
        assert_eq!(stats.min, 100);
        assert_eq!(stats.max, 200);
        assert_eq!(stats.mean, 150.0);
        assert_eq!(stats.std, 50.0);
    }

    #[test]
    fn length_stats_empty_is_none() {
        assert_eq!(LengthStats::from_samples(&[]), None);
    }

    #[test]
    fn blank_family_ids_never_create_entries() {
        let mut acc = FamilyAccumulator::default();
        acc.observe("", &GenomeId::from("1.1"), 100, "hypothetical protein");
        assert!(acc.is_empty());
    }

    #[test]
    fn genome_count_tracks_distinct_genomes() {
        let mut acc = FamilyAccumulator::default();
        let g1 = GenomeId::from("1.1");
        let g2 = GenomeId::from("2.2");
        acc.observe("PLF_1", &g1, 100, "p");
        acc.observe("PLF_1", &g1, 120, "p");
        acc.observe("PLF_1", &g2, 110, "p");
        let table = acc.finalize(&directory(), &BTreeMap::new());
        let line = table.tsv.lines().nth(1).unwrap();
        let parts: Vec<&str> = line.split('\t').collect();
        assert_eq!(parts[0], "PLF_1");
        assert_eq!(parts[1], "3"); // feature_count
        assert_eq!(parts[2], "2"); // genome_count == distinct genomes
        assert_eq!(parts[8], "0201");
    }

    #[test]
    fn single_genome_family_encodes_absent_genomes_as_zero() {
        let mut acc = FamilyAccumulator::default();
        acc.observe("PLF_1", &GenomeId::from("1.1"), 100, "p");
        let table = acc.finalize(&directory(), &BTreeMap::new());
        let line = table.tsv.lines().nth(1).unwrap();
        let parts: Vec<&str> = line.split('\t').collect();
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2], "1");
        assert_eq!(parts[8], "0100");
        assert_eq!(
            table.family_genomes.get("PLF_1").unwrap(),
            &vec![GenomeId::from("1.1")]
        );
    }

    #[test]
    fn reference_product_overrides_first_seen() {
        let mut acc = FamilyAccumulator::default();
        acc.observe("PLF_1", &GenomeId::from("1.1"), 100, "first seen");
        let mut products = BTreeMap::new();
        products.insert("PLF_1".to_string(), "curated description".to_string());
        let table = acc.finalize(&directory(), &products);
        assert!(table.tsv.contains("curated description"));
        assert!(!table.tsv.contains("first seen"));
    }
}
