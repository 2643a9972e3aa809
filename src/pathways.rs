use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::bvbrc::{Collection, QueryClient};
use crate::domain::{DomainOutcome, GenomeDirectory, GenomeId};
use crate::error::CompareError;
use crate::record::{DropSet, Record, Table};
use crate::report::{write_json, write_text};
use crate::stream::{pathway_query, RecordStream};

pub const PATHWAY_REQUIRED: &[&str] = &[
    "annotation",
    "ec_description",
    "ec_number",
    "feature_id",
    "genome_id",
    "pathway_class",
    "pathway_id",
    "pathway_name",
    "patric_id",
    "product",
];

pub const PATHWAY_TSV_HEADER: &str = "annotation\tpathway_id\tpathway_name\tpathway_class\t\
genome_count\tec_count\tgene_count\tgenome_ec\tec_conservation\tgene_conservation";

pub const EC_TSV_HEADER: &str = "annotation\tpathway_id\tpathway_name\tpathway_class\t\
ec_description\tec_number\tgenome_count\tec_count\tgene_count\tgenome_ec";

#[derive(Debug, Default)]
struct PathwayEntry {
    annotation: String,
    pathway_name: String,
    pathway_class: String,
    genomes: BTreeSet<GenomeId>,
    ec_numbers: BTreeSet<String>,
    features: BTreeSet<String>,
    genome_ec: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct EcEntry {
    annotation: String,
    pathway_name: String,
    pathway_class: String,
    ec_description: String,
    genomes: BTreeSet<GenomeId>,
    ec_numbers: BTreeSet<String>,
    features: BTreeSet<String>,
    genome_ec: BTreeSet<String>,
}

/// Streaming accumulator for the pathways domain. Pathway-level and
/// EC-level aggregates advance in lockstep over the same records; set
/// sizes are only read once the stream is exhausted.
#[derive(Debug, Default)]
pub struct PathwayAccumulator {
    pathways: BTreeMap<String, PathwayEntry>,
    ecs: BTreeMap<(String, String), EcEntry>,
    ec_genomes: BTreeMap<String, BTreeMap<String, BTreeSet<GenomeId>>>,
    raw: Table,
    present: BTreeSet<GenomeId>,
}

impl PathwayAccumulator {
    pub fn observe(&mut self, record: &Record) {
        self.raw.push(record);
        let genome_id = GenomeId::from(record.get("genome_id"));
        self.present.insert(genome_id.clone());

        let pathway_id = record.get("pathway_id");
        if pathway_id.is_empty() {
            // Records without a pathway assignment stay in the raw table
            // but never create an aggregate.
            return;
        }
        let ec_number = record.get("ec_number");
        let feature_id = record.get("feature_id");
        let pair = format!("{genome_id}_{ec_number}");

        let pathway = self
            .pathways
            .entry(pathway_id.to_string())
            .or_insert_with(|| PathwayEntry {
                annotation: record.get("annotation").to_string(),
                pathway_name: record.get("pathway_name").to_string(),
                pathway_class: record.get("pathway_class").to_string(),
                ..PathwayEntry::default()
            });
        pathway.genomes.insert(genome_id.clone());
        pathway.ec_numbers.insert(ec_number.to_string());
        pathway.features.insert(feature_id.to_string());
        pathway.genome_ec.insert(pair.clone());

        let ec = self
            .ecs
            .entry((pathway_id.to_string(), ec_number.to_string()))
            .or_insert_with(|| EcEntry {
                annotation: record.get("annotation").to_string(),
                pathway_name: record.get("pathway_name").to_string(),
                pathway_class: record.get("pathway_class").to_string(),
                ec_description: record.get("ec_description").to_string(),
                ..EcEntry::default()
            });
        ec.genomes.insert(genome_id.clone());
        ec.ec_numbers.insert(ec_number.to_string());
        ec.features.insert(feature_id.to_string());
        ec.genome_ec.insert(pair);

        self.ec_genomes
            .entry(pathway_id.to_string())
            .or_default()
            .entry(ec_number.to_string())
            .or_default()
            .insert(genome_id);
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Conservation percentage in [0, 100]: mean coverage of the pathway's
/// members (EC numbers or genes) across the genomes that had any pathway
/// data. An empty membership map or empty genome set scores 0.
pub fn conservation<K: Ord>(
    members: Option<&BTreeMap<K, BTreeSet<GenomeId>>>,
    genomes_with_data: usize,
) -> f64 {
    let Some(members) = members else {
        return 0.0;
    };
    let denominator = members.len() * genomes_with_data;
    if denominator == 0 {
        return 0.0;
    }
    let numerator: usize = members.values().map(BTreeSet::len).sum();
    numerator as f64 / denominator as f64 * 100.0
}

#[derive(Debug, Serialize)]
pub struct PathwaysDocument {
    pub pathway: String,
    pub ecnumber: String,
    pub genes: String,
    pub genome_ids: Vec<GenomeId>,
    pub job_name: String,
}

pub fn run_pathways<C: QueryClient>(
    client: &C,
    genome_ids: &[GenomeId],
    directory: &GenomeDirectory,
    gene_table: &Table,
    job_name: &str,
    output_dir: &Utf8Path,
) -> Result<DomainOutcome, CompareError> {
    let mut accumulator = PathwayAccumulator::default();
    let stream = RecordStream::new(
        client,
        Collection::Pathway,
        genome_ids,
        pathway_query,
        PATHWAY_REQUIRED,
    );
    for record in stream {
        accumulator.observe(&record?);
    }

    if accumulator.is_empty() {
        warn!("pathways: no records for any requested genome");
        return Ok(DomainOutcome::NoData);
    }

    write_text(
        &output_dir.join(format!("{job_name}_pathways.tsv")),
        &accumulator.raw.to_tsv(),
    )?;

    let mut gene_side = gene_table.clone();
    gene_side.drop_columns(DropSet::PathwaysGenes.columns());
    let genes = gene_side.inner_join(&accumulator.raw, &["genome_id", "patric_id"]);

    // Gene membership comes from the joined table so the gene symbol is
    // the feature table's, with rows the pathway data could not match
    // excluded.
    let mut gene_genomes: BTreeMap<String, BTreeMap<String, BTreeSet<GenomeId>>> = BTreeMap::new();
    for row in 0..genes.len() {
        let gene = genes.cell(row, "gene");
        if gene.is_empty() {
            continue;
        }
        gene_genomes
            .entry(genes.cell(row, "pathway_id").to_string())
            .or_default()
            .entry(gene.to_string())
            .or_default()
            .insert(GenomeId::from(genes.cell(row, "genome_id")));
    }

    let genomes_with_data = accumulator.present.len();
    let mut pathway_lines = vec![PATHWAY_TSV_HEADER.to_string()];
    for (pathway_id, entry) in &accumulator.pathways {
        let ec_conservation = conservation(accumulator.ec_genomes.get(pathway_id), genomes_with_data);
        let gene_conservation = conservation(gene_genomes.get(pathway_id), genomes_with_data);
        pathway_lines.push(format!(
            "{}\t{pathway_id}\t{}\t{}\t{}\t{}\t{}\t{}\t{ec_conservation}\t{gene_conservation}",
            entry.annotation,
            entry.pathway_name,
            entry.pathway_class,
            entry.genomes.len(),
            entry.ec_numbers.len(),
            entry.features.len(),
            entry.genome_ec.len(),
        ));
    }

    let mut ec_lines = vec![EC_TSV_HEADER.to_string()];
    for ((pathway_id, ec_number), entry) in &accumulator.ecs {
        ec_lines.push(format!(
            "{}\t{pathway_id}\t{}\t{}\t{}\t{ec_number}\t{}\t{}\t{}\t{}",
            entry.annotation,
            entry.pathway_name,
            entry.pathway_class,
            entry.ec_description,
            entry.genomes.len(),
            entry.ec_numbers.len(),
            entry.features.len(),
            entry.genome_ec.len(),
        ));
    }

    let (covered_ids, _) = directory.covered(&accumulator.present);
    let document = PathwaysDocument {
        pathway: pathway_lines.join("\n"),
        ecnumber: ec_lines.join("\n"),
        genes: genes.to_tsv(),
        genome_ids: covered_ids.clone(),
        job_name: job_name.to_string(),
    };
    write_json(
        &output_dir.join(format!("{job_name}_pathways_tables.json")),
        &document,
    )?;

    info!(genomes = covered_ids.len(), "pathways complete");
    Ok(DomainOutcome::Complete {
        genomes: covered_ids,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(fields: serde_json::Value) -> Record {
        Record::from_json(&fields, PATHWAY_REQUIRED).unwrap()
    }

    #[test]
    fn blank_pathway_ids_never_create_aggregates() {
        let mut acc = PathwayAccumulator::default();
        acc.observe(&record(json!({"genome_id": "1.1", "pathway_id": ""})));
        assert!(acc.pathways.is_empty());
        assert!(acc.ecs.is_empty());
        assert_eq!(acc.raw.len(), 1);
    }

    #[test]
    fn pathway_and_ec_aggregates_advance_in_lockstep() {
        let mut acc = PathwayAccumulator::default();
        acc.observe(&record(json!({
            "genome_id": "1.1", "pathway_id": "00010", "pathway_name": "Glycolysis",
            "pathway_class": "Metabolism", "annotation": "PATRIC",
            "ec_number": "2.7.1.1", "ec_description": "hexokinase", "feature_id": "F1"
        })));
        acc.observe(&record(json!({
            "genome_id": "2.2", "pathway_id": "00010", "pathway_name": "Glycolysis",
            "pathway_class": "Metabolism", "annotation": "PATRIC",
            "ec_number": "2.7.1.1", "ec_description": "hexokinase", "feature_id": "F2"
        })));
        let pathway = acc.pathways.get("00010").unwrap();
        assert_eq!(pathway.genomes.len(), 2);
        assert_eq!(pathway.ec_numbers.len(), 1);
        assert_eq!(pathway.features.len(), 2);
        assert_eq!(pathway.genome_ec.len(), 2);
        let ec = acc
            .ecs
            .get(&("00010".to_string(), "2.7.1.1".to_string()))
            .unwrap();
        assert_eq!(ec.genomes.len(), 2);
        assert_eq!(ec.ec_description, "hexokinase");
    }

    #[test]
    fn conservation_is_bounded_and_zero_on_empty() {
        assert_eq!(conservation::<String>(None, 5), 0.0);
        assert_eq!(conservation(Some(&BTreeMap::<String, _>::new()), 5), 0.0);

        let mut members = BTreeMap::new();
        let mut genomes = BTreeSet::new();
        genomes.insert(GenomeId::from("1.1"));
        members.insert("2.7.1.1".to_string(), genomes);
        assert_eq!(conservation(Some(&members), 0), 0.0);

        // one EC in one of two genomes => 50%
        assert_eq!(conservation(Some(&members), 2), 50.0);
        let full = conservation(Some(&members), 1);
        assert!((0.0..=100.0).contains(&full));
        assert_eq!(full, 100.0);
    }
}
