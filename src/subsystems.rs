use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8Path;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::bvbrc::{Collection, QueryClient};
use crate::domain::{DomainOutcome, GenomeDirectory, GenomeId};
use crate::error::CompareError;
use crate::record::{DropSet, Record, Table};
use crate::report::write_json;
use crate::stream::{subsystem_query, RecordStream};

pub const SUBSYSTEM_REQUIRED: &[&str] = &[
    "genome_id",
    "superclass",
    "class",
    "subclass",
    "subsystem_name",
    "feature_id",
    "gene",
    "product",
    "role_id",
    "role_name",
];

pub const SUBSYSTEM_TSV_HEADER: &str =
    "superclass\tclass\tsubclass\tsubsystem_name\tgene_count\trole_count";

/// Classification levels arrive from the API in inconsistent case; all
/// three levels are canonicalized to upper case before grouping.
type ClassificationKey = (String, String, String);
type SubsystemKey = (String, String, String, String);

#[derive(Debug, Default)]
struct SubsystemEntry {
    gene_set: BTreeSet<String>,
    role_set: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct OverviewEntry {
    subsystem_names: BTreeSet<String>,
    gene_set: BTreeSet<String>,
}

/// Streaming accumulator for the subsystems domain: grouped gene/role
/// membership sets, the classification overview, and the raw record
/// table kept for the genes join.
#[derive(Debug, Default)]
pub struct SubsystemAccumulator {
    subsystems: BTreeMap<SubsystemKey, SubsystemEntry>,
    overview: BTreeMap<ClassificationKey, OverviewEntry>,
    raw: Table,
    present: BTreeSet<GenomeId>,
}

impl SubsystemAccumulator {
    pub fn observe(&mut self, record: &Record) {
        self.raw.push(record);
        self.present.insert(GenomeId::from(record.get("genome_id")));

        let superclass = record.get("superclass").to_uppercase();
        let class = record.get("class").to_uppercase();
        let subclass = record.get("subclass").to_uppercase();
        let subsystem_name = record.get("subsystem_name").to_string();
        let gene = record.get("gene");
        let role_id = record.get("role_id");

        let classification = (superclass.clone(), class.clone(), subclass.clone());
        let overview = self.overview.entry(classification).or_default();
        overview.subsystem_names.insert(subsystem_name.clone());
        if !gene.is_empty() {
            overview.gene_set.insert(gene.to_string());
        }

        let entry = self
            .subsystems
            .entry((superclass, class, subclass, subsystem_name))
            .or_default();
        if !gene.is_empty() {
            entry.gene_set.insert(gene.to_string());
        }
        if !role_id.is_empty() {
            entry.role_set.insert(role_id.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn finalize(self) -> FinalizedSubsystems {
        let mut lines = vec![SUBSYSTEM_TSV_HEADER.to_string()];
        for ((superclass, class, subclass, name), entry) in &self.subsystems {
            lines.push(format!(
                "{superclass}\t{class}\t{subclass}\t{name}\t{}\t{}",
                entry.gene_set.len(),
                entry.role_set.len()
            ));
        }
        let mut tsv = lines.join("\n");
        tsv.push('\n');

        FinalizedSubsystems {
            tsv,
            overview: build_overview(&self.overview),
            raw: self.raw,
            present: self.present,
        }
    }
}

pub struct FinalizedSubsystems {
    pub tsv: String,
    pub overview: Value,
    pub raw: Table,
    pub present: BTreeSet<GenomeId>,
}

/// Rolls the per-subclass sets up into the nested overview document.
/// Counts at the class and superclass levels are sums over their
/// subclasses' set sizes.
fn build_overview(entries: &BTreeMap<ClassificationKey, OverviewEntry>) -> Value {
    #[derive(Default)]
    struct Counts {
        subsystem_names: usize,
        genes: usize,
    }
    impl Counts {
        fn add(&mut self, entry: &OverviewEntry) {
            self.subsystem_names += entry.subsystem_names.len();
            self.genes += entry.gene_set.len();
        }
    }
    type ClassTree = BTreeMap<String, (Counts, BTreeMap<String, Counts>)>;

    let mut tree: BTreeMap<String, (Counts, ClassTree)> = BTreeMap::new();
    for ((superclass, class, subclass), entry) in entries {
        let (superclass_counts, classes) = tree.entry(superclass.clone()).or_default();
        superclass_counts.add(entry);
        let (class_counts, subclasses) = classes.entry(class.clone()).or_default();
        class_counts.add(entry);
        subclasses.entry(subclass.clone()).or_default().add(entry);
    }

    let counts_json = |counts: &Counts| {
        json!({
            "subsystem_name_counts": counts.subsystem_names,
            "gene_counts": counts.genes,
        })
    };

    let mut root = Map::new();
    for (superclass, (superclass_counts, classes)) in &tree {
        let mut superclass_node = counts_json(superclass_counts);
        for (class, (class_counts, subclasses)) in classes {
            let mut class_node = counts_json(class_counts);
            for (subclass, subclass_counts) in subclasses {
                class_node[subclass] = counts_json(subclass_counts);
            }
            superclass_node[class] = class_node;
        }
        root.insert(superclass.clone(), superclass_node);
    }
    Value::Object(root)
}

#[derive(Debug, Serialize)]
pub struct SubsystemsDocument {
    pub genome_ids: Vec<GenomeId>,
    pub genome_names: Vec<String>,
    pub overview: Value,
    pub job_name: String,
    pub subsystems: String,
    pub genes: String,
}

pub fn run_subsystems<C: QueryClient>(
    client: &C,
    genome_ids: &[GenomeId],
    directory: &GenomeDirectory,
    gene_table: &Table,
    job_name: &str,
    output_dir: &Utf8Path,
) -> Result<DomainOutcome, CompareError> {
    let mut accumulator = SubsystemAccumulator::default();
    let stream = RecordStream::new(
        client,
        Collection::Subsystem,
        genome_ids,
        subsystem_query,
        SUBSYSTEM_REQUIRED,
    );
    for record in stream {
        accumulator.observe(&record?);
    }

    if accumulator.is_empty() {
        warn!("subsystems: no records for any requested genome");
        return Ok(DomainOutcome::NoData);
    }

    let mut finalized = accumulator.finalize();
    finalized.raw.drop_columns(DropSet::SubsystemsGenes.columns());
    let genes = gene_table.inner_join(&finalized.raw, &["genome_id", "feature_id"]);

    let (covered_ids, covered_names) = directory.covered(&finalized.present);
    let document = SubsystemsDocument {
        genome_ids: covered_ids.clone(),
        genome_names: covered_names,
        overview: finalized.overview,
        job_name: job_name.to_string(),
        subsystems: finalized.tsv,
        genes: genes.to_tsv(),
    };
    write_json(
        &output_dir.join(format!("{job_name}_subsystems_tables.json")),
        &document,
    )?;

    info!(genomes = covered_ids.len(), "subsystems complete");
    Ok(DomainOutcome::Complete {
        genomes: covered_ids,
    })
}
