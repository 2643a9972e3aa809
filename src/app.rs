use std::collections::BTreeSet;
use std::fs;

use camino::Utf8Path;
use serde::Serialize;
use tracing::{error, info};

use crate::bvbrc::{Collection, QueryClient};
use crate::config::JobConfig;
use crate::domain::{DomainOutcome, GenomeDirectory, GenomeId};
use crate::error::CompareError;
use crate::families::{run_families, FEATURE_REQUIRED};
use crate::pathways::run_pathways;
use crate::report::{write_failure_report, write_report};
use crate::stream::{feature_query, fetch_table};
use crate::subsystems::run_subsystems;

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub job_name: String,
    pub pathways: DomainOutcome,
    pub subsystems: DomainOutcome,
    pub proteinfamilies: DomainOutcome,
    pub report_path: String,
}

/// The comparison pipeline: resolve the genome set, fetch metadata, run
/// the three domains independently, combine their outcomes into the
/// report. Domains never share mutable state; a failure in one leaves
/// the others untouched.
#[derive(Clone)]
pub struct CompareApp<C: QueryClient> {
    client: C,
}

impl<C: QueryClient> CompareApp<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn run(&self, job: &JobConfig, output_dir: &Utf8Path) -> Result<RunSummary, CompareError> {
        fs::create_dir_all(output_dir.as_std_path())
            .map_err(|err| CompareError::Filesystem(err.to_string()))?;

        let genome_ids = match self.resolve_genome_set(job) {
            Ok(ids) => ids,
            Err(err) => {
                // The job cannot compare anything without a genome set;
                // leave a report behind and surface the failure.
                write_failure_report(output_dir, &err.to_string())?;
                return Err(err);
            }
        };
        info!(genomes = genome_ids.len(), job = %job.output_file, "starting comparison");

        let metadata = match self.client.genome_metadata(&genome_ids) {
            Ok(metadata) => metadata,
            Err(err) => {
                write_failure_report(output_dir, &err.to_string())?;
                return Err(err);
            }
        };
        let directory = GenomeDirectory::new(&genome_ids, metadata);

        // The feature table feeds the subsystems and pathways joins; the
        // families domain streams the same collection itself.
        let gene_table = fetch_table(
            &self.client,
            Collection::GenomeFeature,
            &genome_ids,
            feature_query,
            FEATURE_REQUIRED,
        );

        let pathways = match &gene_table {
            Ok(table) => self.domain_outcome("pathways", || {
                run_pathways(
                    &self.client,
                    &genome_ids,
                    &directory,
                    table,
                    &job.output_file,
                    output_dir,
                )
            }),
            Err(err) => DomainOutcome::Failed {
                message: err.to_string(),
            },
        };
        let subsystems = match &gene_table {
            Ok(table) => self.domain_outcome("subsystems", || {
                run_subsystems(
                    &self.client,
                    &genome_ids,
                    &directory,
                    table,
                    &job.output_file,
                    output_dir,
                )
            }),
            Err(err) => DomainOutcome::Failed {
                message: err.to_string(),
            },
        };
        let proteinfamilies = self.domain_outcome("proteinfamilies", || {
            run_families(
                &self.client,
                &genome_ids,
                &directory,
                &job.output_file,
                output_dir,
            )
        });

        let report_path = write_report(
            output_dir,
            &genome_ids,
            &pathways,
            &subsystems,
            &proteinfamilies,
        )?;

        Ok(RunSummary {
            job_name: job.output_file.clone(),
            pathways,
            subsystems,
            proteinfamilies,
            report_path: report_path.into_string(),
        })
    }

    /// Explicit ids first, then each group's members, deduplicated in
    /// first-seen order so chunking stays deterministic.
    fn resolve_genome_set(&self, job: &JobConfig) -> Result<Vec<GenomeId>, CompareError> {
        let mut seen = BTreeSet::new();
        let mut genome_ids = Vec::new();
        for id in &job.genome_ids {
            if seen.insert(id.clone()) {
                genome_ids.push(id.clone());
            }
        }
        for group in &job.genome_groups {
            for id in self.client.resolve_genome_group(group)? {
                if seen.insert(id.clone()) {
                    genome_ids.push(id);
                }
            }
        }
        if genome_ids.is_empty() {
            return Err(CompareError::NoGenomes);
        }
        Ok(genome_ids)
    }

    fn domain_outcome(
        &self,
        domain: &str,
        run: impl FnOnce() -> Result<DomainOutcome, CompareError>,
    ) -> DomainOutcome {
        match run() {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(domain, %err, "domain run failed");
                DomainOutcome::Failed {
                    message: err.to_string(),
                }
            }
        }
    }
}
