use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{DomainOutcome, GenomeId};
use crate::error::CompareError;

pub fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CompareError> {
    let payload =
        serde_json::to_string(value).map_err(|err| CompareError::Filesystem(err.to_string()))?;
    fs::write(path.as_std_path(), payload).map_err(|err| CompareError::Filesystem(err.to_string()))
}

pub fn write_text(path: &Utf8Path, content: &str) -> Result<(), CompareError> {
    fs::write(path.as_std_path(), content).map_err(|err| CompareError::Filesystem(err.to_string()))
}

/// Combines the three domain outcomes into the plain-text completion
/// report. Missing-genome lists keep the job's input order.
pub fn write_report(
    output_dir: &Utf8Path,
    genome_ids: &[GenomeId],
    pathways: &DomainOutcome,
    subsystems: &DomainOutcome,
    families: &DomainOutcome,
) -> Result<Utf8PathBuf, CompareError> {
    let mut lines = vec![format!(
        "Comparative systems report generated {}",
        chrono::Utc::now().to_rfc3339()
    )];
    lines.extend(domain_lines("Pathways", "pathway", pathways, genome_ids));
    lines.extend(domain_lines("Subsystems", "subsystems", subsystems, genome_ids));
    lines.extend(domain_lines(
        "ProteinFamilies",
        "proteinfamilies",
        families,
        genome_ids,
    ));

    let path = output_dir.join("report.txt");
    write_text(&path, &lines.join("\n"))?;
    Ok(path)
}

/// Report written when the job dies before any domain could run, so the
/// operator still gets an artifact for the failure.
pub fn write_failure_report(
    output_dir: &Utf8Path,
    message: &str,
) -> Result<Utf8PathBuf, CompareError> {
    let content = format!(
        "Comparative systems report generated {}\nJob failed before comparison: {message}",
        chrono::Utc::now().to_rfc3339()
    );
    let path = output_dir.join("report.txt");
    write_text(&path, &content)?;
    Ok(path)
}

fn domain_lines(
    label: &str,
    noun: &str,
    outcome: &DomainOutcome,
    genome_ids: &[GenomeId],
) -> Vec<String> {
    let total = genome_ids.len();
    match outcome {
        DomainOutcome::Complete { genomes } => {
            let mut lines = vec![format!(
                "{label} succeeded: {} out of {total} genomes had {noun} data",
                genomes.len()
            )];
            if genomes.len() != total {
                let covered: BTreeSet<&GenomeId> = genomes.iter().collect();
                let missing: Vec<&str> = genome_ids
                    .iter()
                    .filter(|id| !covered.contains(id))
                    .map(GenomeId::as_str)
                    .collect();
                lines.push(format!("Genomes Missing from {label}: {}", missing.join(",")));
            }
            lines
        }
        DomainOutcome::NoData => vec![format!(
            "{label} found no data: 0 out of {total} genomes had {noun} data"
        )],
        DomainOutcome::Failed { message } => vec![format!("{label} failed: {message}")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<GenomeId> {
        vec![GenomeId::from("1.1"), GenomeId::from("2.2")]
    }

    #[test]
    fn complete_with_full_coverage_has_no_missing_line() {
        let outcome = DomainOutcome::Complete { genomes: ids() };
        let lines = domain_lines("Pathways", "pathway", &outcome, &ids());
        assert_eq!(
            lines,
            vec!["Pathways succeeded: 2 out of 2 genomes had pathway data"]
        );
    }

    #[test]
    fn partial_coverage_lists_missing_genomes_in_input_order() {
        let outcome = DomainOutcome::Complete {
            genomes: vec![GenomeId::from("2.2")],
        };
        let lines = domain_lines("ProteinFamilies", "proteinfamilies", &outcome, &ids());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "Genomes Missing from ProteinFamilies: 1.1");
    }

    #[test]
    fn no_data_reports_zero_coverage() {
        let lines = domain_lines("Subsystems", "subsystems", &DomainOutcome::NoData, &ids());
        assert_eq!(
            lines,
            vec!["Subsystems found no data: 0 out of 2 genomes had subsystems data"]
        );
    }

    #[test]
    fn failure_carries_the_error_message() {
        let outcome = DomainOutcome::Failed {
            message: "BV-BRC request failed: timeout".to_string(),
        };
        let lines = domain_lines("Pathways", "pathway", &outcome, &ids());
        assert_eq!(lines, vec!["Pathways failed: BV-BRC request failed: timeout"]);
    }
}
