use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::GenomeId;
use crate::error::CompareError;

/// Job description: the output-file stem plus the genome set, given as
/// explicit ids and/or genome-group workspace paths.
#[derive(Debug, Deserialize, Serialize)]
pub struct JobConfig {
    pub output_file: String,
    #[serde(default)]
    pub genome_ids: Vec<GenomeId>,
    #[serde(default)]
    pub genome_groups: Vec<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<JobConfig, CompareError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("compare-systems.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CompareError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CompareError::ConfigRead(config_path.clone()))?;
        let config: JobConfig = serde_json::from_str(&content)
            .map_err(|err| CompareError::ConfigParse(err.to_string()))?;

        Self::validate(config)
    }

    pub fn validate(config: JobConfig) -> Result<JobConfig, CompareError> {
        if config.output_file.trim().is_empty() {
            return Err(CompareError::ConfigParse(
                "output_file must not be empty".to_string(),
            ));
        }
        if config.genome_ids.is_empty() && config.genome_groups.is_empty() {
            return Err(CompareError::NoGenomes);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn validate_accepts_ids_only() {
        let config = JobConfig {
            output_file: "comparison".to_string(),
            genome_ids: vec![GenomeId::from("83332.12")],
            genome_groups: Vec::new(),
        };
        let config = ConfigLoader::validate(config).unwrap();
        assert_eq!(config.output_file, "comparison");
    }

    #[test]
    fn validate_rejects_blank_output_file() {
        let config = JobConfig {
            output_file: "  ".to_string(),
            genome_ids: vec![GenomeId::from("83332.12")],
            genome_groups: Vec::new(),
        };
        let err = ConfigLoader::validate(config).unwrap_err();
        assert_matches!(err, CompareError::ConfigParse(_));
    }

    #[test]
    fn validate_rejects_empty_genome_set() {
        let config = JobConfig {
            output_file: "comparison".to_string(),
            genome_ids: Vec::new(),
            genome_groups: Vec::new(),
        };
        let err = ConfigLoader::validate(config).unwrap_err();
        assert_matches!(err, CompareError::NoGenomes);
    }

    #[test]
    fn resolve_parses_job_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(
            &path,
            r#"{"output_file": "run1", "genome_ids": ["1.1"], "genome_groups": ["/user/groups/g1"]}"#,
        )
        .unwrap();
        let config = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.genome_ids, vec![GenomeId::from("1.1")]);
        assert_eq!(config.genome_groups, vec!["/user/groups/g1"]);
    }
}
