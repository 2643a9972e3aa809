use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use crate::error::CompareError;

/// One field-keyed row from a query result. Required fields that the API
/// omitted are filled with an empty string so downstream extraction never
/// has to probe for key presence.
#[derive(Debug, Clone)]
pub struct Record {
    fields: BTreeMap<String, String>,
    order: Vec<String>,
}

impl Record {
    pub fn from_json(value: &Value, required: &[&str]) -> Result<Self, CompareError> {
        let object = value
            .as_object()
            .ok_or_else(|| CompareError::RecordParse(format!("expected a JSON object, got {value}")))?;
        let mut fields = BTreeMap::new();
        let mut order = Vec::with_capacity(object.len());
        for (key, value) in object {
            fields.insert(key.clone(), stringify(value));
            order.push(key.clone());
        }
        for field in required {
            if !fields.contains_key(*field) {
                fields.insert((*field).to_string(), String::new());
                order.push((*field).to_string());
            }
        }
        Ok(Self { fields, order })
    }

    /// Field value, or the empty string for a field this record never had.
    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(|key| (key.as_str(), self.fields[key].as_str()))
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// An in-memory relational table with columns discovered in order of first
/// appearance across pushed records. Cells a row never had serialize as
/// empty strings.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<BTreeMap<String, String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, record: &Record) {
        let mut row = BTreeMap::new();
        for (field, value) in record.fields() {
            if !self.columns.iter().any(|column| column == field) {
                self.columns.push(field.to_string());
            }
            row.insert(field.to_string(), value.to_string());
        }
        self.rows.push(row);
    }

    pub fn cell(&self, row: usize, column: &str) -> &str {
        self.rows[row].get(column).map(String::as_str).unwrap_or("")
    }

    /// Removes the named columns where present. Absent names are ignored,
    /// so domain drop sets can be applied to whatever schema the API
    /// actually returned.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let drop: HashSet<&str> = names.iter().copied().collect();
        self.columns.retain(|column| !drop.contains(column.as_str()));
        for row in &mut self.rows {
            row.retain(|column, _| !drop.contains(column.as_str()));
        }
    }

    /// Inner join on the given key columns. Output columns are this
    /// table's columns followed by the right table's columns that this
    /// table does not already have; for an overlapping non-key column the
    /// left value wins and the right duplicate is dropped.
    pub fn inner_join(&self, right: &Table, on: &[&str]) -> Table {
        let mut columns = self.columns.clone();
        for column in &right.columns {
            if !columns.iter().any(|existing| existing == column) {
                columns.push(column.clone());
            }
        }

        let mut index: HashMap<Vec<&str>, Vec<usize>> = HashMap::new();
        for (position, row) in right.rows.iter().enumerate() {
            let key: Vec<&str> = on
                .iter()
                .map(|column| row.get(*column).map(String::as_str).unwrap_or(""))
                .collect();
            index.entry(key).or_default().push(position);
        }

        let mut joined = Table {
            columns,
            rows: Vec::new(),
        };
        for row in &self.rows {
            let key: Vec<&str> = on
                .iter()
                .map(|column| row.get(*column).map(String::as_str).unwrap_or(""))
                .collect();
            let Some(matches) = index.get(&key) else {
                continue;
            };
            for position in matches {
                let mut merged = right.rows[*position].clone();
                for (column, value) in row {
                    merged.insert(column.clone(), value.clone());
                }
                joined.rows.push(merged);
            }
        }
        joined
    }

    /// Header line plus one line per row, tab-separated, trailing newline.
    pub fn to_tsv(&self) -> String {
        let mut out = self.columns.join("\t");
        out.push('\n');
        for row in &self.rows {
            let line: Vec<&str> = self
                .columns
                .iter()
                .map(|column| row.get(column).map(String::as_str).unwrap_or(""))
                .collect();
            out.push_str(&line.join("\t"));
            out.push('\n');
        }
        out
    }
}

/// Column sets stripped before the per-domain joins, fixed for output
/// compatibility with downstream consumers of the JSON documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropSet {
    SubsystemsGenes,
    SubsystemsSubsystems,
    ProteinFamiliesPlfams,
    ProteinFamiliesPgfams,
    PathwaysGenes,
}

impl DropSet {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            DropSet::SubsystemsGenes => &[
                "date_inserted",
                "date_modified",
                "genome_name",
                "gene",
                "owner",
                "patric_id",
                "public",
                "product",
                "refseq_locus_tag",
                "taxon_id",
                "_version_",
            ],
            DropSet::SubsystemsSubsystems => &[
                "feature_id",
                "public",
                "role_id",
                "genome_id",
                "taxon_id",
                "role_name",
                "owner",
                "product",
                "patric_id",
                "genome_name",
                "id",
                "_version_",
                "date_inserted",
                "date_modified",
            ],
            DropSet::ProteinFamiliesPlfams => &[
                "genome_name",
                "accession",
                "patric_id",
                "refseq_locus_tag",
                "alt_locus_tag",
                "feature_id",
                "annotation",
                "feature_type",
                "start",
                "end",
                "strand",
                "figfam_id",
                "pgfam_id",
                "protein_id",
                "aa_length",
                "gene",
                "go",
            ],
            DropSet::ProteinFamiliesPgfams => &[
                "genome_name",
                "accession",
                "patric_id",
                "refseq_locus_tag",
                "alt_locus_tag",
                "feature_id",
                "annotation",
                "feature_type",
                "start",
                "end",
                "strand",
                "figfam_id",
                "plfam_id",
                "protein_id",
                "aa_length",
                "gene",
                "go",
            ],
            DropSet::PathwaysGenes => &[
                "genome_name",
                "accession",
                "alt_locus_tag",
                "refseq_locus_tag",
                "feature_id",
                "annotation",
                "product",
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn record_fills_required_fields_with_blanks() {
        let value = json!({"genome_id": "1.1", "aa_length": 250});
        let record = Record::from_json(&value, &["genome_id", "plfam_id"]).unwrap();
        assert_eq!(record.get("genome_id"), "1.1");
        assert_eq!(record.get("aa_length"), "250");
        assert_eq!(record.get("plfam_id"), "");
    }

    #[test]
    fn record_rejects_non_objects() {
        let err = Record::from_json(&json!([1, 2]), &[]).unwrap_err();
        assert_matches!(err, CompareError::RecordParse(_));
    }

    #[test]
    fn table_discovers_columns_in_first_seen_order() {
        let mut table = Table::new();
        table.push(&Record::from_json(&json!({"b": "1", "a": "2"}), &[]).unwrap());
        table.push(&Record::from_json(&json!({"a": "3", "c": "4"}), &[]).unwrap());
        assert_eq!(table.columns(), &["a", "b", "c"]);
        assert_eq!(table.to_tsv(), "a\tb\tc\n2\t1\t\n3\t\t4\n");
    }

    #[test]
    fn inner_join_keeps_matching_rows_and_left_wins_on_overlap() {
        let mut left = Table::new();
        left.push(
            &Record::from_json(
                &json!({"genome_id": "1.1", "feature_id": "F1", "gene": "dnaA"}),
                &[],
            )
            .unwrap(),
        );
        left.push(
            &Record::from_json(
                &json!({"genome_id": "1.1", "feature_id": "F2", "gene": "recA"}),
                &[],
            )
            .unwrap(),
        );

        let mut right = Table::new();
        right.push(
            &Record::from_json(
                &json!({"genome_id": "1.1", "feature_id": "F1", "gene": "", "role_id": "R1"}),
                &[],
            )
            .unwrap(),
        );

        let joined = left.inner_join(&right, &["genome_id", "feature_id"]);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.cell(0, "role_id"), "R1");
        assert_eq!(joined.cell(0, "gene"), "dnaA");
    }

    #[test]
    fn inner_join_with_no_matches_is_empty() {
        let mut left = Table::new();
        left.push(&Record::from_json(&json!({"genome_id": "1.1", "patric_id": "P1"}), &[]).unwrap());
        let right = Table::new();
        let joined = left.inner_join(&right, &["genome_id", "patric_id"]);
        assert!(joined.is_empty());
    }

    #[test]
    fn drop_sets_match_downstream_contract() {
        assert!(DropSet::SubsystemsGenes.columns().contains(&"patric_id"));
        assert!(DropSet::SubsystemsSubsystems.columns().contains(&"role_name"));
        assert!(DropSet::ProteinFamiliesPlfams.columns().contains(&"pgfam_id"));
        assert!(DropSet::ProteinFamiliesPgfams.columns().contains(&"plfam_id"));
        assert_eq!(DropSet::PathwaysGenes.columns().len(), 7);

        let mut table = Table::new();
        table.push(
            &Record::from_json(
                &json!({"genome_id": "1.1", "patric_id": "P1", "product": "x", "gene": "y"}),
                &[],
            )
            .unwrap(),
        );
        table.drop_columns(DropSet::PathwaysGenes.columns());
        assert_eq!(table.columns(), &["gene", "genome_id", "patric_id"]);
    }
}
