use serde_json::Value;
use tracing::{debug, error};

use crate::bvbrc::{Collection, QueryClient};
use crate::domain::GenomeId;
use crate::error::CompareError;
use crate::record::{Record, Table};

/// Genomes per remote call.
pub const GENOME_CHUNK: usize = 20;
/// Family ids per product-reference call.
pub const FAMILY_REF_CHUNK: usize = 5000;
/// Row limit the API accepts per query.
pub const QUERY_LIMIT: u64 = 2_500_000;

pub fn feature_query(chunk: &[GenomeId]) -> String {
    format!(
        "in(genome_id,({}))&limit({QUERY_LIMIT})&sort(+feature_id)&eq(annotation,PATRIC)",
        join_ids(chunk)
    )
}

pub fn subsystem_query(chunk: &[GenomeId]) -> String {
    format!("in(genome_id,({}))&limit({QUERY_LIMIT})&sort(+id)", join_ids(chunk))
}

pub fn pathway_query(chunk: &[GenomeId]) -> String {
    format!(
        "in(genome_id,({}))&limit({QUERY_LIMIT})&sort(+id)&eq(annotation,PATRIC)",
        join_ids(chunk)
    )
}

pub fn family_ref_query(family_ids: &[String]) -> String {
    format!(
        "in(family_id,({}))&limit({QUERY_LIMIT})&sort(+family_id)",
        family_ids.join(",")
    )
}

fn join_ids(chunk: &[GenomeId]) -> String {
    chunk
        .iter()
        .map(GenomeId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Lazy, finite, non-restartable record stream: one remote call per
/// genome-id chunk, each page buffered in full before its rows are
/// yielded. A row that is not a JSON object is logged and skipped; a
/// transport failure surfaces as an `Err` item and fails the domain.
pub struct RecordStream<'a, C: QueryClient> {
    client: &'a C,
    collection: Collection,
    query: fn(&[GenomeId]) -> String,
    required: &'static [&'static str],
    chunks: std::slice::Chunks<'a, GenomeId>,
    buffer: std::vec::IntoIter<Value>,
}

impl<'a, C: QueryClient> RecordStream<'a, C> {
    pub fn new(
        client: &'a C,
        collection: Collection,
        genome_ids: &'a [GenomeId],
        query: fn(&[GenomeId]) -> String,
        required: &'static [&'static str],
    ) -> Self {
        Self {
            client,
            collection,
            query,
            required,
            chunks: genome_ids.chunks(GENOME_CHUNK),
            buffer: Vec::new().into_iter(),
        }
    }
}

impl<C: QueryClient> Iterator for RecordStream<'_, C> {
    type Item = Result<Record, CompareError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.buffer.next() {
                match Record::from_json(&value, self.required) {
                    Ok(record) => return Some(Ok(record)),
                    Err(err) => {
                        error!(collection = self.collection.path(), %err, "skipping malformed row");
                        continue;
                    }
                }
            }
            let chunk = self.chunks.next()?;
            let query = (self.query)(chunk);
            debug!(collection = self.collection.path(), %query, "issuing chunk query");
            match self.client.fetch_records(self.collection, &query) {
                Ok(rows) => self.buffer = rows.into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Streams a whole collection into a raw [`Table`], used for the join
/// side of the subsystems and pathways outputs.
pub fn fetch_table<C: QueryClient>(
    client: &C,
    collection: Collection,
    genome_ids: &[GenomeId],
    query: fn(&[GenomeId]) -> String,
    required: &'static [&'static str],
) -> Result<Table, CompareError> {
    let mut table = Table::new();
    for record in RecordStream::new(client, collection, genome_ids, query, required) {
        table.push(&record?);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::GenomeSummary;

    struct ScriptedClient {
        pages: std::sync::Mutex<Vec<Result<Vec<Value>, CompareError>>>,
    }

    impl ScriptedClient {
        fn new(pages: Vec<Result<Vec<Value>, CompareError>>) -> Self {
            Self {
                pages: std::sync::Mutex::new(pages),
            }
        }
    }

    impl QueryClient for ScriptedClient {
        fn fetch_records(
            &self,
            _collection: Collection,
            _query: &str,
        ) -> Result<Vec<Value>, CompareError> {
            self.pages.lock().unwrap().remove(0)
        }

        fn resolve_genome_group(&self, group: &str) -> Result<Vec<GenomeId>, CompareError> {
            Err(CompareError::GroupResolution {
                group: group.to_string(),
                message: "not implemented".to_string(),
            })
        }

        fn genome_metadata(&self, _ids: &[GenomeId]) -> Result<Vec<GenomeSummary>, CompareError> {
            Ok(Vec::new())
        }
    }

    fn ids(n: usize) -> Vec<GenomeId> {
        (0..n).map(|i| GenomeId::new(format!("{i}.1"))).collect()
    }

    #[test]
    fn streams_one_call_per_twenty_genomes() {
        let genome_ids = ids(21);
        let client = ScriptedClient::new(vec![
            Ok(vec![json!({"genome_id": "0.1"})]),
            Ok(vec![json!({"genome_id": "20.1"})]),
        ]);
        let records: Vec<_> =
            RecordStream::new(&client, Collection::Subsystem, &genome_ids, subsystem_query, &[])
                .collect::<Result<_, _>>()
                .unwrap();
        assert_eq!(records.len(), 2);
        assert!(client.pages.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_rows_are_skipped_not_fatal() {
        let genome_ids = ids(1);
        let client = ScriptedClient::new(vec![Ok(vec![
            json!("not an object"),
            json!({"genome_id": "0.1"}),
        ])]);
        let records: Vec<_> =
            RecordStream::new(&client, Collection::Pathway, &genome_ids, pathway_query, &[])
                .collect::<Result<_, _>>()
                .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("genome_id"), "0.1");
    }

    #[test]
    fn transport_errors_surface_as_err_items() {
        let genome_ids = ids(1);
        let client = ScriptedClient::new(vec![Err(CompareError::BvbrcHttp("down".to_string()))]);
        let mut stream =
            RecordStream::new(&client, Collection::GenomeFeature, &genome_ids, feature_query, &[]);
        assert!(stream.next().unwrap().is_err());
    }

    #[test]
    fn queries_carry_the_documented_shape() {
        let genome_ids = ids(2);
        assert_eq!(
            feature_query(&genome_ids),
            "in(genome_id,(0.1,1.1))&limit(2500000)&sort(+feature_id)&eq(annotation,PATRIC)"
        );
        assert_eq!(
            subsystem_query(&genome_ids),
            "in(genome_id,(0.1,1.1))&limit(2500000)&sort(+id)"
        );
        assert_eq!(
            pathway_query(&genome_ids),
            "in(genome_id,(0.1,1.1))&limit(2500000)&sort(+id)&eq(annotation,PATRIC)"
        );
        assert_eq!(
            family_ref_query(&["PLF_1".to_string(), "PLF_2".to_string()]),
            "in(family_id,(PLF_1,PLF_2))&limit(2500000)&sort(+family_id)"
        );
    }
}
