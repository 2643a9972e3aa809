use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde_json::Value;

use crate::domain::{GenomeId, GenomeSummary};
use crate::error::CompareError;

/// Data API collections this tool queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    GenomeFeature,
    Subsystem,
    Pathway,
    ProteinFamilyRef,
    Genome,
}

impl Collection {
    pub fn path(&self) -> &'static str {
        match self {
            Collection::GenomeFeature => "genome_feature",
            Collection::Subsystem => "subsystem",
            Collection::Pathway => "pathway",
            Collection::ProteinFamilyRef => "protein_family_ref",
            Collection::Genome => "genome",
        }
    }
}

/// The remote query surface the aggregation pipeline depends on. One
/// `fetch_records` call covers one genome-id chunk; the result page is
/// buffered in full before rows are handed to the caller.
pub trait QueryClient: Send + Sync {
    fn fetch_records(&self, collection: Collection, query: &str) -> Result<Vec<Value>, CompareError>;

    fn resolve_genome_group(&self, group_path: &str) -> Result<Vec<GenomeId>, CompareError>;

    fn genome_metadata(&self, genome_ids: &[GenomeId]) -> Result<Vec<GenomeSummary>, CompareError>;
}

#[derive(Clone)]
pub struct BvbrcHttpClient {
    client: Client,
    base_url: String,
}

const METADATA_CHUNK: usize = 20;

impl BvbrcHttpClient {
    pub fn new() -> Result<Self, CompareError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("compare-systems/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CompareError::BvbrcHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/rqlquery+x-www-form-urlencoded"),
        );

        if let Ok(token) = std::env::var("KB_AUTH_TOKEN") {
            if !token.trim().is_empty() {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(token.trim())
                        .map_err(|err| CompareError::BvbrcHttp(err.to_string()))?,
                );
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| CompareError::BvbrcHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: "https://www.patricbrc.org/api".to_string(),
        })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/{}/?http_download=true", self.base_url, collection.path())
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, CompareError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CompareError::BvbrcHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, CompareError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "BV-BRC request failed".to_string());
        Err(CompareError::BvbrcStatus { status, message })
    }
}

impl QueryClient for BvbrcHttpClient {
    fn fetch_records(&self, collection: Collection, query: &str) -> Result<Vec<Value>, CompareError> {
        let url = self.collection_url(collection);
        let body = query.to_string();
        let response = self.send_with_retries(|| self.client.post(&url).body(body.clone()))?;
        let response = Self::handle_status(response)?;
        let payload: Value = response
            .json()
            .map_err(|err| CompareError::BvbrcHttp(err.to_string()))?;
        match payload {
            Value::Array(rows) => Ok(rows),
            other => Err(CompareError::BvbrcHttp(format!(
                "expected a JSON array from {}, got {other}",
                collection.path()
            ))),
        }
    }

    fn resolve_genome_group(&self, group_path: &str) -> Result<Vec<GenomeId>, CompareError> {
        let url = format!(
            "{}/genome_group/{}",
            self.base_url,
            urlencoding::encode(group_path)
        );
        let response = self
            .send_with_retries(|| self.client.get(&url))
            .and_then(Self::handle_status)
            .map_err(|err| CompareError::GroupResolution {
                group: group_path.to_string(),
                message: err.to_string(),
            })?;
        let payload: Value = response.json().map_err(|err| CompareError::GroupResolution {
            group: group_path.to_string(),
            message: err.to_string(),
        })?;
        let ids = payload
            .get("id_list")
            .and_then(|value| value.get("genome_id"))
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(GenomeId::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if ids.is_empty() {
            return Err(CompareError::GroupResolution {
                group: group_path.to_string(),
                message: "group resolved to zero genome ids".to_string(),
            });
        }
        Ok(ids)
    }

    fn genome_metadata(&self, genome_ids: &[GenomeId]) -> Result<Vec<GenomeSummary>, CompareError> {
        let mut summaries = Vec::with_capacity(genome_ids.len());
        for chunk in genome_ids.chunks(METADATA_CHUNK) {
            let ids: Vec<&str> = chunk.iter().map(GenomeId::as_str).collect();
            let query = format!(
                "in(genome_id,({}))&select(genome_id,genome_name)&limit(25000)",
                ids.join(",")
            );
            for row in self.fetch_records(Collection::Genome, &query)? {
                let genome_id = row.get("genome_id").and_then(Value::as_str).unwrap_or("");
                if genome_id.is_empty() {
                    continue;
                }
                summaries.push(GenomeSummary {
                    genome_id: GenomeId::from(genome_id),
                    genome_name: row
                        .get("genome_name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                });
            }
        }
        Ok(summaries)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
