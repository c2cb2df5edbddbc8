use crate::error::SimError;
use crate::record::{Record, SignatureField};
use crate::search::{RecordStoreLike, SearchLike, TermsQuery};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;
use serde_json::{Map, Value, json};
use std::time::Duration;

const SCROLL_PAGE: usize = 5000;
const SCROLL_KEEPALIVE: &str = "1m";

/// Elasticsearch-backed record store and signature index.
pub struct ElasticIndex {
    client: Client,
    base: Url,
    index: String,
}

impl ElasticIndex {
    pub fn new(base_url: &str, index: &str) -> Result<Self, SimError> {
        let base = Url::parse(base_url)
            .map_err(|e| SimError::Config(format!("invalid search url '{}': {}", base_url, e)))?;
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            base,
            index: index.to_string(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SimError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SimError::Config(format!("search url '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn post(&self, url: Url, body: &Value) -> Result<Value, SimError> {
        let response = self.client.post(url).json(body).send()?.error_for_status()?;
        Ok(response.json()?)
    }
}

/// Request body for a terms query: a `should` of one `term` per signature.
pub fn terms_query_body(query: &TermsQuery) -> Value {
    let should: Vec<Value> = query
        .terms
        .iter()
        .map(|term| json!({ "term": { query.field.as_str(): term } }))
        .collect();
    json!({
        "size": query.size,
        "_source": ["downloads", query.field.as_str()],
        "query": {
            "bool": {
                "should": should,
                "minimum_should_match": query.minimum_match,
            }
        }
    })
}

/// Builds a record from a document's `_source`. Only `sig_*` arrays become
/// signature fields; anything else in the document is ignored.
pub fn record_from_source(id: &str, source: &Map<String, Value>) -> Record {
    let mut record = Record::new(id, source.get("downloads").and_then(Value::as_u64).unwrap_or(0));
    record.decompiled = source
        .get("decompiled")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    for (key, value) in source {
        if !key.starts_with(SignatureField::PREFIX) {
            continue;
        }
        if let Some(items) = value.as_array() {
            let signatures: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            record.fields.insert(key.clone(), signatures);
        }
    }
    record
}

fn hits(response: &Value) -> &[Value] {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn hit_id(hit: &Value) -> Result<&str, SimError> {
    hit.get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| SimError::Search("hit without _id".to_string()))
}

impl SearchLike for ElasticIndex {
    fn terms_query(&self, query: &TermsQuery) -> Result<Vec<Record>, SimError> {
        let url = self.url(&[self.index.as_str(), "_search"])?;
        let response = self.post(url, &terms_query_body(query))?;
        let empty = Map::new();
        hits(&response)
            .iter()
            .map(|hit| {
                let source = hit.get("_source").and_then(Value::as_object).unwrap_or(&empty);
                Ok(record_from_source(hit_id(hit)?, source))
            })
            .collect()
    }

    fn eligible_ids(&self) -> Result<Vec<String>, SimError> {
        let mut url = self.url(&[self.index.as_str(), "_search"])?;
        url.query_pairs_mut().append_pair("scroll", SCROLL_KEEPALIVE);
        let mut response = self.post(
            url,
            &json!({
                "size": SCROLL_PAGE,
                "_source": false,
                "sort": ["_doc"],
                "query": { "bool": { "filter": { "term": { "decompiled": true } } } }
            }),
        )?;

        let mut ids = Vec::new();
        loop {
            let page = hits(&response);
            if page.is_empty() {
                break;
            }
            for hit in page {
                ids.push(hit_id(hit)?.to_string());
            }
            tracing::debug!(fetched = ids.len(), "scrolling eligible ids");
            let Some(scroll_id) = response.get("_scroll_id").and_then(Value::as_str) else {
                break;
            };
            let next = self.url(&["_search", "scroll"])?;
            response = self.post(
                next,
                &json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": scroll_id }),
            )?;
        }

        if let Some(scroll_id) = response.get("_scroll_id").and_then(Value::as_str) {
            let url = self.url(&["_search", "scroll"])?;
            if let Err(e) = self
                .client
                .delete(url)
                .json(&json!({ "scroll_id": scroll_id }))
                .send()
            {
                tracing::warn!(error = %e, "failed to release scroll context");
            }
        }
        Ok(ids)
    }
}

impl RecordStoreLike for ElasticIndex {
    fn find(&self, id: &str) -> Result<Option<Record>, SimError> {
        let url = self.url(&[self.index.as_str(), "_doc", id])?;
        let response = self.client.get(url).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = response.error_for_status()?.json()?;
        if !body.get("found").and_then(Value::as_bool).unwrap_or(true) {
            return Ok(None);
        }
        let empty = Map::new();
        let source = body.get("_source").and_then(Value::as_object).unwrap_or(&empty);
        Ok(Some(record_from_source(id, source)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_query_body() {
        let query = TermsQuery {
            field: "sig_resources_100".to_string(),
            terms: vec!["a".to_string(), "b".to_string()],
            minimum_match: 2,
            size: 100,
        };
        let body = terms_query_body(&query);
        assert_eq!(body["size"], 100);
        assert_eq!(body["_source"], json!(["downloads", "sig_resources_100"]));
        assert_eq!(body["query"]["bool"]["minimum_should_match"], 2);
        assert_eq!(
            body["query"]["bool"]["should"],
            json!([
                { "term": { "sig_resources_100": "a" } },
                { "term": { "sig_resources_100": "b" } }
            ])
        );
    }

    #[test]
    fn test_record_from_source() {
        let source = json!({
            "downloads": 1200,
            "decompiled": true,
            "title": "ignored",
            "sig_asset_hashes_300": ["h1", "h2"],
            "sig_resources_100": "not-an-array"
        });
        let record = record_from_source("com.example", source.as_object().unwrap());
        assert_eq!(record.id, "com.example");
        assert_eq!(record.downloads, 1200);
        assert!(record.decompiled);
        assert_eq!(record.signatures("sig_asset_hashes_300"), ["h1", "h2"]);
        assert!(record.signatures("sig_resources_100").is_empty());
        assert_eq!(record.fields.len(), 1);
    }

    #[test]
    fn test_url_segments_are_escaped() {
        let index = ElasticIndex::new("http://localhost:9200/", "signatures").unwrap();
        let url = index.url(&["signatures", "_doc", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9200/signatures/_doc/a%2Fb%20c");
    }
}
