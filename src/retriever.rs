use crate::blacklist::{SignatureFilter, SignatureSet};
use crate::error::SimError;
use crate::record::Record;
use crate::search::{SearchLike, TermsQuery};
use rand::seq::SliceRandom;

/// Upper bound on terms per query; the search service rejects more clauses.
pub const SAMPLE_CAP: usize = 1024;
/// Candidates fetched per query.
pub const CANDIDATE_LIMIT: usize = 100;

/// Filtered source signatures plus the raw candidates the index returned.
#[derive(Debug, Default)]
pub struct Retrieval {
    pub source: SignatureSet,
    pub candidates: Vec<Record>,
}

/// `ceil(threshold * terms)`, tolerant of float noise and clamped to `1..=terms`.
pub fn minimum_match(threshold: f64, terms: usize) -> usize {
    if terms == 0 {
        return 0;
    }
    let raw = (threshold * terms as f64 - 1e-9).ceil();
    (raw.max(1.0) as usize).min(terms)
}

pub struct CandidateRetriever<'a> {
    search: &'a dyn SearchLike,
    filter: &'a SignatureFilter,
}

impl<'a> CandidateRetriever<'a> {
    pub fn new(search: &'a dyn SearchLike, filter: &'a SignatureFilter) -> Self {
        Self { search, filter }
    }

    /// Cheap, lossy pre-filter: exact scoring happens on the returned candidates.
    pub fn retrieve(
        &self,
        record: &Record,
        field: &str,
        threshold: f64,
        min_count: usize,
    ) -> Result<Retrieval, SimError> {
        let source = self.filter.filter(record, field)?;
        if source.is_empty() || source.len() < min_count {
            tracing::debug!(id = %record.id, field, size = source.len(), "too few signatures, skipping retrieval");
            return Ok(Retrieval {
                source,
                candidates: Vec::new(),
            });
        }

        let terms = sample_terms(&source, SAMPLE_CAP);
        let query = TermsQuery {
            field: field.to_string(),
            minimum_match: minimum_match(threshold, terms.len()),
            terms,
            size: CANDIDATE_LIMIT,
        };
        let candidates = self.search.terms_query(&query)?;
        tracing::debug!(
            id = %record.id,
            field,
            terms = query.terms.len(),
            minimum_match = query.minimum_match,
            candidates = candidates.len(),
            "retrieved candidates"
        );
        Ok(Retrieval { source, candidates })
    }
}

/// All signatures when they fit, otherwise a uniform random sample of exactly `cap`.
pub fn sample_terms(signatures: &SignatureSet, cap: usize) -> Vec<String> {
    let mut terms: Vec<String> = signatures.iter().cloned().collect();
    terms.sort_unstable();
    if terms.len() > cap {
        let mut rng = rand::thread_rng();
        let (sample, _) = terms.partial_shuffle(&mut rng, cap);
        return sample.to_vec();
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::StaticBlacklistSource;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSearch {
        queries: Mutex<Vec<TermsQuery>>,
    }

    impl SearchLike for RecordingSearch {
        fn terms_query(&self, query: &TermsQuery) -> Result<Vec<Record>, SimError> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(vec![Record::new("hit", 7)])
        }

        fn eligible_ids(&self) -> Result<Vec<String>, SimError> {
            Ok(Vec::new())
        }
    }

    fn filter() -> SignatureFilter {
        SignatureFilter::new(Box::new(StaticBlacklistSource::new().with("resources_100", ["bl"])))
    }

    #[test]
    fn test_minimum_match_rounds_up() {
        assert_eq!(minimum_match(0.8, 1024), 820);
        assert_eq!(minimum_match(0.5, 3), 2);
        assert_eq!(minimum_match(1.0, 4), 4);
    }

    #[test]
    fn test_minimum_match_ignores_float_noise() {
        // 0.7 * 10 is 7.000000000000001 in f64
        assert_eq!(minimum_match(0.7, 10), 7);
        assert_eq!(minimum_match(0.6, 5), 3);
    }

    #[test]
    fn test_minimum_match_clamps() {
        assert_eq!(minimum_match(0.0, 10), 1);
        assert_eq!(minimum_match(1.5, 10), 10);
        assert_eq!(minimum_match(0.9, 0), 0);
    }

    #[test]
    fn test_large_sets_are_sampled_to_cap() {
        let search = RecordingSearch::default();
        let filter = filter();
        let retriever = CandidateRetriever::new(&search, &filter);
        let signatures: Vec<String> = (0..2000).map(|i| format!("sig{}", i)).collect();
        let record = Record::new("src", 1).with_signatures("sig_resources_100", signatures);

        let retrieval = retriever.retrieve(&record, "sig_resources_100", 0.8, 1).unwrap();

        let queries = search.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].terms.len(), SAMPLE_CAP);
        assert_eq!(queries[0].minimum_match, (1024.0f64 * 0.8).ceil() as usize);
        assert_eq!(queries[0].size, CANDIDATE_LIMIT);
        let distinct: SignatureSet = queries[0].terms.iter().cloned().collect();
        assert_eq!(distinct.len(), SAMPLE_CAP);
        assert!(distinct.iter().all(|t| retrieval.source.contains(t)));
        assert_eq!(retrieval.source.len(), 2000);
    }

    #[test]
    fn test_small_sets_are_sent_whole() {
        let search = RecordingSearch::default();
        let filter = filter();
        let retriever = CandidateRetriever::new(&search, &filter);
        let record =
            Record::new("src", 1).with_signatures("sig_resources_100", ["a", "b", "bl", "c"]);

        let retrieval = retriever.retrieve(&record, "sig_resources_100", 0.5, 1).unwrap();

        let queries = search.queries.lock().unwrap();
        assert_eq!(queries[0].terms, vec!["a", "b", "c"]);
        assert_eq!(queries[0].minimum_match, 2);
        assert_eq!(retrieval.candidates.len(), 1);
    }

    #[test]
    fn test_below_min_count_skips_query() {
        let search = RecordingSearch::default();
        let filter = filter();
        let retriever = CandidateRetriever::new(&search, &filter);
        let record = Record::new("src", 1).with_signatures("sig_resources_100", ["a", "bl"]);

        let retrieval = retriever.retrieve(&record, "sig_resources_100", 0.5, 2).unwrap();

        assert!(retrieval.candidates.is_empty());
        assert!(search.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_field_skips_query_even_with_zero_min_count() {
        let search = RecordingSearch::default();
        let filter = filter();
        let retriever = CandidateRetriever::new(&search, &filter);
        let record = Record::new("src", 1);

        let retrieval = retriever.retrieve(&record, "sig_resources_100", 0.5, 0).unwrap();

        assert!(retrieval.candidates.is_empty());
        assert!(search.queries.lock().unwrap().is_empty());
    }
}
