use crate::blacklist::SignatureFilter;
use crate::cluster::{GroupStoreLike, MergeOutcome};
use crate::config::MatchOptions;
use crate::error::SimError;
use crate::record::{Match, Namespace, Record, SignatureField, WeightedId};
use crate::retriever::CandidateRetriever;
use crate::scorer::SimilarityScorer;
use crate::search::{RecordStoreLike, SearchLike};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The record is gone from the store; nothing merged.
    NotFound,
    Processed {
        resource_matches: usize,
        hash_matches: usize,
    },
}

/// Drives one record through filter, retrieval, scoring and the three merges.
pub struct RecordProcessor {
    records: Arc<dyn RecordStoreLike>,
    search: Arc<dyn SearchLike>,
    groups: Arc<dyn GroupStoreLike>,
    filter: SignatureFilter,
}

impl RecordProcessor {
    pub fn new(
        records: Arc<dyn RecordStoreLike>,
        search: Arc<dyn SearchLike>,
        groups: Arc<dyn GroupStoreLike>,
        filter: SignatureFilter,
    ) -> Self {
        Self {
            records,
            search,
            groups,
            filter,
        }
    }

    /// Matches of `record` on `field`, always including the record itself.
    pub fn similar(
        &self,
        record: &Record,
        field: &str,
        options: &MatchOptions,
    ) -> Result<Vec<Match>, SimError> {
        let retriever = CandidateRetriever::new(self.search.as_ref(), &self.filter);
        let retrieval =
            retriever.retrieve(record, field, options.threshold, options.min_count)?;
        let scorer = SimilarityScorer::new(&self.filter);
        let mut matches =
            scorer.score(&retrieval.source, &retrieval.candidates, field, options.threshold)?;
        if !matches.iter().any(|m| m.id == record.id) {
            matches.push(Match {
                id: record.id.clone(),
                downloads: record.downloads,
                score: 1.0,
            });
        }
        Ok(matches)
    }

    #[tracing::instrument(level = "debug", skip(self, options), fields(threshold = options.threshold))]
    pub fn process(&self, record_id: &str, options: &MatchOptions) -> Result<ProcessOutcome, SimError> {
        let cutoff = options.require_cutoff()?;
        let Some(record) = self.records.find(record_id)? else {
            tracing::debug!(record_id, "record not found, skipping");
            return Ok(ProcessOutcome::NotFound);
        };

        let resources = self.similar(&record, &SignatureField::resources(cutoff), options)?;
        let hashes = self.similar(&record, &SignatureField::asset_hashes(cutoff), options)?;

        let resources: Vec<WeightedId> = resources.iter().map(Match::weighted).collect();
        let hashes: Vec<WeightedId> = hashes.iter().map(Match::weighted).collect();

        self.merge(Namespace::Resources, &resources)?;
        self.merge(Namespace::Hashes, &hashes)?;
        self.merge(Namespace::All, &resources)?;
        self.merge(Namespace::All, &hashes)?;

        // Each list contains the record itself.
        Ok(ProcessOutcome::Processed {
            resource_matches: resources.len() - 1,
            hash_matches: hashes.len() - 1,
        })
    }

    fn merge(&self, namespace: Namespace, matches: &[WeightedId]) -> Result<(), SimError> {
        match self.groups.merge(namespace, matches)? {
            MergeOutcome::Skipped => {}
            MergeOutcome::Merged {
                root,
                weight,
                added,
                absorbed,
            } => {
                tracing::debug!(
                    namespace = namespace.prefix(),
                    %root,
                    weight,
                    added,
                    absorbed = absorbed.len(),
                    "merged"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::StaticBlacklistSource;
    use crate::cluster::InMemoryGroupStore;
    use crate::search::InMemoryIndex;

    fn processor(records: Vec<Record>) -> (RecordProcessor, Arc<InMemoryGroupStore>) {
        let index = Arc::new(InMemoryIndex::from_records(records));
        let groups = Arc::new(InMemoryGroupStore::new());
        let processor = RecordProcessor::new(
            index.clone(),
            index,
            groups.clone(),
            SignatureFilter::new(Box::new(StaticBlacklistSource::new())),
        );
        (processor, groups)
    }

    #[test]
    fn test_missing_cutoff_is_fatal() {
        let (processor, _) = processor(vec![]);
        let err = processor.process("a", &MatchOptions::default()).unwrap_err();
        assert!(matches!(err, SimError::MissingOption("cutoff")));
    }

    #[test]
    fn test_unknown_record_is_skipped() {
        let (processor, groups) = processor(vec![]);
        let outcome = processor.process("ghost", &MatchOptions::new(0.5, 100)).unwrap();
        assert_eq!(outcome, ProcessOutcome::NotFound);
        assert!(groups.groups(Namespace::All).unwrap().is_empty());
    }

    #[test]
    fn test_similar_includes_source_once() {
        let record = Record::new("a", 1).with_signatures("sig_resources_100", ["x", "y"]);
        let (processor, _) = processor(vec![record.clone()]);
        let matches = processor
            .similar(&record, "sig_resources_100", &MatchOptions::new(0.5, 100))
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "a");
    }

    #[test]
    fn test_all_namespace_unions_both_dimensions() {
        let (processor, groups) = processor(vec![
            Record::new("a", 10)
                .with_signatures("sig_resources_100", ["r1", "r2"])
                .with_signatures("sig_asset_hashes_100", ["h1"]),
            Record::new("b", 20)
                .with_signatures("sig_resources_100", ["r1", "r2"])
                .with_signatures("sig_asset_hashes_100", ["h9"]),
            Record::new("c", 5)
                .with_signatures("sig_resources_100", ["r7"])
                .with_signatures("sig_asset_hashes_100", ["h1"]),
        ]);
        let options = MatchOptions::new(0.9, 100);
        for id in ["a", "b", "c"] {
            processor.process(id, &options).unwrap();
        }

        let res = groups.groups(Namespace::Resources).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].root, "b");
        assert_eq!(res[0].members, vec!["a", "b"]);

        let hashes = groups.groups(Namespace::Hashes).unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].root, "a");
        assert_eq!(hashes[0].members, vec!["a", "c"]);

        let all = groups.groups(Namespace::All).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].root, "b");
        assert_eq!(all[0].members, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_process_reports_match_counts() {
        let (processor, _) = processor(vec![
            Record::new("a", 1).with_signatures("sig_resources_100", ["x", "y"]),
            Record::new("b", 2).with_signatures("sig_resources_100", ["x", "y"]),
        ]);
        let outcome = processor.process("a", &MatchOptions::new(1.0, 100)).unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Processed {
                resource_matches: 1,
                hash_matches: 0,
            }
        );
    }
}
