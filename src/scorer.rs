use crate::blacklist::{SignatureFilter, SignatureSet};
use crate::error::SimError;
use crate::record::{Match, Record};

/// Jaccard index of two signature sets. Two empty sets score 0.
pub fn jaccard(a: &SignatureSet, b: &SignatureSet) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|s| large.contains(*s)).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

pub struct SimilarityScorer<'a> {
    filter: &'a SignatureFilter,
}

impl<'a> SimilarityScorer<'a> {
    pub fn new(filter: &'a SignatureFilter) -> Self {
        Self { filter }
    }

    /// Candidates whose filtered `field` scores at least `threshold` against `source`.
    pub fn score(
        &self,
        source: &SignatureSet,
        candidates: &[Record],
        field: &str,
        threshold: f64,
    ) -> Result<Vec<Match>, SimError> {
        let mut matches = Vec::new();
        for candidate in candidates {
            let signatures = self.filter.filter(candidate, field)?;
            let score = jaccard(source, &signatures);
            if score > 0.0 && score >= threshold {
                matches.push(Match {
                    id: candidate.id.clone(),
                    downloads: candidate.downloads,
                    score,
                });
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::StaticBlacklistSource;

    fn set(items: &[&str]) -> SignatureSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_jaccard_values() {
        assert_eq!(jaccard(&set(&["x", "y", "z"]), &set(&["x", "y", "w"])), 0.5);
        assert_eq!(jaccard(&set(&["x", "y", "z"]), &set(&["x", "y", "z", "w"])), 0.75);
        assert_eq!(jaccard(&set(&["x", "y", "w"]), &set(&["x", "y", "z", "w"])), 0.75);
        assert_eq!(jaccard(&set(&["a"]), &set(&["b"])), 0.0);
    }

    #[test]
    fn test_jaccard_is_symmetric() {
        let pairs = [
            (set(&["a", "b", "c"]), set(&["b", "c", "d", "e"])),
            (set(&["a"]), set(&["a", "b", "c", "d", "e", "f"])),
            (set(&[]), set(&["q"])),
        ];
        for (a, b) in &pairs {
            assert_eq!(jaccard(a, b), jaccard(b, a));
        }
    }

    #[test]
    fn test_jaccard_empty_sets_do_not_divide_by_zero() {
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let filter = SignatureFilter::new(Box::new(StaticBlacklistSource::new()));
        let scorer = SimilarityScorer::new(&filter);
        let source = set(&["x", "y", "z"]);
        let candidates = vec![
            Record::new("half", 20).with_signatures("sig_resources_100", ["x", "y", "w"]),
            Record::new("less", 9).with_signatures("sig_resources_100", ["x", "q", "w"]),
        ];

        let matches = scorer.score(&source, &candidates, "sig_resources_100", 0.5).unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "half");
        assert_eq!(matches[0].downloads, 20);
        assert_eq!(matches[0].score, 0.5);
    }

    #[test]
    fn test_candidate_is_filtered_by_blacklist() {
        let filter = SignatureFilter::new(Box::new(
            StaticBlacklistSource::new().with("resources_100", ["common"]),
        ));
        let scorer = SimilarityScorer::new(&filter);
        let source = set(&["x", "y"]);
        let candidates = vec![
            Record::new("c", 1).with_signatures("sig_resources_100", ["x", "y", "common"]),
        ];

        let matches = scorer.score(&source, &candidates, "sig_resources_100", 1.0).unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 1.0);
    }

    #[test]
    fn test_fully_blacklisted_candidate_is_discarded() {
        let filter = SignatureFilter::new(Box::new(
            StaticBlacklistSource::new().with("resources_100", ["common"]),
        ));
        let scorer = SimilarityScorer::new(&filter);
        let candidates =
            vec![Record::new("c", 1).with_signatures("sig_resources_100", ["common"])];

        let matches = scorer.score(&set(&[]), &candidates, "sig_resources_100", 0.0).unwrap();

        assert!(matches.is_empty());
    }
}
