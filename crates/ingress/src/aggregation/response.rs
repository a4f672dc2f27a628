use std::collections::HashMap;

use dongate_proto::Response;

use super::AggregationError;

/// Quorum counter untuk satu in-flight request.
///
/// Menyimpan satu jawaban per node. Jawaban kedua dari node yang sama
/// menimpa jawaban pertama. Hasil agregasi dikembalikan tepat sekali,
/// saat satu digest pertama kali mencapai threshold.
#[derive(Debug)]
pub struct IdenticalResponseAggregator {
    threshold: usize,
    /// node → (digest, response)
    responses: HashMap<String, (String, Response)>,
    resolved: bool,
}

impl IdenticalResponseAggregator {
    pub fn new(threshold: usize) -> Result<Self, AggregationError> {
        if threshold == 0 {
            return Err(AggregationError::InvalidThreshold);
        }
        Ok(Self {
            threshold,
            responses: HashMap::new(),
            resolved: false,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Catat jawaban `node`. `Some` jika quorum baru saja tercapai.
    pub fn collect(&mut self, response: &Response, node: &str) -> Result<Option<Response>, AggregationError> {
        if node.is_empty() {
            return Err(AggregationError::EmptyNodeAddress);
        }
        let digest = response.digest()?;
        self.responses
            .insert(node.to_string(), (digest.clone(), response.clone()));

        if self.resolved {
            return Ok(None);
        }
        let count = self.responses.values().filter(|(d, _)| *d == digest).count();
        if count >= self.threshold {
            self.resolved = true;
            return Ok(Some(response.clone()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dongate_proto::codes;
    use serde_json::json;

    fn ok(value: i64) -> Response {
        Response::with_result("req-1", json!({ "value": value }))
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(matches!(
            IdenticalResponseAggregator::new(0),
            Err(AggregationError::InvalidThreshold)
        ));
    }

    #[test]
    fn test_quorum_reached_exactly_once() {
        let mut agg = IdenticalResponseAggregator::new(3).unwrap();
        assert!(agg.collect(&ok(1), "n1").unwrap().is_none());
        assert!(agg.collect(&ok(1), "n2").unwrap().is_none());
        let out = agg.collect(&ok(1), "n3").unwrap();
        assert_eq!(out, Some(ok(1)));
        assert!(agg.collect(&ok(1), "n4").unwrap().is_none());
    }

    #[test]
    fn test_same_node_does_not_double_count() {
        let mut agg = IdenticalResponseAggregator::new(2).unwrap();
        assert!(agg.collect(&ok(1), "n1").unwrap().is_none());
        assert!(agg.collect(&ok(1), "n1").unwrap().is_none());
        assert!(agg.collect(&ok(1), "n1").unwrap().is_none());
        assert!(agg.collect(&ok(1), "n2").unwrap().is_some());
    }

    #[test]
    fn test_overwrite_moves_vote() {
        let mut agg = IdenticalResponseAggregator::new(2).unwrap();
        assert!(agg.collect(&ok(1), "n1").unwrap().is_none());
        // n1 berubah pikiran: vote untuk 1 hilang.
        assert!(agg.collect(&ok(2), "n1").unwrap().is_none());
        assert!(agg.collect(&ok(1), "n2").unwrap().is_none());
        assert_eq!(agg.collect(&ok(2), "n3").unwrap(), Some(ok(2)));
    }

    #[test]
    fn test_divergent_responses_do_not_aggregate() {
        let mut agg = IdenticalResponseAggregator::new(2).unwrap();
        assert!(agg.collect(&ok(1), "n1").unwrap().is_none());
        assert!(agg.collect(&ok(2), "n2").unwrap().is_none());
        assert!(agg.collect(&ok(3), "n3").unwrap().is_none());
    }

    #[test]
    fn test_error_responses_aggregate_like_results() {
        let mut agg = IdenticalResponseAggregator::new(2).unwrap();
        let err = Response::with_error("req-1", codes::INVALID_REQUEST, "bad input");
        assert!(agg.collect(&err, "n1").unwrap().is_none());
        assert_eq!(agg.collect(&err, "n2").unwrap(), Some(err));
    }

    #[test]
    fn test_empty_node_rejected() {
        let mut agg = IdenticalResponseAggregator::new(1).unwrap();
        assert!(matches!(
            agg.collect(&ok(1), ""),
            Err(AggregationError::EmptyNodeAddress)
        ));
    }
}
