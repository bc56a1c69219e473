//! Synchronous questions a client asks its owner.
//!
//! Strategy events flow one way, to the listener. A few decisions have to be
//! made while a message is being built or parsed, so they go through this
//! trait instead: every client of a strategy shares one implementation.

use serde_json::{Map, Value};

use crate::job::Algorithm;

pub trait ClientHooks: Send + Sync {
    /// Adjust the params of a default-dialect `login` request before it is
    /// sent.
    fn on_login(&self, _client_id: usize, _params: &mut Map<String, Value>) {}

    /// Whether jobs for `algorithm` are acceptable. A refused algorithm
    /// fails the login, or drops the notification once logged in.
    fn verify_algorithm(&self, _client_id: usize, _algorithm: Algorithm) -> bool {
        true
    }
}

/// Accepts everything and changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ClientHooks for NoHooks {}

/// Restricts clients to the algorithms the hashing side can run, and
/// offers exactly those at login.
#[derive(Debug, Clone)]
pub struct AlgorithmFilter {
    algorithms: Vec<Algorithm>,
}

impl AlgorithmFilter {
    pub fn new(algorithms: Vec<Algorithm>) -> Self {
        Self { algorithms }
    }
}

impl ClientHooks for AlgorithmFilter {
    fn on_login(&self, _client_id: usize, params: &mut Map<String, Value>) {
        let names = self.algorithms.iter().map(|a| Value::from(a.to_string()));
        params.insert("algo".to_string(), Value::Array(names.collect()));
    }

    fn verify_algorithm(&self, _client_id: usize, algorithm: Algorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_hooks() {
        let mut params = Map::new();
        NoHooks.on_login(0, &mut params);
        assert!(params.is_empty());
        assert!(NoHooks.verify_algorithm(0, Algorithm::CnR));
    }

    #[test]
    fn test_algorithm_filter() {
        let filter = AlgorithmFilter::new(vec![Algorithm::Rx0, Algorithm::RxWow]);

        let mut params = Map::new();
        params.insert("algo".to_string(), json!(["cn/r"]));
        filter.on_login(1, &mut params);
        assert_eq!(params["algo"], json!(["rx/0", "rx/wow"]));

        assert!(filter.verify_algorithm(1, Algorithm::RxWow));
        assert!(!filter.verify_algorithm(1, Algorithm::KawPow));
    }
}
