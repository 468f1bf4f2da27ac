//! Typed access to contract payloads
//!
//! Payload shapes drift between template versions, so every numeric or
//! status field is read through an ordered chain of extractors: the first
//! extractor that yields a value wins.

use crate::ledger::template::{template_matches_suffix, AMULET_TEMPLATE, LOCKED_AMULET_TEMPLATE};
use crate::ledger::types::Contract;
use serde_json::Value;
use std::sync::OnceLock;

pub type Extractor<T> = Box<dyn Fn(&Value) -> Option<T> + Send + Sync>;

/// Walk a dotted path (`amount.initialAmount`) through nested objects
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// JSON numbers and numeric strings (the ledger encodes decimals as strings)
pub fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Strings, or variant objects of the form `{"tag": "..."}`
pub fn textual(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj.get("tag").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Ordered fallback of extractors
pub struct ExtractorChain<T> {
    extractors: Vec<Extractor<T>>,
}

impl<T> Default for ExtractorChain<T> {
    fn default() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }
}

impl<T> ExtractorChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Value) -> Option<T> + Send + Sync + 'static,
    {
        self.extractors.push(Box::new(extractor));
        self
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// First value any extractor yields, in chain order
    pub fn extract(&self, value: &Value) -> Option<T> {
        self.extractors.iter().find_map(|f| f(value))
    }
}

impl ExtractorChain<f64> {
    /// Chain reading the first numeric value among `paths`
    pub fn numeric_paths(paths: &[&'static str]) -> Self {
        paths.iter().copied().fold(Self::new(), |chain, path| {
            chain.with(move |v| value_at(v, path).and_then(numeric))
        })
    }
}

impl ExtractorChain<String> {
    pub fn text_paths(paths: &[&'static str]) -> Self {
        paths.iter().copied().fold(Self::new(), |chain, path| {
            chain.with(move |v| value_at(v, path).and_then(textual))
        })
    }
}

/// Amount of an amulet holding
pub fn amulet_amount_chain() -> &'static ExtractorChain<f64> {
    static CHAIN: OnceLock<ExtractorChain<f64>> = OnceLock::new();
    CHAIN.get_or_init(|| {
        ExtractorChain::numeric_paths(&["amount.initialAmount", "initialAmount", "amount"])
    })
}

/// Amount held by a locked amulet, which wraps the amulet record
pub fn locked_amount_chain() -> &'static ExtractorChain<f64> {
    static CHAIN: OnceLock<ExtractorChain<f64>> = OnceLock::new();
    CHAIN.get_or_init(|| {
        ExtractorChain::numeric_paths(&[
            "amulet.amount.initialAmount",
            "amulet.initialAmount",
            "amount.initialAmount",
        ])
    })
}

pub fn owner_chain() -> &'static ExtractorChain<String> {
    static CHAIN: OnceLock<ExtractorChain<String>> = OnceLock::new();
    CHAIN.get_or_init(|| ExtractorChain::text_paths(&["owner", "amulet.owner", "holder", "provider"]))
}

/// Status-like field used for per-template tallies
pub fn status_chain() -> &'static ExtractorChain<String> {
    static CHAIN: OnceLock<ExtractorChain<String>> = OnceLock::new();
    CHAIN.get_or_init(|| ExtractorChain::text_paths(&["status", "state", "phase"]))
}

/// Payload interpreted by template
#[derive(Debug, Clone, PartialEq)]
pub enum ContractPayload<'a> {
    Amulet {
        owner: Option<String>,
        amount: Option<f64>,
    },
    LockedAmulet {
        owner: Option<String>,
        amount: Option<f64>,
        lock_holders: Vec<String>,
        expires_at: Option<String>,
    },
    Generic(&'a Value),
}

impl<'a> ContractPayload<'a> {
    pub fn classify(contract: &'a Contract) -> Self {
        let payload = &contract.payload;
        if template_matches_suffix(&contract.template_id, LOCKED_AMULET_TEMPLATE) {
            let lock_holders = value_at(payload, "lock.holders")
                .and_then(Value::as_array)
                .map(|holders| {
                    holders
                        .iter()
                        .filter_map(|h| h.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let expires_at = value_at(payload, "lock.expiresAt")
                .and_then(Value::as_str)
                .map(str::to_string);
            ContractPayload::LockedAmulet {
                owner: owner_chain().extract(payload),
                amount: locked_amount_chain().extract(payload),
                lock_holders,
                expires_at,
            }
        } else if template_matches_suffix(&contract.template_id, AMULET_TEMPLATE) {
            ContractPayload::Amulet {
                owner: owner_chain().extract(payload),
                amount: amulet_amount_chain().extract(payload),
            }
        } else {
            ContractPayload::Generic(payload)
        }
    }

    /// Holding amount for amulet-like payloads
    pub fn amount(&self) -> Option<f64> {
        match self {
            ContractPayload::Amulet { amount, .. } | ContractPayload::LockedAmulet { amount, .. } => {
                *amount
            }
            ContractPayload::Generic(_) => None,
        }
    }
}

/// Amount of an amulet contract; used as a sum pick function
pub fn amulet_amount(contract: &Contract) -> Option<f64> {
    amulet_amount_chain().extract(&contract.payload)
}

pub fn locked_amount(contract: &Contract) -> Option<f64> {
    locked_amount_chain().extract(&contract.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract(template_id: &str, payload: Value) -> Contract {
        Contract {
            contract_id: "00ab".to_string(),
            template_id: template_id.to_string(),
            payload,
            created_at: None,
        }
    }

    #[test]
    fn test_numeric_accepts_strings() {
        assert_eq!(numeric(&json!("12.5")), Some(12.5));
        assert_eq!(numeric(&json!(3)), Some(3.0));
        assert_eq!(numeric(&json!("abc")), None);
        assert_eq!(numeric(&json!(null)), None);
    }

    #[test]
    fn test_chain_first_match_wins() {
        let chain = ExtractorChain::new()
            .with(|v: &Value| value_at(v, "a").and_then(numeric))
            .with(|v: &Value| value_at(v, "b").and_then(numeric));
        assert_eq!(chain.len(), 2);

        assert_eq!(chain.extract(&json!({"a": "1", "b": 2})), Some(1.0));
        assert_eq!(chain.extract(&json!({"b": 2})), Some(2.0));
        assert_eq!(chain.extract(&json!({"c": 2})), None);
    }

    #[test]
    fn test_classify_amulet() {
        let c = contract(
            "pkg:Splice.Amulet:Amulet",
            json!({"owner": "alice::1220", "amount": {"initialAmount": "100.5"}}),
        );
        let payload = ContractPayload::classify(&c);
        assert_eq!(payload.amount(), Some(100.5));
        assert!(matches!(payload, ContractPayload::Amulet { owner: Some(ref o), .. } if o == "alice::1220"));
    }

    #[test]
    fn test_classify_locked_amulet() {
        let c = contract(
            "pkg:Splice.Amulet:LockedAmulet",
            json!({
                "amulet": {"owner": "bob", "amount": {"initialAmount": "40"}},
                "lock": {"holders": ["dso"], "expiresAt": "2025-01-01T00:00:00Z"}
            }),
        );
        match ContractPayload::classify(&c) {
            ContractPayload::LockedAmulet {
                owner,
                amount,
                lock_holders,
                expires_at,
            } => {
                assert_eq!(owner.as_deref(), Some("bob"));
                assert_eq!(amount, Some(40.0));
                assert_eq!(lock_holders, vec!["dso".to_string()]);
                assert!(expires_at.is_some());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_generic_and_status() {
        let c = contract("pkg:Splice.Dso:Vote", json!({"status": {"tag": "Accepted"}}));
        assert!(matches!(ContractPayload::classify(&c), ContractPayload::Generic(_)));
        assert_eq!(status_chain().extract(&c.payload).as_deref(), Some("Accepted"));
    }
}
