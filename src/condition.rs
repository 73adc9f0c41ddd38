//! ABAC condition evaluation
//!
//! Conditions are a closed, explicitly-typed predicate tree over named
//! request-context attributes. Evaluation is pure and total: a predicate
//! referencing an attribute absent from the context evaluates to false
//! (fail-closed), and no input can make evaluation panic. The evaluator
//! holds no state, so it is safe to call from any number of concurrent
//! decision computations.

use crate::types::RequestContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
}

/// Condition predicate tree
///
/// The `op` tag keeps stored policies readable:
/// `{"op": "equals", "attr": "ip_class", "value": "internal"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Every child condition holds
    All { conditions: Vec<Condition> },

    /// At least one child condition holds
    Any { conditions: Vec<Condition> },

    /// Child condition does not hold
    Not { condition: Box<Condition> },

    /// Attribute equals the value
    Equals { attr: String, value: Value },

    /// Attribute is present and differs from the value
    NotEquals { attr: String, value: Value },

    /// Attribute is one of the listed values
    InSet { attr: String, values: Vec<Value> },

    /// Numeric comparison against the attribute
    Compare {
        attr: String,
        cmp: CompareOp,
        value: f64,
    },

    /// Attribute timestamp falls within `[start, end)`
    TimeWindow {
        attr: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Condition {
    /// Convenience: conjunction of conditions
    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All { conditions }
    }

    /// Convenience: disjunction of conditions
    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Any { conditions }
    }

    /// Convenience: negation
    pub fn not(condition: Condition) -> Self {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    /// Convenience: equality predicate
    pub fn equals(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Evaluate the condition against a request context
    ///
    /// An empty `All` evaluates to true (the vacuous condition); an empty
    /// `Any` evaluates to false.
    pub fn evaluate(&self, context: &RequestContext) -> bool {
        match self {
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(context)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(context)),
            Condition::Not { condition } => !condition.evaluate(context),
            Condition::Equals { attr, value } => {
                context.get(attr).map_or(false, |v| v == value)
            }
            Condition::NotEquals { attr, value } => {
                context.get(attr).map_or(false, |v| v != value)
            }
            Condition::InSet { attr, values } => {
                context.get(attr).map_or(false, |v| values.contains(v))
            }
            Condition::Compare { attr, cmp, value } => {
                match context.get(attr).and_then(Value::as_f64) {
                    Some(actual) => match cmp {
                        CompareOp::Gt => actual > *value,
                        CompareOp::Ge => actual >= *value,
                        CompareOp::Lt => actual < *value,
                        CompareOp::Le => actual <= *value,
                    },
                    None => false,
                }
            }
            Condition::TimeWindow { attr, start, end } => {
                match context.get(attr).and_then(parse_instant) {
                    Some(at) => *start <= at && at < *end,
                    None => false,
                }
            }
        }
    }
}

/// Parse a context attribute as an instant: RFC 3339 string or epoch seconds
pub(crate) fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new()
            .with_attribute("ip_class", "internal")
            .with_attribute("clearance", 3)
            .with_attribute("department", "finance")
    }

    #[test]
    fn test_equals() {
        assert!(Condition::equals("ip_class", "internal").evaluate(&ctx()));
        assert!(!Condition::equals("ip_class", "external").evaluate(&ctx()));
    }

    #[test]
    fn test_missing_attribute_is_false() {
        assert!(!Condition::equals("location", "hq").evaluate(&ctx()));
        assert!(!Condition::NotEquals {
            attr: "location".into(),
            value: json!("hq"),
        }
        .evaluate(&ctx()));
        assert!(!Condition::Compare {
            attr: "location".into(),
            cmp: CompareOp::Gt,
            value: 1.0,
        }
        .evaluate(&ctx()));
    }

    #[test]
    fn test_in_set() {
        let cond = Condition::InSet {
            attr: "department".into(),
            values: vec![json!("finance"), json!("legal")],
        };
        assert!(cond.evaluate(&ctx()));

        let cond = Condition::InSet {
            attr: "department".into(),
            values: vec![json!("sales")],
        };
        assert!(!cond.evaluate(&ctx()));
    }

    #[test]
    fn test_numeric_compare() {
        let ge = Condition::Compare {
            attr: "clearance".into(),
            cmp: CompareOp::Ge,
            value: 3.0,
        };
        let gt = Condition::Compare {
            attr: "clearance".into(),
            cmp: CompareOp::Gt,
            value: 3.0,
        };
        assert!(ge.evaluate(&ctx()));
        assert!(!gt.evaluate(&ctx()));
    }

    #[test]
    fn test_compare_non_numeric_is_false() {
        let cond = Condition::Compare {
            attr: "department".into(),
            cmp: CompareOp::Lt,
            value: 10.0,
        };
        assert!(!cond.evaluate(&ctx()));
    }

    #[test]
    fn test_boolean_combinators() {
        let cond = Condition::all(vec![
            Condition::equals("ip_class", "internal"),
            Condition::any(vec![
                Condition::equals("department", "finance"),
                Condition::equals("department", "legal"),
            ]),
            Condition::not(Condition::equals("department", "sales")),
        ]);
        assert!(cond.evaluate(&ctx()));
    }

    #[test]
    fn test_empty_combinators() {
        assert!(Condition::all(vec![]).evaluate(&ctx()));
        assert!(!Condition::any(vec![]).evaluate(&ctx()));
    }

    #[test]
    fn test_time_window() {
        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let context = RequestContext::new().with_timestamp(Utc::now());

        let inside = Condition::TimeWindow {
            attr: "timestamp".into(),
            start,
            end,
        };
        assert!(inside.evaluate(&context));

        let past = Condition::TimeWindow {
            attr: "timestamp".into(),
            start: start - chrono::Duration::days(2),
            end: start - chrono::Duration::days(1),
        };
        assert!(!past.evaluate(&context));
    }

    #[test]
    fn test_time_window_epoch_seconds() {
        let now = Utc::now();
        let context = RequestContext::new().with_attribute("timestamp", now.timestamp());
        let cond = Condition::TimeWindow {
            attr: "timestamp".into(),
            start: now - chrono::Duration::minutes(5),
            end: now + chrono::Duration::minutes(5),
        };
        assert!(cond.evaluate(&context));
    }

    #[test]
    fn test_serde_round_trip() {
        let cond = Condition::all(vec![
            Condition::equals("ip_class", "internal"),
            Condition::Compare {
                attr: "clearance".into(),
                cmp: CompareOp::Ge,
                value: 2.0,
            },
        ]);
        let encoded = serde_json::to_string(&cond).unwrap();
        let decoded: Condition = serde_json::from_str(&encoded).unwrap();
        assert_eq!(cond, decoded);
    }

    fn arb_value() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i32>().prop_map(serde_json::Value::from),
            "[a-z]{0,8}".prop_map(serde_json::Value::from),
        ]
    }

    fn arb_condition() -> impl Strategy<Value = Condition> {
        let leaf = prop_oneof![
            ("[a-z]{1,6}", arb_value()).prop_map(|(attr, value)| Condition::Equals {
                attr,
                value
            }),
            ("[a-z]{1,6}", arb_value()).prop_map(|(attr, value)| Condition::NotEquals {
                attr,
                value
            }),
            ("[a-z]{1,6}", prop::collection::vec(arb_value(), 0..4))
                .prop_map(|(attr, values)| Condition::InSet { attr, values }),
            ("[a-z]{1,6}", any::<f64>()).prop_map(|(attr, value)| Condition::Compare {
                attr,
                cmp: CompareOp::Gt,
                value
            }),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4)
                    .prop_map(|conditions| Condition::All { conditions }),
                prop::collection::vec(inner.clone(), 0..4)
                    .prop_map(|conditions| Condition::Any { conditions }),
                inner.prop_map(|c| Condition::not(c)),
            ]
        })
    }

    proptest! {
        // Evaluation must be total over arbitrary trees and contexts.
        #[test]
        fn evaluation_never_panics(
            cond in arb_condition(),
            keys in prop::collection::vec("[a-z]{1,6}", 0..6),
            vals in prop::collection::vec(any::<i32>(), 0..6),
        ) {
            let mut context = RequestContext::new();
            for (k, v) in keys.iter().zip(vals.iter()) {
                context = context.with_attribute(k.clone(), *v);
            }
            let _ = cond.evaluate(&context);
        }
    }
}
