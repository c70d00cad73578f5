//! Priority rule matcher (C5): `route_message` evaluates the active,
//! published rule set against an envelope and emits a `RoutingDecision`.
//!
//! The authoritative rule list (`rules`) is insertion-ordered and mutated
//! only by `register_rule`/`unregister_rule`; a derived, pre-sorted,
//! pre-compiled snapshot (`snapshot`) is what `route_message` actually
//! reads, so matching never blocks on the registration lock. This mirrors
//! `server::state`'s `RwLock<Arc<...>>` copy-on-write pattern rather than
//! an `arc-swap` dependency the teacher does not have.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use gateway_protocol::value::GatewayMap;
use gateway_protocol::{Condition, Envelope, GatewayValue, LogicalOperator, Operator, RoutingRule};
use tracing::warn;

/// `(matched_rules, target_system_ids)`, both in priority order with target
/// ids deduplicated preserving first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingDecision {
    pub matched_rules: Vec<String>,
    pub target_system_ids: Vec<String>,
}

struct CompiledRule {
    rule: RoutingRule,
    pattern: Option<glob::Pattern>,
}

pub struct RoutingEngine {
    rules: RwLock<Vec<RoutingRule>>,
    snapshot: RwLock<Arc<Vec<CompiledRule>>>,
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingEngine {
    pub fn new() -> Self {
        RoutingEngine { rules: RwLock::new(Vec::new()), snapshot: RwLock::new(Arc::new(Vec::new())) }
    }

    /// Register (or replace, by id) a rule and rebuild the match snapshot.
    /// Idempotent: registering the same id twice with identical content is
    /// a no-op in effect, matching `register_rule(R); register_rule(R) ≡
    /// register_rule(R)`.
    pub fn register_rule(&self, rule: RoutingRule) {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(slot) => *slot = rule,
            None => rules.push(rule),
        }
        self.rebuild_snapshot(&rules);
    }

    pub fn unregister_rule(&self, id: &str) {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        rules.retain(|r| r.id != id);
        self.rebuild_snapshot(&rules);
    }

    fn rebuild_snapshot(&self, rules: &[RoutingRule]) {
        let mut compiled: Vec<CompiledRule> = rules
            .iter()
            .filter(|r| r.is_active && r.is_published)
            .map(|r| {
                let pattern = r.source_config.pattern.as_deref().and_then(|p| match glob::Pattern::new(p) {
                    Ok(pat) => Some(pat),
                    Err(e) => {
                        warn!(rule_id = %r.id, pattern = p, error = %e, "invalid source pattern, rule will never match on pattern");
                        None
                    }
                });
                CompiledRule { rule: r.clone(), pattern }
            })
            .collect();
        // Stable sort: equal-priority rules keep their insertion-order position.
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        *self.snapshot.write().expect("snapshot lock poisoned") = Arc::new(compiled);
    }

    /// Evaluate `envelope` against the current rule snapshot.
    ///
    /// `is_target_active` is consulted by the caller's owning registry
    /// (the Forwarder Manager owns `TargetSystem.is_active`, not the
    /// Routing Engine — see spec.md §3 ownership) to keep inactive targets
    /// out of `target_system_ids` even though a matching rule still
    /// references them.
    pub fn route_message(&self, envelope: &Envelope, is_target_active: impl Fn(&str) -> bool) -> RoutingDecision {
        let snapshot = self.snapshot.read().expect("snapshot lock poisoned").clone();

        let mut matched_rules = Vec::new();
        let mut target_system_ids = Vec::new();
        let mut seen_targets = std::collections::HashSet::new();

        for compiled in snapshot.iter() {
            if !source_filter_matches(compiled, envelope) {
                continue;
            }
            if !conditions_match(&compiled.rule.conditions, compiled.rule.logical_operator, envelope) {
                continue;
            }
            matched_rules.push(compiled.rule.id.clone());
            for target_id in &compiled.rule.targets {
                if is_target_active(target_id) && seen_targets.insert(target_id.clone()) {
                    target_system_ids.push(target_id.clone());
                }
            }
        }

        if !matched_rules.is_empty() {
            let mut rules = self.rules.write().expect("rules lock poisoned");
            let now = Utc::now();
            for id in &matched_rules {
                if let Some(rule) = rules.iter_mut().find(|r| &r.id == id) {
                    rule.match_count += 1;
                    rule.last_match_at = Some(now);
                }
            }
        }

        RoutingDecision { matched_rules, target_system_ids }
    }
}

fn source_filter_matches(compiled: &CompiledRule, envelope: &Envelope) -> bool {
    let config = &compiled.rule.source_config;
    if !config.protocols.is_empty() && !config.protocols.contains(&envelope.source_protocol) {
        return false;
    }
    if !config.source_ids.is_empty() && !config.source_ids.iter().any(|id| id == &envelope.data_source_id) {
        return false;
    }
    if let Some(pattern) = &compiled.pattern {
        let subject = envelope.topic.as_deref().unwrap_or(&envelope.data_source_id);
        if !pattern.matches(subject) {
            return false;
        }
    }
    true
}

fn conditions_match(conditions: &[Condition], logical_operator: LogicalOperator, envelope: &Envelope) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let mut evaluated = conditions.iter().map(|c| eval_condition(envelope, c));
    match logical_operator {
        LogicalOperator::And => evaluated.all(|b| b),
        LogicalOperator::Or => evaluated.any(|b| b),
    }
}

fn eval_condition(envelope: &Envelope, condition: &Condition) -> bool {
    let actual = resolve_envelope_path(envelope, &condition.field_path);
    match condition.operator {
        Operator::Eq => values_equal(actual.as_ref(), &condition.value),
        Operator::Neq => !values_equal(actual.as_ref(), &condition.value),
        Operator::Gt => numeric_cmp(actual.as_ref(), &condition.value, |a, b| a > b),
        Operator::Gte => numeric_cmp(actual.as_ref(), &condition.value, |a, b| a >= b),
        Operator::Lt => numeric_cmp(actual.as_ref(), &condition.value, |a, b| a < b),
        Operator::Lte => numeric_cmp(actual.as_ref(), &condition.value, |a, b| a <= b),
        Operator::In => membership(actual.as_ref(), &condition.value),
        Operator::NotIn => !membership(actual.as_ref(), &condition.value),
        Operator::Contains => contains(actual.as_ref(), &condition.value),
        Operator::NotContains => !contains(actual.as_ref(), &condition.value),
    }
}

/// Resolve a dot-delimited path against the envelope's known top-level
/// fields, falling through to `GatewayValue::get_path` for anything nested
/// under `parsed_data`/`headers`. Missing paths yield `None` rather than
/// failing, matching spec.md §4.4.
pub fn resolve_envelope_path(envelope: &Envelope, path: &str) -> Option<GatewayValue> {
    let mut parts = path.splitn(2, '.');
    let head = parts.next()?;
    let rest = parts.next();

    let value = match head {
        "message_id" => Some(GatewayValue::String(envelope.message_id.to_string())),
        "source_protocol" => Some(GatewayValue::String(envelope.source_protocol.to_string())),
        "data_source_id" => Some(GatewayValue::String(envelope.data_source_id.clone())),
        "source_address" => envelope.source_address.clone().map(GatewayValue::String),
        "source_port" => envelope.source_port.map(|p| GatewayValue::Int(p as i64)),
        "adapter_name" => envelope.adapter_name.clone().map(GatewayValue::String),
        "connection_id" => envelope.connection_id.clone().map(GatewayValue::String),
        "topic" => envelope.topic.clone().map(GatewayValue::String),
        "qos" => envelope.qos.map(|q| GatewayValue::Int(q as i64)),
        "parse_error" => envelope.parse_error.clone().map(GatewayValue::String),
        "parsed_data" => envelope.parsed_data.clone(),
        "headers" => {
            let mut map = GatewayMap::new();
            for (k, v) in &envelope.headers {
                map.insert(k.clone(), GatewayValue::String(v.clone()));
            }
            Some(GatewayValue::Map(map))
        }
        _ => None,
    }?;

    match rest {
        Some(sub_path) => value.get_path(sub_path).cloned(),
        None => Some(value),
    }
}

fn values_equal(actual: Option<&GatewayValue>, expected: &GatewayValue) -> bool {
    match actual {
        None => matches!(expected, GatewayValue::Null),
        Some(actual) => match (actual, expected) {
            (GatewayValue::Int(_) | GatewayValue::Float(_), GatewayValue::Int(_) | GatewayValue::Float(_)) => {
                actual.as_f64() == expected.as_f64()
            }
            _ => actual == expected,
        },
    }
}

fn numeric_cmp(actual: Option<&GatewayValue>, expected: &GatewayValue, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(GatewayValue::as_f64), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn membership(actual: Option<&GatewayValue>, expected: &GatewayValue) -> bool {
    let Some(actual) = actual else { return false };
    match expected {
        GatewayValue::List(items) => items.iter().any(|item| values_equal(Some(actual), item)),
        _ => false,
    }
}

fn contains(actual: Option<&GatewayValue>, expected: &GatewayValue) -> bool {
    let Some(actual) = actual else { return false };
    match actual {
        GatewayValue::String(s) => matches!(expected, GatewayValue::String(needle) if s.contains(needle.as_str())),
        GatewayValue::List(items) => items.iter().any(|item| values_equal(Some(item), expected)),
        _ => false,
    }
}
