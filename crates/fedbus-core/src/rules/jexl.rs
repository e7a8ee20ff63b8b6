//! JEXL-backed rule engine.
//!
//! Rules are matched against each fact with a JEXL `when` clause. The fact is
//! exposed to expressions as `fact.payload`, `fact.headers` and
//! `fact.properties`; it is always passed as context, never interpolated into
//! expression text.

use std::collections::{HashMap, VecDeque};

use fedbus_types::Message;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::definition::{RuleDefinition, RuleFile};
use super::{ChannelCallback, FactSession, RuleEngine, RuleError};

/// Default rule engine: compiles TOML rule files into [`JexlSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JexlRuleEngine;

impl JexlRuleEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RuleEngine for JexlRuleEngine {
    fn build_session(&self, source: &str) -> Result<Box<dyn FactSession>, RuleError> {
        Ok(Box::new(JexlSession::compile(source)?))
    }
}

/// A stateful rule session: rules sorted by salience, pending facts, and the
/// channel callbacks activations are emitted on.
pub struct JexlSession {
    rules: Vec<RuleDefinition>,
    channels: HashMap<String, ChannelCallback>,
    agenda: VecDeque<(String, Message)>,
    disposed: bool,
}

impl JexlSession {
    /// Parse a rule file and every expression in it.
    pub fn compile(source: &str) -> Result<Self, RuleError> {
        let file = RuleFile::parse(source)?;
        for rule in &file.rules {
            check_syntax(rule)?;
        }
        Ok(Self::from_rules(file.rules))
    }

    pub fn from_rules(mut rules: Vec<RuleDefinition>) -> Self {
        // Stable sort keeps declaration order among equal salience.
        rules.sort_by(|a, b| b.salience.cmp(&a.salience));
        Self {
            rules,
            channels: HashMap::new(),
            agenda: VecDeque::new(),
            disposed: false,
        }
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Facts inserted but not yet fired.
    pub fn pending_facts(&self) -> usize {
        self.agenda.len()
    }

    fn activate(
        evaluator: &jexl_eval::Evaluator<'static>,
        rule: &RuleDefinition,
        fact: &Message,
        context: &Value,
    ) -> Result<Option<Message>, RuleError> {
        let matched = evaluate(evaluator, &rule.when, context).map(|v| truthy(&v))?;
        if !matched {
            return Ok(None);
        }

        let mut derived = fact.clone();
        if let Some(expr) = &rule.payload {
            derived.set_payload(evaluate(evaluator, expr, context)?);
        }
        for (header, expr) in &rule.headers {
            derived.set_header(header.clone(), evaluate(evaluator, expr, context)?);
        }
        Ok(Some(derived))
    }
}

impl FactSession for JexlSession {
    fn insert(&mut self, entry_point: &str, fact: Message) -> Result<(), RuleError> {
        if self.disposed {
            return Err(RuleError::Disposed);
        }
        self.agenda.push_back((entry_point.to_string(), fact));
        Ok(())
    }

    fn fire_all_rules(&mut self) -> Result<usize, RuleError> {
        if self.disposed {
            return Err(RuleError::Disposed);
        }

        let evaluator = evaluator();
        let mut fired = 0;

        while let Some((entry_point, fact)) = self.agenda.pop_front() {
            let context = fact_context(&fact);

            for rule in self.rules.iter().filter(|r| r.entry_point == entry_point) {
                let derived = match Self::activate(&evaluator, rule, &fact, &context) {
                    Ok(Some(derived)) => derived,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(
                            rule = %rule.name,
                            message_id = %fact.id(),
                            error = %e,
                            "rule evaluation failed, skipping"
                        );
                        continue;
                    }
                };

                fired += 1;
                match self.channels.get(&rule.channel) {
                    Some(callback) => {
                        debug!(
                            rule = %rule.name,
                            channel = %rule.channel,
                            message_id = %fact.id(),
                            "rule fired"
                        );
                        callback(derived);
                    }
                    None => debug!(
                        rule = %rule.name,
                        channel = %rule.channel,
                        "rule fired on unregistered channel, dropping"
                    ),
                }
            }
        }

        Ok(fired)
    }

    fn register_channel(&mut self, name: &str, callback: ChannelCallback) {
        self.channels.insert(name.to_string(), callback);
    }

    fn unregister_channel(&mut self, name: &str) -> bool {
        self.channels.remove(name).is_some()
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.channels.clear();
        self.agenda.clear();
    }
}

impl std::fmt::Debug for JexlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.channels.keys().collect();
        channels.sort();
        f.debug_struct("JexlSession")
            .field("rules", &self.rule_names())
            .field("channels", &channels)
            .field("pending", &self.agenda.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

fn check_syntax(rule: &RuleDefinition) -> Result<(), RuleError> {
    let parse = |field: &str, expression: &str| {
        jexl_parser::Parser::parse(expression).map(drop).map_err(|e| {
            RuleError::Invalid(format!(
                "rule '{}': {field} '{expression}' does not parse: {e}",
                rule.name
            ))
        })
    };

    parse("when", &rule.when)?;
    if let Some(payload) = &rule.payload {
        parse("payload", payload)?;
    }
    for (header, expression) in &rule.headers {
        parse(&format!("header '{header}'"), expression)?;
    }
    Ok(())
}

fn fact_context(fact: &Message) -> Value {
    json!({
        "fact": {
            "payload": fact.payload(),
            "headers": fact.headers(),
            "properties": fact.properties(),
        }
    })
}

fn evaluate(
    evaluator: &jexl_eval::Evaluator<'static>,
    expression: &str,
    context: &Value,
) -> Result<Value, RuleError> {
    evaluator
        .eval_in_context(expression, context)
        .map_err(|e| RuleError::Evaluation(format!("'{expression}': {e}")))
}

/// JavaScript-like truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluator with the standard string transforms registered.
///
/// Built per firing: transforms are boxed closures that are not `Send`.
fn evaluator() -> jexl_eval::Evaluator<'static> {
    fn str_arg(args: &[Value], idx: usize) -> &str {
        args.get(idx).and_then(Value::as_str).unwrap_or("")
    }

    jexl_eval::Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).to_uppercase()))
        })
        .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
        .with_transform("contains", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).contains(str_arg(args, 1))))
        })
        .with_transform("startsWith", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
        })
        .with_transform("endsWith", |args: &[Value]| {
            Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Outbox = Arc<Mutex<Vec<Message>>>;

    fn collect_into(session: &mut JexlSession, channel: &str) -> Outbox {
        let outbox: Outbox = Arc::default();
        let sink = Arc::clone(&outbox);
        session.register_channel(
            channel,
            Box::new(move |m| sink.lock().unwrap().push(m)),
        );
        outbox
    }

    const POTATO_RULES: &str = r#"
[[rule]]
name = "potato to b"
when = "fact.payload == 'potato' && fact.headers.source == 'a'"
channel = "b"
"#;

    #[test]
    fn potato_from_a_goes_to_b_only() {
        let mut session = JexlSession::compile(POTATO_RULES).unwrap();
        let to_a = collect_into(&mut session, "a");
        let to_b = collect_into(&mut session, "b");

        session
            .insert("inbound", Message::new("potato").with_header("source", "a"))
            .unwrap();
        session
            .insert("inbound", Message::new("tomato").with_header("source", "a"))
            .unwrap();

        assert_eq!(session.fire_all_rules().unwrap(), 1);
        assert!(to_a.lock().unwrap().is_empty());
        let delivered = to_b.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload(), &json!("potato"));
    }

    #[test]
    fn derived_payload_and_headers() {
        let mut session = JexlSession::compile(
            r#"
[[rule]]
name = "greet"
when = "fact.payload|length > 0"
channel = "outbound"
payload = "'Hello ' + fact.payload"
[rule.headers]
route = "'rules'"
"#,
        )
        .unwrap();
        let outbox = collect_into(&mut session, "outbound");

        session
            .insert("inbound", Message::new("world").with_property("k", "v"))
            .unwrap();
        session.fire_all_rules().unwrap();

        let out = outbox.lock().unwrap();
        assert_eq!(out[0].payload(), &json!("Hello world"));
        assert_eq!(out[0].header("route"), Some(&json!("rules")));
        assert_eq!(out[0].property("k"), Some("v"));
    }

    #[test]
    fn higher_salience_fires_first() {
        let mut session = JexlSession::compile(
            r#"
[[rule]]
name = "low"
when = "true"
channel = "log"
payload = "'low'"

[[rule]]
name = "high"
salience = 5
when = "true"
channel = "log"
payload = "'high'"

[[rule]]
name = "also-low"
when = "true"
channel = "log"
payload = "'also-low'"
"#,
        )
        .unwrap();
        assert_eq!(session.rule_names(), vec!["high", "low", "also-low"]);

        let log = collect_into(&mut session, "log");
        session.insert("inbound", Message::empty()).unwrap();
        assert_eq!(session.fire_all_rules().unwrap(), 3);

        let order: Vec<_> = log.lock().unwrap().iter().map(|m| m.payload().clone()).collect();
        assert_eq!(order, vec![json!("high"), json!("low"), json!("also-low")]);
    }

    #[test]
    fn facts_are_retracted_after_firing() {
        let mut session = JexlSession::compile(POTATO_RULES).unwrap();
        let to_b = collect_into(&mut session, "b");

        session
            .insert("inbound", Message::new("potato").with_header("source", "a"))
            .unwrap();
        assert_eq!(session.fire_all_rules().unwrap(), 1);
        assert_eq!(session.pending_facts(), 0);
        assert_eq!(session.fire_all_rules().unwrap(), 0);
        assert_eq!(to_b.lock().unwrap().len(), 1);
    }

    #[test]
    fn other_entry_points_are_not_matched() {
        let mut session = JexlSession::compile(POTATO_RULES).unwrap();
        let to_b = collect_into(&mut session, "b");

        session
            .insert("audit", Message::new("potato").with_header("source", "a"))
            .unwrap();
        assert_eq!(session.fire_all_rules().unwrap(), 0);
        assert!(to_b.lock().unwrap().is_empty());
    }

    #[test]
    fn unregistered_channel_drops_activation() {
        let mut session = JexlSession::compile(POTATO_RULES).unwrap();
        let to_b = collect_into(&mut session, "b");
        assert!(session.unregister_channel("b"));
        assert!(!session.unregister_channel("b"));

        session
            .insert("inbound", Message::new("potato").with_header("source", "a"))
            .unwrap();
        assert_eq!(session.fire_all_rules().unwrap(), 1);
        assert!(to_b.lock().unwrap().is_empty());
    }

    #[test]
    fn rule_failing_at_evaluation_is_skipped_for_that_fact() {
        let mut session = JexlSession::compile(
            r#"
[[rule]]
name = "unknown transform"
salience = 1
when = "fact.payload|reverse == 'otatop'"
channel = "out"

[[rule]]
name = "fine"
when = "fact.payload|startsWith('pot')"
channel = "out"
"#,
        )
        .unwrap();
        let out = collect_into(&mut session, "out");

        session.insert("inbound", Message::new("potato")).unwrap();
        assert_eq!(session.fire_all_rules().unwrap(), 1);
        assert_eq!(out.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_when_clause_fails_compile() {
        let err = JexlSession::compile(
            r#"
[[rule]]
name = "broken"
when = "fact.payload =="
channel = "out"
"#,
        )
        .unwrap_err();
        assert!(matches!(&err, RuleError::Invalid(msg) if msg.contains("broken") && msg.contains("when")));
    }

    #[test]
    fn malformed_payload_and_header_expressions_fail_compile() {
        let bad_payload = r#"
[[rule]]
name = "p"
when = "true"
channel = "out"
payload = "'Hello ' +"
"#;
        assert!(matches!(
            JexlSession::compile(bad_payload),
            Err(RuleError::Invalid(msg)) if msg.contains("payload")
        ));

        let bad_header = r#"
[[rule]]
name = "h"
when = "true"
channel = "out"
[rule.headers]
route = "fact.headers."
"#;
        assert!(matches!(
            JexlSession::compile(bad_header),
            Err(RuleError::Invalid(msg)) if msg.contains("header 'route'")
        ));
    }

    #[test]
    fn transforms_are_available() {
        let evaluator = evaluator();
        let ctx = fact_context(&Message::new("  MiXeD  "));

        let lowered = evaluate(&evaluator, "fact.payload|trim|lower", &ctx).unwrap();
        assert_eq!(lowered, json!("mixed"));
        let ends = evaluate(&evaluator, "fact.payload|trim|endsWith('eD')", &ctx).unwrap();
        assert_eq!(ends, json!(true));
        let has = evaluate(&evaluator, "fact.payload|contains('XeD')", &ctx).unwrap();
        assert_eq!(has, json!(true));
    }

    #[test]
    fn disposed_session_refuses_facts() {
        let mut session = JexlSession::compile(POTATO_RULES).unwrap();
        session.insert("inbound", Message::new("potato")).unwrap();
        session.dispose();

        assert!(matches!(
            session.insert("inbound", Message::new("x")),
            Err(RuleError::Disposed)
        ));
        assert!(matches!(session.fire_all_rules(), Err(RuleError::Disposed)));
        assert_eq!(session.pending_facts(), 0);
    }

    #[test]
    fn engine_reports_invalid_source() {
        let engine = JexlRuleEngine::new();
        assert!(matches!(
            engine.build_session("[[rule]]\nname = 1"),
            Err(RuleError::Parse(_))
        ));
    }

    #[test]
    fn truthiness_matches_javascript() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
    }
}
