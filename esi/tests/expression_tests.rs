//! spec.md §8 property 4: any comparison where at least one operand is
//! undefined evaluates to `false`. Exercised through the public
//! `esi::evaluate` entry point rather than the expression engine's internals.

use std::collections::HashMap;

use esi::{quote, Variables};
use http::HeaderMap;
use url::Url;

struct NoVars;

impl Variables for NoVars {
    fn get_value(&self, _name: &str) -> Option<String> {
        None
    }

    fn get_sub_value(&self, _name: &str, _key: &str) -> Option<String> {
        None
    }
}

struct MapVars(HashMap<&'static str, String>);

impl Variables for MapVars {
    fn get_value(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }

    fn get_sub_value(&self, _name: &str, _key: &str) -> Option<String> {
        None
    }
}

#[test]
fn equality_against_undefined_is_false() {
    assert!(!esi::evaluate("$(NOPE) == 'x'", &NoVars));
    assert!(!esi::evaluate("'x' == $(NOPE)", &NoVars));
}

#[test]
fn inequality_against_undefined_is_false() {
    assert!(!esi::evaluate("$(NOPE) != 'x'", &NoVars));
}

#[test]
fn ordering_comparisons_against_undefined_are_false() {
    assert!(!esi::evaluate("$(NOPE) > 1", &NoVars));
    assert!(!esi::evaluate("$(NOPE) < 1", &NoVars));
    assert!(!esi::evaluate("$(NOPE) >= 1", &NoVars));
    assert!(!esi::evaluate("$(NOPE) <= 1", &NoVars));
}

#[test]
fn both_operands_undefined_is_still_false() {
    assert!(!esi::evaluate("$(NOPE) == $(ALSO_NOPE)", &NoVars));
}

#[test]
fn defined_variable_compares_normally() {
    let vars = MapVars(HashMap::from([("FOO", quote("bar"))]));
    assert!(esi::evaluate("$(FOO) == 'bar'", &vars));
    assert!(!esi::evaluate("$(FOO) == 'baz'", &vars));
}

#[test]
fn numeric_comparison_with_defined_variable() {
    let vars = MapVars(HashMap::from([("N", "5".to_string())]));
    assert!(esi::evaluate("$(N) > 3", &vars));
    assert!(!esi::evaluate("$(N) < 3", &vars));
}

#[test]
fn and_or_not_short_circuit_on_plain_booleans() {
    assert!(esi::evaluate("true & !false", &NoVars));
    assert!(esi::evaluate("false | true", &NoVars));
    assert!(!esi::evaluate("true & false", &NoVars));
}

#[test]
fn malformed_expression_is_false_not_an_error() {
    assert!(!esi::evaluate("(1 == 1", &NoVars));
    assert!(!esi::evaluate("", &NoVars));
}

#[test]
fn request_variables_integrate_with_evaluate() {
    let mut headers = HeaderMap::new();
    headers.insert("host", http::HeaderValue::from_static("example.com"));
    let vars = esi::RequestVariables::from_request(&Url::parse("http://x/").unwrap(), &headers);
    assert!(esi::evaluate("$(HTTP_HOST) == 'example.com'", &vars));
    assert!(!esi::evaluate("$(HTTP_REFERER) == 'anything'", &vars));
}
