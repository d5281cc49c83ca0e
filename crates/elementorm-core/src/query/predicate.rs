//! Filter predicates, projections and key selectors.
//!
//! These are the payloads of plan operations. Structured variants hash by
//! content; closures hash by their [`ElementFn`] identity.

use std::collections::HashSet;
use std::fmt;

use super::function::ElementFn;
use crate::model::{Element, Value};

/// A boolean condition over an element.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field does not equal value (missing fields never match).
    Ne { field: String, value: Value },
    /// Field is less than value.
    Lt { field: String, value: Value },
    /// Field is less than or equal to value.
    Le { field: String, value: Value },
    /// Field is greater than value.
    Gt { field: String, value: Value },
    /// Field is greater than or equal to value.
    Ge { field: String, value: Value },
    /// Field equals one of the values.
    In { field: String, values: Vec<Value> },
    /// Field is missing or null.
    IsNull { field: String },
    /// Field is present and not null.
    IsNotNull { field: String },
    /// String field matches a LIKE pattern (`%` any run, `_` one char).
    Like { field: String, pattern: String },
    /// Element is of the given type.
    OfType(String),
    /// All sub-predicates hold.
    And(Vec<Predicate>),
    /// At least one sub-predicate holds.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
    /// Arbitrary closure.
    Custom(ElementFn<bool>),
}

impl Predicate {
    /// Field equals value.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Field does not equal value.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Field is less than value.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Field is less than or equal to value.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Field is greater than value.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Field is greater than or equal to value.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Field equals one of the values.
    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Field is missing or null.
    pub fn is_null(field: impl Into<String>) -> Self {
        Predicate::IsNull {
            field: field.into(),
        }
    }

    /// Field is present and not null.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Predicate::IsNotNull {
            field: field.into(),
        }
    }

    /// String field matches a LIKE pattern.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Element is of the given type.
    pub fn of_type(element_type: impl Into<String>) -> Self {
        Predicate::OfType(element_type.into())
    }

    /// Named closure predicate. Every call is a distinct predicate for the
    /// result cache; reuse the returned value (or a builder holding it) to
    /// share cached results.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Element) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(ElementFn::named(name, func))
    }

    /// Anonymous closure predicate.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(&Element) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(ElementFn::anonymous(func))
    }

    /// Combine with another predicate using AND.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Combine with another predicate using OR.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Negate this predicate; double negation collapses.
    pub fn negate(self) -> Self {
        match self {
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// Evaluate against an element.
    ///
    /// Ordering comparisons between incompatible kinds (e.g. string and
    /// number) are false rather than errors.
    pub fn evaluate(&self, element: &Element) -> bool {
        match self {
            Predicate::Eq { field, value } => {
                element.resolve(field).is_some_and(|v| *v == *value)
            }
            Predicate::Ne { field, value } => {
                element.resolve(field).is_some_and(|v| *v != *value)
            }
            Predicate::Lt { field, value } => compare(element, field, value, |o| o.is_lt()),
            Predicate::Le { field, value } => compare(element, field, value, |o| o.is_le()),
            Predicate::Gt { field, value } => compare(element, field, value, |o| o.is_gt()),
            Predicate::Ge { field, value } => compare(element, field, value, |o| o.is_ge()),
            Predicate::In { field, values } => element
                .resolve(field)
                .is_some_and(|v| values.iter().any(|candidate| *candidate == *v)),
            Predicate::IsNull { field } => {
                element.resolve(field).map_or(true, |v| v.is_null())
            }
            Predicate::IsNotNull { field } => {
                element.resolve(field).is_some_and(|v| !v.is_null())
            }
            Predicate::Like { field, pattern } => match element.resolve(field).as_deref() {
                Some(Value::String(s)) => like_match(s, pattern),
                _ => false,
            },
            Predicate::OfType(element_type) => element.is_type(element_type),
            Predicate::And(parts) => parts.iter().all(|p| p.evaluate(element)),
            Predicate::Or(parts) => parts.iter().any(|p| p.evaluate(element)),
            Predicate::Not(inner) => !inner.evaluate(element),
            Predicate::Custom(func) => func.call(element),
        }
    }

    /// Field names this predicate reads. Closures report none.
    pub fn referenced_fields(&self) -> HashSet<String> {
        let mut fields = HashSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut HashSet<String>) {
        match self {
            Predicate::Eq { field, .. }
            | Predicate::Ne { field, .. }
            | Predicate::Lt { field, .. }
            | Predicate::Le { field, .. }
            | Predicate::Gt { field, .. }
            | Predicate::Ge { field, .. }
            | Predicate::In { field, .. }
            | Predicate::IsNull { field }
            | Predicate::IsNotNull { field }
            | Predicate::Like { field, .. } => {
                fields.insert(field.clone());
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                for part in parts {
                    part.collect_fields(fields);
                }
            }
            Predicate::Not(inner) => inner.collect_fields(fields),
            Predicate::OfType(_) | Predicate::Custom(_) => {}
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq { field, value } => write!(f, "{} == {}", field, value),
            Predicate::Ne { field, value } => write!(f, "{} != {}", field, value),
            Predicate::Lt { field, value } => write!(f, "{} < {}", field, value),
            Predicate::Le { field, value } => write!(f, "{} <= {}", field, value),
            Predicate::Gt { field, value } => write!(f, "{} > {}", field, value),
            Predicate::Ge { field, value } => write!(f, "{} >= {}", field, value),
            Predicate::In { field, values } => {
                write!(f, "{} in {}", field, Value::List(values.clone()))
            }
            Predicate::IsNull { field } => write!(f, "{} is null", field),
            Predicate::IsNotNull { field } => write!(f, "{} is not null", field),
            Predicate::Like { field, pattern } => write!(f, "{} like {:?}", field, pattern),
            Predicate::OfType(element_type) => write!(f, "type == {:?}", element_type),
            Predicate::And(parts) => write_joined(f, parts, " and "),
            Predicate::Or(parts) => write_joined(f, parts, " or "),
            Predicate::Not(inner) => write!(f, "not ({})", inner),
            Predicate::Custom(func) => write!(f, "custom:{}", func),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", part)?;
    }
    write!(f, ")")
}

fn compare(
    element: &Element,
    field: &str,
    value: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    match element.resolve(field) {
        Some(actual) if comparable(&actual, value) => accept(actual.compare(value)),
        _ => false,
    }
}

fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::List(_), Value::List(_))
    )
}

/// Match a string against a LIKE pattern.
///
/// `%` matches any run of characters (including none), `_` exactly one.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let text: Vec<char> = value.chars().collect();
    let pat: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pat.len() && (pat[p] == '_' || pat[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pat.len() && pat[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pat[p..].iter().all(|c| *c == '%')
}

/// Mapping applied by a projection operation.
#[derive(Debug, Clone)]
pub enum Projection {
    /// Keep only the named fields.
    Fields(Vec<String>),
    /// Replace each element with the closure's output.
    Map(ElementFn<Element>),
}

impl Projection {
    /// Keep only the named fields.
    pub fn fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Projection::Fields(fields.into_iter().map(Into::into).collect())
    }

    /// Named closure projection.
    pub fn map<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Element) -> Element + Send + Sync + 'static,
    {
        Projection::Map(ElementFn::named(name, func))
    }

    /// Apply to one element.
    pub fn apply(&self, element: &Element) -> Element {
        match self {
            Projection::Fields(fields) => element.project(fields),
            Projection::Map(func) => func.call(element),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Fields(fields) => write!(f, "fields[{}]", fields.join(",")),
            Projection::Map(func) => write!(f, "map:{}", func),
        }
    }
}

/// Computes a sort, distinct or grouping key for an element.
#[derive(Debug, Clone)]
pub enum KeySelector {
    /// Value of a field (`id` and `element_type` resolve as pseudo-fields).
    Field(String),
    /// Closure-computed key.
    Computed(ElementFn<Value>),
}

impl KeySelector {
    /// Key by field.
    pub fn field(name: impl Into<String>) -> Self {
        KeySelector::Field(name.into())
    }

    /// Named closure key.
    pub fn computed<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Element) -> Value + Send + Sync + 'static,
    {
        KeySelector::Computed(ElementFn::named(name, func))
    }

    /// Compute the key; missing fields yield null.
    pub fn key(&self, element: &Element) -> Value {
        match self {
            KeySelector::Field(field) => element
                .resolve(field)
                .map(|v| v.into_owned())
                .unwrap_or(Value::Null),
            KeySelector::Computed(func) => func.call(element),
        }
    }
}

impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::Field(field) => write!(f, "field:{}", field),
            KeySelector::Computed(func) => write!(f, "key:{}", func),
        }
    }
}

impl From<&str> for KeySelector {
    fn from(field: &str) -> Self {
        KeySelector::Field(field.to_string())
    }
}

impl From<String> for KeySelector {
    fn from(field: String) -> Self {
        KeySelector::Field(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall(height: f64) -> Element {
        Element::new(1, "Wall")
            .with_field("height", height)
            .with_field("name", "Basic Wall")
    }

    #[test]
    fn test_comparisons() {
        let e = wall(12.0);
        assert!(Predicate::gt("height", 10).evaluate(&e));
        assert!(!Predicate::lt("height", 10).evaluate(&e));
        assert!(Predicate::ge("height", 12.0).evaluate(&e));
        assert!(Predicate::eq("height", 12).evaluate(&e));
        assert!(!Predicate::gt("name", 10).evaluate(&e));
        assert!(!Predicate::gt("missing", 0).evaluate(&e));
    }

    #[test]
    fn test_null_checks() {
        let e = wall(1.0).with_field("mark", Value::Null);
        assert!(Predicate::is_null("mark").evaluate(&e));
        assert!(Predicate::is_null("missing").evaluate(&e));
        assert!(Predicate::is_not_null("height").evaluate(&e));
    }

    #[test]
    fn test_like() {
        assert!(like_match("Basic Wall", "Basic%"));
        assert!(like_match("Basic Wall", "%Wall"));
        assert!(like_match("Basic Wall", "B_sic%l"));
        assert!(!like_match("Basic Wall", "Curtain%"));
        assert!(like_match("", "%"));
        assert!(!like_match("abc", "ab"));
    }

    #[test]
    fn test_combinators_and_negation() {
        let e = wall(5.0);
        let p = Predicate::gt("height", 1).and(Predicate::like("name", "%Wall"));
        assert!(p.evaluate(&e));
        assert!(!p.clone().negate().evaluate(&e));
        assert!(matches!(p.clone().negate().negate(), Predicate::And(_)));
        assert!(Predicate::lt("height", 1).or(Predicate::of_type("Wall")).evaluate(&e));
    }

    #[test]
    fn test_referenced_fields() {
        let p = Predicate::gt("height", 1)
            .and(Predicate::eq("level", "L1").negate())
            .and(Predicate::from_fn(|_| true));
        let fields = p.referenced_fields();
        assert_eq!(fields.len(), 2);
        assert!(fields.contains("level"));
    }

    #[test]
    fn test_display_is_stable() {
        let p = Predicate::gt("height", 10).and(Predicate::is_in("level", vec!["L1", "L2"]));
        assert_eq!(p.to_string(), "(height > 10 and level in [\"L1\",\"L2\"])");
        let named = Predicate::custom("is_tall", |_| true);
        assert!(named.to_string().starts_with("custom:is_tall#"));
    }

    #[test]
    fn test_key_selector_pseudo_fields() {
        let e = wall(3.0);
        assert_eq!(KeySelector::field("id").key(&e), Value::Int(1));
        assert_eq!(KeySelector::field("missing").key(&e), Value::Null);
        let computed = KeySelector::computed("double", |e: &Element| {
            Value::Float(e.get("height").and_then(Value::as_f64).unwrap_or(0.0) * 2.0)
        });
        assert_eq!(computed.key(&e), Value::Float(6.0));
    }
}
