//! Query templating.
//!
//! A query template declares its inputs in an `:in` clause. Parameters are
//! bound by rewriting the template: all parameter values travel as one
//! synthetic tuple argument `?args`, declared after the implicit `?ctx`
//! argument, and an `untuple` clause injected at the top of `:where` unpacks
//! the tuple back into one binding per parameter.

use std::sync::LazyLock;

use regex::Regex;
use skiff_types::SkillDescriptor;

use crate::edn::{Value, encode, quote};
use crate::error::{DatalogError, Result};

/// Span from the `:in` marker up to the first `:where`/`:with` marker.
static BINDING_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(:in\b[\s\S]*?)(?::where\b|:with\b)").expect("binding clause pattern is valid")
});

// ─────────────────────────────────────────────────────────────────────────────
// Parameters and options
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered query parameters. A `None` value is undefined and dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, Option<Value>)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a defined parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((name.into(), Some(value.into())));
        self
    }

    /// Add a parameter that may be undefined.
    pub fn with_opt(mut self, name: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        self.entries.push((name.into(), value.map(Into::into)));
        self
    }

    /// Defined parameters in declaration order.
    pub fn defined(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.as_str(), v)))
    }

    pub fn is_empty(&self) -> bool {
        self.defined().next().is_none()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
        }
    }
}

/// How query responses are returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
    /// Normalize each result tuple with the result mapper.
    #[default]
    Map,
    /// Return the response text untouched.
    Raw,
    /// Return the first decoded result as plain JSON, without mapping.
    Object,
}

/// Limit/offset paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub limit: u64,
    pub offset: u64,
}

/// Per-query options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Lower bound of the transaction range; results nest under `result`.
    pub tx: Option<i64>,
    /// Configuration instance the query runs as.
    pub configuration_name: Option<String>,
    pub mode: QueryMode,
    /// Additional rule definitions, as EDN text.
    pub rules: Option<String>,
    pub paging: Option<Paging>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx(mut self, tx: i64) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn configuration_name(mut self, name: impl Into<String>) -> Self {
        self.configuration_name = Some(name.into());
        self
    }

    pub fn mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn rules(mut self, rules: impl Into<String>) -> Self {
        self.rules = Some(rules.into());
        self
    }

    pub fn paging(mut self, limit: u64, offset: u64) -> Self {
        self.paging = Some(Paging { limit, offset });
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument binding
// ─────────────────────────────────────────────────────────────────────────────

/// A rewritten template plus its serialized argument tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedArgs {
    pub query: String,
    pub args: String,
}

/// Escape one argument value.
///
/// Strings are quoted unless they start with `:`, in which case they are a
/// pre-escaped keyword and stay bare. Sequences render as a bracketed list of
/// escaped elements. Everything else uses its EDN form.
pub fn escape_arg(value: &Value) -> Result<String> {
    match value {
        Value::String(s) if s.starts_with(':') => Ok(s.clone()),
        Value::String(s) => Ok(quote(s)),
        Value::Vector(items) | Value::List(items) => {
            let escaped = items.iter().map(escape_arg).collect::<Result<Vec<_>>>()?;
            Ok(format!("[{}]", escaped.join(" ")))
        }
        other => encode(other),
    }
}

/// Bind `params` into `template`.
pub fn prepare_args(template: &str, params: &Params) -> Result<PreparedArgs> {
    let mut names = Vec::new();
    let mut args = Vec::new();
    for (name, value) in params.defined() {
        args.push(escape_arg(value)?);
        names.push(format!("?{name}"));
    }

    if args.is_empty() {
        return Ok(PreparedArgs {
            query: template.to_string(),
            args: String::new(),
        });
    }

    let clause = BINDING_CLAUSE
        .captures(template)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| {
            DatalogError::InvalidQuery(
                "template has no :in clause followed by :where or :with".to_string(),
            )
        })?;

    let clause_text = clause.as_str();
    let ctx = if clause_text.contains("?ctx") { "" } else { "?ctx " };
    let mut query = String::with_capacity(template.len() + 64);
    query.push_str(&template[..clause.start()]);
    query.push_str(clause_text);
    query.push_str(ctx);
    query.push_str("?args\n");
    let rest = &template[clause.end()..];

    let where_at = rest
        .find(":where")
        .ok_or_else(|| DatalogError::InvalidQuery("template has no :where clause".to_string()))?;
    let untuple = format!("[(untuple ?args) [{}]]", names.join(" "));
    let insert_at = where_at + ":where".len();
    query.push_str(&rest[..insert_at]);
    query.push_str("\n ");
    query.push_str(&untuple);
    query.push_str(&rest[insert_at..]);

    Ok(PreparedArgs {
        query,
        args: args.join(" "),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Request documents
// ─────────────────────────────────────────────────────────────────────────────

/// Assemble one query request document.
pub fn prepare_query_body(
    template: &str,
    params: &Params,
    options: &QueryOptions,
    skill: &SkillDescriptor,
    name: Option<&str>,
) -> Result<String> {
    let prepared = prepare_args(template, params)?;

    let mut parts = Vec::new();
    if let Some(name) = name {
        parts.push(format!(":name {}", quote(name)));
    }
    parts.push(format!(":query {}", prepared.query));
    if !prepared.args.is_empty() {
        parts.push(format!(":args [{}]", prepared.args));
    }
    if let Some(tx) = options.tx {
        parts.push(format!(":tx-range {{:start {tx} }}"));
    }
    if let Some(configuration) = &options.configuration_name {
        parts.push(format!(
            ":skill-ref {{:name {} :namespace {} :configuration-name {}}}",
            quote(&skill.name),
            quote(&skill.namespace),
            quote(configuration)
        ));
    }
    if let Some(rules) = &options.rules {
        parts.push(format!(":rules {rules}"));
    }
    if let Some(paging) = options.paging {
        parts.push(format!(":limit {} :offset {}", paging.limit, paging.offset));
    }

    Ok(format!("{{\n{}\n}}", parts.join("\n\n")))
}

/// Combine named query bodies into one batched document.
pub fn prepare_batch_body(bodies: &[String]) -> String {
    format!("{{:queries [\n{}\n]}}", bodies.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "[:find (pull ?commit [*])\n :in $ $before-db %\n :where [?commit :git.commit/sha ?sha]]";

    #[test]
    fn test_no_params_returns_template_unchanged() {
        let prepared = prepare_args(TEMPLATE, &Params::new()).unwrap();
        assert_eq!(prepared.query, TEMPLATE);
        assert_eq!(prepared.args, "");
    }

    #[test]
    fn test_undefined_params_are_dropped() {
        let params = Params::new().with_opt("sha", None::<String>);
        let prepared = prepare_args(TEMPLATE, &params).unwrap();
        assert_eq!(prepared.query, TEMPLATE);
        assert!(prepared.args.is_empty());
    }

    #[test]
    fn test_binds_params_in_declaration_order() {
        let params = Params::new()
            .with("sha", "abc")
            .with("type", ":git.ref.type/branch")
            .with("names", vec!["main", "dev"])
            .with("limit", 3);
        let prepared = prepare_args(TEMPLATE, &params).unwrap();

        assert_eq!(
            prepared.args,
            r#""abc" :git.ref.type/branch ["main" "dev"] 3"#
        );
        assert_eq!(
            prepared.query,
            "[:find (pull ?commit [*])\n :in $ $before-db %\n ?ctx ?args\n:where\n [(untuple ?args) [?sha ?type ?names ?limit]] [?commit :git.commit/sha ?sha]]"
        );
        assert_eq!(prepared.query.matches("?args\n").count(), 1);
        assert_eq!(prepared.query.matches("untuple").count(), 1);
    }

    #[test]
    fn test_existing_ctx_not_redeclared() {
        let template = "[:find ?e :in $ ?ctx :where [?e :a ?x]]";
        let prepared = prepare_args(template, &Params::new().with("x", 1)).unwrap();
        assert_eq!(prepared.query.matches("?ctx").count(), 1);
        assert!(prepared.query.contains(":in $ ?ctx ?args\n:where"));
    }

    #[test]
    fn test_with_clause_marks_end_of_bindings() {
        let template = "[:find ?e :in $ :with ?x :where [?e :a ?x]]";
        let prepared = prepare_args(template, &Params::new().with("x", 1)).unwrap();
        assert!(prepared.query.contains(":in $ ?ctx ?args\n:with ?x :where\n [(untuple ?args) [?x]]"));
    }

    #[test]
    fn test_missing_binding_clause_is_error() {
        let err = prepare_args("[:find ?e :where [?e :a 1]]", &Params::new().with("x", 1)).unwrap_err();
        match err {
            DatalogError::InvalidQuery(_) => {}
            other => panic!("Expected InvalidQuery, got: {other:?}"),
        }
    }

    #[test]
    fn test_query_body_parts() {
        let skill = SkillDescriptor::new("atomist", "go-sample-skill");
        let options = QueryOptions::new()
            .tx(42)
            .configuration_name("default")
            .rules("[[(rule ?a) [?a :b 1]]]")
            .paging(10, 20);
        let body = prepare_query_body(TEMPLATE, &Params::new().with("sha", "abc"), &options, &skill, Some("commits")).unwrap();

        assert!(body.starts_with("{\n:name \"commits\"\n\n:query "));
        assert!(body.contains("\n\n:args [\"abc\"]"));
        assert!(body.contains("\n\n:tx-range {:start 42 }"));
        assert!(body.contains(
            ":skill-ref {:name \"go-sample-skill\" :namespace \"atomist\" :configuration-name \"default\"}"
        ));
        assert!(body.contains("\n\n:rules [[(rule ?a) [?a :b 1]]]"));
        assert!(body.ends_with(":limit 10 :offset 20\n}"));
    }

    #[test]
    fn test_query_body_without_args() {
        let skill = SkillDescriptor::new("ns", "n");
        let body = prepare_query_body(TEMPLATE, &Params::new(), &QueryOptions::new(), &skill, None).unwrap();
        assert_eq!(body, format!("{{\n:query {TEMPLATE}\n}}"));
    }

    #[test]
    fn test_batch_body() {
        let body = prepare_batch_body(&["{:a 1}".to_string(), "{:b 2}".to_string()]);
        assert_eq!(body, "{:queries [\n{:a 1}\n{:b 2}\n]}");
    }
}
