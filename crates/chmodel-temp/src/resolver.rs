//! Inline the parameter values of a composed query as literals.
//!
//! A temp table runs on its own connection, so a query compiled elsewhere
//! cannot bring its parameter bindings along. The resolver rewrites every
//! `{name:Type}` placeholder in the query text into a literal.

use std::sync::OnceLock;

use chmodel_core::{ChType, Error, ParameterError, Result, Value, render_literal};
use chmodel_query::{LITERAL_PARAM_BASE, SourceQuery};
use regex::Regex;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*):([^}]+)\}").expect("placeholder pattern is valid")
    })
}

/// Strip every trailing `_<digits>` group.
fn base_name(name: &str) -> &str {
    let mut base = name.trim_start_matches("__");
    while let Some((head, tail)) = base.rsplit_once('_') {
        if head.is_empty() || tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
            break;
        }
        base = head;
    }
    base
}

/// Query text with all placeholders replaced by literals.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub sql: String,
    /// The candidate values the text was resolved against
    pub parameters: Vec<(String, Value)>,
}

/// Candidate parameter values for one query, and the substitution over them.
#[derive(Debug, Clone, Default)]
pub struct ParameterResolver {
    candidates: Vec<(String, Value)>,
}

impl ParameterResolver {
    /// Resolver over explicit name/value pairs.
    pub fn from_values(candidates: Vec<(String, Value)>) -> Self {
        Self { candidates }
    }

    /// Collect candidates for `query`.
    ///
    /// The live parameter context wins when it is present and non-empty.
    /// Otherwise every non-null value in the query's expressions is recorded
    /// under its own name, a `__`-prefixed name and a `_<k>`-suffixed name,
    /// where `k` counts values in render order.
    pub fn for_query<Q: SourceQuery + ?Sized>(query: &Q) -> Self {
        if let Some(context) = query.parameter_context() {
            if !context.is_empty() {
                tracing::trace!(count = context.len(), "Using live parameter context");
                return Self::from_values(context);
            }
        }

        let mut candidates = Vec::new();
        let mut index = 0usize;
        for expr in query.expressions() {
            expr.visit_values(&mut |name, value| {
                let name = name.unwrap_or(LITERAL_PARAM_BASE);
                let indexed = format!("{}_{}", name, index);
                if name != LITERAL_PARAM_BASE {
                    candidates.push((name.to_string(), value.clone()));
                    candidates.push((format!("__{}", name), value.clone()));
                }
                candidates.push((format!("__{}", indexed), value.clone()));
                candidates.push((indexed, value.clone()));
                index += 1;
            });
        }
        tracing::trace!(values = index, "Collected parameter candidates from expressions");
        Self { candidates }
    }

    /// Resolve `query` into standalone SQL text.
    pub fn resolve<Q: SourceQuery + ?Sized>(query: &Q) -> Result<ResolvedQuery> {
        let resolver = Self::for_query(query);
        let sql = resolver.substitute(&query.sql())?;
        Ok(ResolvedQuery {
            sql,
            parameters: resolver.candidates,
        })
    }

    pub fn candidates(&self) -> &[(String, Value)] {
        &self.candidates
    }

    /// Sorted, de-duplicated candidate names.
    pub fn candidate_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.candidates.iter().map(|(n, _)| n.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    fn find_exact(&self, name: &str) -> Option<&Value> {
        self.candidates
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, v)| v)
    }

    /// Look up a placeholder name.
    ///
    /// Tries the exact name, the `__`-prefixed name, the name without a
    /// leading `__`, then any candidate whose base name (trailing `_<k>`
    /// groups removed) matches case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.find_exact(name) {
            return Some(value);
        }
        if let Some(value) = self.find_exact(&format!("__{}", name)) {
            return Some(value);
        }
        if let Some(stripped) = name.strip_prefix("__") {
            if let Some(value) = self.find_exact(stripped) {
                return Some(value);
            }
        }
        let wanted = base_name(name);
        self.candidates
            .iter()
            .find(|(candidate, _)| base_name(candidate).eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v)
    }

    /// Replace every `{name:Type}` placeholder in `sql` with a literal.
    ///
    /// The declared type guides rendering. An unresolved placeholder is an
    /// error; nothing is ever replaced with `NULL` by default.
    pub fn substitute(&self, sql: &str) -> Result<String> {
        let mut out = String::with_capacity(sql.len());
        let mut last = 0;
        for caps in placeholder_regex().captures_iter(sql) {
            let (Some(whole), Some(name), Some(declared)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let Some(value) = self.lookup(name.as_str()) else {
                return Err(Error::Parameter(ParameterError {
                    placeholder: name.as_str().to_string(),
                    declared_type: declared.as_str().to_string(),
                    available: self.candidate_names(),
                }));
            };
            out.push_str(&sql[last..whole.start()]);
            out.push_str(&render_literal(value, &ChType::parse(declared.as_str().trim())));
            last = whole.end();
        }
        out.push_str(&sql[last..]);
        Ok(out)
    }
}
