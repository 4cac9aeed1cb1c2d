//! Route table: maps `(method, path)` to an upstream path and an access requirement.
//!
//! Rules are evaluated in declared order and the first match wins. Templates
//! are compiled once at startup; a request never triggers template parsing.
//!
//! Template syntax:
//! - literal segments match exactly (case-sensitive)
//! - `{name}` (or a bare `*` before the last segment) matches one non-empty segment
//! - a final `{*name}` (or bare `*`) captures the remainder, at least one segment
//!
//! Paths with dot segments (`.`, `..`, or their `%2e` spellings) or encoded
//! separators never match. The upstream URL is resolved by the HTTP client,
//! which would collapse them and reach a path the matched rule never covered.

use std::collections::BTreeSet;
use std::fmt;

use axum::http::Method;

use crate::config::RouteConfig;
use crate::{Error, Result};

/// Built-in route table mirroring the dashboard's use of the Cromwell API.
#[must_use]
pub fn cromwell_routes() -> Vec<RouteConfig> {
    const READ: &str = "read:workflows";
    const CREATE: &str = "create:workflows";
    const UPDATE: &str = "update:workflows";

    vec![
        RouteConfig::protected(&["POST"], "/api/workflows/{version}/{id}/abort", &[UPDATE]),
        RouteConfig::protected(&["POST"], "/api/workflows/{version}/{id}/releaseHold", &[UPDATE]),
        RouteConfig::protected(&["PATCH"], "/api/workflows/{version}/{id}/labels", &[UPDATE]),
        RouteConfig::protected(&["GET"], "/api/workflows/{*path}", &[READ]),
        RouteConfig::protected(&["POST"], "/api/workflows/{*path}", &[CREATE, UPDATE]),
        RouteConfig::protected(&["GET", "POST"], "/api/womtool/{*path}", &[READ]),
        RouteConfig::protected(&["GET"], "/engine/{*path}", &[]),
        RouteConfig::protected(&["GET"], "/swagger/cromwell.yaml", &[]),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(Option<String>),
    Rest(Option<String>),
}

/// A compiled path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

type Captures<'p> = Vec<(&'p str, &'p str)>;

impl PathTemplate {
    /// Compile a template such as `/api/workflows/{version}/{*rest}`
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |why: &str| Error::Config(format!("Invalid path template {source:?}: {why}"));

        let body = source
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;

        let parts: Vec<&str> = body.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (idx, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if idx == last {
                    Segment::Rest(None)
                } else {
                    Segment::Param(None)
                }
            } else if let Some(name) = part.strip_prefix("{*").and_then(|p| p.strip_suffix('}')) {
                if idx != last {
                    return Err(invalid("a catch-all segment must be last"));
                }
                Segment::Rest(Some(Self::param_name(name).ok_or_else(|| invalid("bad name"))?))
            } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Segment::Param(Some(Self::param_name(name).ok_or_else(|| invalid("bad name"))?))
            } else if part.contains(['{', '}']) {
                return Err(invalid("braces are only allowed around a whole segment"));
            } else {
                Segment::Literal((*part).to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    fn param_name(name: &str) -> Option<String> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| name.to_string())
    }

    /// Match a request path, returning named captures on success
    fn captures<'p>(&'p self, path: &'p str) -> Option<Captures<'p>> {
        let body = path.strip_prefix('/')?;
        let mut rest = body;
        let mut captures = Vec::new();

        for (idx, segment) in self.segments.iter().enumerate() {
            let is_last = idx + 1 == self.segments.len();
            match segment {
                Segment::Rest(name) => {
                    if rest.is_empty() {
                        return None;
                    }
                    if let Some(name) = name {
                        captures.push((name.as_str(), rest));
                    }
                    return Some(captures);
                }
                Segment::Literal(_) | Segment::Param(_) => {
                    let (head, tail) = match rest.split_once('/') {
                        Some((head, tail)) => (head, Some(tail)),
                        None => (rest, None),
                    };
                    match segment {
                        Segment::Literal(lit) if lit == head => {}
                        Segment::Param(name) if !head.is_empty() => {
                            if let Some(name) = name {
                                captures.push((name.as_str(), head));
                            }
                        }
                        _ => return None,
                    }
                    match (tail, is_last) {
                        (None, true) => return Some(captures),
                        (Some(tail), false) => rest = tail,
                        _ => return None,
                    }
                }
            }
        }
        None
    }

    /// Render this template with `captures`; unknown names render empty
    fn render(&self, captures: &Captures<'_>) -> String {
        let lookup = |name: &Option<String>| {
            name.as_deref()
                .and_then(|n| captures.iter().find(|(k, _)| *k == n))
                .map_or("", |(_, v)| *v)
        };

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Param(name) | Segment::Rest(name) => out.push_str(lookup(name)),
            }
        }
        out
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A compiled route rule
#[derive(Debug, Clone)]
pub struct RouteRule {
    methods: Vec<Method>,
    pattern: PathTemplate,
    upstream: Option<PathTemplate>,
    auth_required: bool,
    permissions: BTreeSet<String>,
}

impl RouteRule {
    /// Compile a rule from its configuration
    pub fn from_config(config: &RouteConfig) -> Result<Self> {
        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| Error::Config(format!("Invalid HTTP method {m:?} in route {}", config.path)))
            })
            .collect::<Result<Vec<_>>>()?;

        let upstream = config
            .upstream
            .as_deref()
            .map(PathTemplate::parse)
            .transpose()?;

        if !config.auth && !config.permissions.is_empty() {
            return Err(Error::Config(format!(
                "Route {} lists permissions but disables authentication",
                config.path
            )));
        }

        Ok(Self {
            methods,
            pattern: PathTemplate::parse(&config.path)?,
            upstream,
            auth_required: config.auth,
            permissions: config.permissions.iter().cloned().collect(),
        })
    }

    /// Whether a bearer token must be presented
    #[must_use]
    pub fn auth_required(&self) -> bool {
        self.auth_required
    }

    /// Any-of permission set; empty means any valid token
    #[must_use]
    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// Methods answered by this rule (empty = any)
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Incoming path template
    #[must_use]
    pub fn pattern(&self) -> &PathTemplate {
        &self.pattern
    }

    /// Upstream path template, if the path is rewritten
    #[must_use]
    pub fn upstream(&self) -> Option<&PathTemplate> {
        self.upstream.as_ref()
    }

    fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// Short description of the access requirement
    #[must_use]
    pub fn requirement(&self) -> String {
        if !self.auth_required {
            "public".to_string()
        } else if self.permissions.is_empty() {
            "authenticated".to_string()
        } else {
            format!(
                "any of [{}]",
                self.permissions.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        }
    }
}

/// Result of a successful route lookup
#[derive(Debug)]
pub struct RouteMatch<'a> {
    /// The winning rule
    pub rule: &'a RouteRule,
    /// Path to request from the upstream
    pub upstream_path: String,
}

/// Ordered, read-only set of route rules
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Compile every rule, failing on the first invalid one
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let rules = routes
            .iter()
            .map(RouteRule::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Find the first rule matching `method` and `path`
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        if !is_canonical(path) {
            return None;
        }
        self.rules.iter().find_map(|rule| {
            if !rule.accepts(method) {
                return None;
            }
            let captures = rule.pattern.captures(path)?;
            let upstream_path = match &rule.upstream {
                Some(template) => template.render(&captures),
                None => path.to_string(),
            };
            Some(RouteMatch {
                rule,
                upstream_path,
            })
        })
    }

    /// All rules in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table has no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Whether every segment of `path` reaches the upstream exactly as matched
fn is_canonical(path: &str) -> bool {
    path.split('/').all(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded != "."
            && decoded != ".."
            && !decoded.contains('\\')
            && !decoded.contains("%2f")
            && !decoded.contains("%5c")
    })
}
