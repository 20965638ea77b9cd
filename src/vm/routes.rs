//! Route table declared by workspace code through `exports.routes`.
//!
//! Keys look like `"GET /orders/:id"`. The method is an HTTP verb or `ANY`,
//! the pattern is made of literal segments and `:name` captures. Routes match
//! in declaration order and the first match wins.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct Route {
    key: String,
    method: Option<String>,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub key: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

impl RouteTable {
    /// Parses route keys in declaration order.
    pub fn parse<S: AsRef<str>>(keys: &[S]) -> Result<Self, String> {
        let routes = keys
            .iter()
            .map(|key| parse_route(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { routes })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the first route matching `method` and `path`.
    #[must_use]
    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        self.routes.iter().find_map(|route| {
            if let Some(m) = &route.method {
                if !m.eq_ignore_ascii_case(method) {
                    return None;
                }
            }
            if route.segments.len() != parts.len() {
                return None;
            }
            let mut params = BTreeMap::new();
            for (segment, part) in route.segments.iter().zip(&parts) {
                match segment {
                    Segment::Literal(lit) if lit == part => {}
                    Segment::Literal(_) => return None,
                    Segment::Param(name) => {
                        params.insert(name.clone(), (*part).to_string());
                    }
                }
            }
            Some(RouteMatch {
                key: route.key.clone(),
                params,
            })
        })
    }
}

fn parse_route(key: &str) -> Result<Route, String> {
    let (method, pattern) = key
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(|| format!("route {key:?} must look like \"METHOD /path\""))?;
    let method = method.to_ascii_uppercase();
    let pattern = pattern.trim();

    let method = match method.as_str() {
        "ANY" | "*" => None,
        m if METHODS.contains(&m) => Some(method),
        _ => return Err(format!("route {key:?} has unknown method {method}")),
    };
    if !pattern.starts_with('/') {
        return Err(format!("route {key:?} path must start with '/'"));
    }

    let mut segments = Vec::new();
    for part in pattern.split('/').filter(|s| !s.is_empty()) {
        match part.strip_prefix(':') {
            Some("") => return Err(format!("route {key:?} has an unnamed parameter")),
            Some(name) => {
                if segments.contains(&Segment::Param(name.to_string())) {
                    return Err(format!("route {key:?} repeats parameter {name}"));
                }
                segments.push(Segment::Param(name.to_string()));
            }
            None => segments.push(Segment::Literal(part.to_string())),
        }
    }

    Ok(Route {
        key: key.to_string(),
        method,
        segments,
    })
}
