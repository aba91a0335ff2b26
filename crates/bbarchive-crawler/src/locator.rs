//! Locator: endpoint path (relative to the API base) + query parameters

use std::collections::BTreeMap;

use url::form_urlencoded;

/// Query parameters. Keys are unique; a single value is a one-element list.
///
/// Sorted keys make serialisation deterministic, so the same logical
/// request always maps to the same local file.
pub type Params = BTreeMap<String, Vec<String>>;

/// Parameters that only steer pagination/ordering, not which resource is addressed
pub const PAGINATION_PARAMS: &[&str] = &["page", "pagelen", "sort", "ctx"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Path relative to the API base, without leading slash or query
    pub endpoint: String,
    pub params: Params,
}

impl Locator {
    pub fn new(endpoint: impl Into<String>, params: Params) -> Self {
        Self {
            endpoint: endpoint.into(),
            params,
        }
    }

    /// Parse an absolute URL under `api_base`. `None` for foreign URLs.
    pub fn from_url(url: &str, api_base: &str) -> Option<Self> {
        let rest = url.strip_prefix(api_base)?;
        Some(Self::from_reference(rest))
    }

    /// Parse a reference already relative to the API base (`path?query#frag`).
    pub fn from_reference(reference: &str) -> Self {
        let without_fragment = reference.split('#').next().unwrap_or_default();
        let (path, query) = match without_fragment.split_once('?') {
            Some((p, q)) => (p, q),
            None => (without_fragment, ""),
        };
        Self {
            endpoint: path.trim_start_matches('/').to_string(),
            params: parse_query(query),
        }
    }

    /// Full query string, `form_urlencoded`, keys sorted
    pub fn query_string(&self) -> String {
        encode_params(&self.params)
    }

    /// Absolute URL for this locator under `api_base`
    pub fn to_url(&self, api_base: &str) -> String {
        let query = self.query_string();
        if query.is_empty() {
            format!("{api_base}{}", self.endpoint)
        } else {
            format!("{api_base}{}?{query}", self.endpoint)
        }
    }

    /// Copy without the given parameter keys
    pub fn without(&self, keys: &[&str]) -> Self {
        let params = self
            .params
            .iter()
            .filter(|(k, _)| !keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            endpoint: self.endpoint.clone(),
            params,
        }
    }

    /// Same resource modulo pagination/ordering parameters
    pub fn same_logical_endpoint(&self, other: &Self) -> bool {
        self.without(PAGINATION_PARAMS) == other.without(PAGINATION_PARAMS)
    }
}

/// Decode a query string into [`Params`], grouping repeated keys.
pub fn parse_query(query: &str) -> Params {
    let mut params = Params::new();
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        params.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    params
}

/// Encode [`Params`], one pair per value.
pub fn encode_params(params: &Params) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in params {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}
