// Qualified names and the prefix/namespace table they are interned against
use crate::{Error, Result};
use ahash::AHashMap;
use compact_str::CompactString;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub const ISO4217_NS: &str = "http://www.xbrl.org/2003/iso4217";
pub const UTR_NS: &str = "http://www.xbrl.org/2009/utr";
pub const XBRLI_NS: &str = "http://www.xbrl.org/2003/instance";
pub const ENUM2_NS: &str = "http://xbrl.org/2020/extensible-enumerations-2.0";

const NCNAME: &str = r"[a-zA-Z_][\w.-]*";

static NCNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{NCNAME}$")).expect("valid regex"));

/// Unanchored NCName, used to pull unit ids out of free text.
pub static NCNAME_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(NCNAME).expect("valid regex"));

/// Unanchored `prefix:local`, used to pull QNames out of free text.
pub static QNAME_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("{NCNAME}:{NCNAME}")).expect("valid regex"));

pub fn is_ncname(s: &str) -> bool {
    NCNAME_RE.is_match(s)
}

/// A namespace qualified name.
///
/// Identity is the full (local name, prefix, namespace) triple. Ordering is
/// the one a reader expects from the rendered form, prefix first.
#[derive(Clone)]
pub struct QName {
    prefix: Arc<str>,
    local_name: CompactString,
    namespace: Arc<str>,
}

impl QName {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && &*self.namespace == namespace
    }

    /// `namespace#localName`, the form used by extensible enumerations.
    pub fn expanded_name(&self) -> String {
        format!("{}#{}", self.namespace, self.local_name)
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.local_name == other.local_name
            && self.prefix == other.prefix
            && self.namespace == other.namespace
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_name.hash(state);
        self.prefix.hash(state);
        self.namespace.hash(state);
    }
}

impl Ord for QName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prefix
            .cmp(&other.prefix)
            .then_with(|| self.local_name.cmp(&other.local_name))
            .then_with(|| self.namespace.cmp(&other.namespace))
    }
}

impl PartialOrd for QName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.local_name)
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QName({}, {}, {})",
            self.local_name, self.prefix, self.namespace
        )
    }
}

impl Serialize for QName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Prefix to namespace bindings for one taxonomy.
///
/// A prefix may only ever be bound to one namespace. Namespaces reached
/// without a declared prefix get a generated `nsN` one.
#[derive(Debug, Clone, Default)]
pub struct NamespaceManager {
    bindings: Vec<(Arc<str>, Arc<str>)>,
    by_prefix: AHashMap<Arc<str>, Arc<str>>,
    generated: u32,
}

impl NamespaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with the handful of namespaces the conversion code relies on.
    pub fn bootstrap() -> Self {
        let mut manager = Self::new();
        for (prefix, namespace) in [
            ("iso4217", ISO4217_NS),
            ("utr", UTR_NS),
            ("xbrli", XBRLI_NS),
            ("enum2", ENUM2_NS),
        ] {
            // Static bindings, cannot collide on an empty manager
            let _ = manager.add(prefix, namespace);
        }
        manager
    }

    pub fn add(&mut self, prefix: &str, namespace: &str) -> Result<Arc<str>> {
        if !(namespace.starts_with("http://") || namespace.starts_with("https://")) {
            return Err(Error::NamespacePrefix(format!(
                "Namespace does not look valid: {namespace}"
            )));
        }
        if !is_ncname(prefix) {
            return Err(Error::NamespacePrefix(format!(
                "Prefix {prefix} does not look like an NCName."
            )));
        }

        if let Some((bound_prefix, existing)) = self.by_prefix.get_key_value(prefix) {
            if &**existing == namespace {
                return Ok(bound_prefix.clone());
            }
            return Err(Error::NamespacePrefix(format!(
                "Unable to bind prefix '{prefix}': existing namespace '{existing}', attempted namespace '{namespace}'."
            )));
        }

        let prefix: Arc<str> = Arc::from(prefix);
        let namespace = self.intern_namespace(namespace);
        self.by_prefix.insert(prefix.clone(), namespace.clone());
        self.bindings.push((prefix.clone(), namespace));
        Ok(prefix)
    }

    fn intern_namespace(&self, namespace: &str) -> Arc<str> {
        self.bindings
            .iter()
            .find(|(_, ns)| &**ns == namespace)
            .map(|(_, ns)| ns.clone())
            .unwrap_or_else(|| Arc::from(namespace))
    }

    pub fn namespace_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.by_prefix.get(prefix).map(|ns| &**ns)
    }

    /// First prefix declared for the namespace.
    pub fn prefix_for_namespace(&self, namespace: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, ns)| &**ns == namespace)
            .map(|(prefix, _)| &**prefix)
    }

    pub fn prefix_or_generate(&mut self, namespace: &str) -> Result<Arc<str>> {
        if let Some((prefix, _)) = self.bindings.iter().find(|(_, ns)| &**ns == namespace) {
            return Ok(prefix.clone());
        }
        loop {
            let candidate = format!("ns{}", self.generated);
            self.generated += 1;
            if !self.by_prefix.contains_key(candidate.as_str()) {
                return self.add(&candidate, namespace);
            }
        }
    }

    /// Bindings in declaration order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(p, n)| (&**p, &**n))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Parses `prefix:local` against the declared prefixes.
    pub fn parse(&self, qname: &str) -> Result<QName> {
        let (prefix, local_name) = qname.split_once(':').ok_or_else(|| {
            Error::QName(format!("QName is not of the form prefix:local: \"{qname}\""))
        })?;
        let (prefix, namespace) = self
            .by_prefix
            .get_key_value(prefix)
            .ok_or_else(|| Error::QName(format!("QName {qname} has an unknown prefix.")))?;
        Self::build(prefix.clone(), local_name, namespace.clone())
    }

    pub fn is_valid_qname(&self, qname: &str) -> bool {
        self.parse(qname).is_ok()
    }

    /// QName for a namespace that already has a prefix.
    pub fn qname(&self, namespace: &str, local_name: &str) -> Result<QName> {
        let (prefix, namespace) = self
            .bindings
            .iter()
            .find(|(_, ns)| &**ns == namespace)
            .ok_or_else(|| Error::QName(format!("No prefix bound for namespace {namespace}")))?;
        Self::build(prefix.clone(), local_name, namespace.clone())
    }

    pub fn qname_or_generate(&mut self, namespace: &str, local_name: &str) -> Result<QName> {
        self.prefix_or_generate(namespace)?;
        self.qname(namespace, local_name)
    }

    fn build(prefix: Arc<str>, local_name: &str, namespace: Arc<str>) -> Result<QName> {
        if !is_ncname(&prefix) {
            return Err(Error::QName(format!(
                "QName prefix {prefix} does not look like an NCName."
            )));
        }
        if !is_ncname(local_name) {
            return Err(Error::QName(format!(
                "QName local name {local_name} does not look like an NCName."
            )));
        }
        Ok(QName {
            prefix,
            local_name: CompactString::from(local_name),
            namespace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_prefixes() {
        let ns = NamespaceManager::bootstrap();
        assert_eq!(ns.namespace_for_prefix("xbrli"), Some(XBRLI_NS));
        assert_eq!(ns.prefix_for_namespace(ISO4217_NS), Some("iso4217"));
        assert_eq!(ns.len(), 4);
    }

    #[test]
    fn test_parse_and_display() {
        let ns = NamespaceManager::bootstrap();
        let q = ns.parse("iso4217:EUR").unwrap();
        assert_eq!(q.prefix(), "iso4217");
        assert_eq!(q.local_name(), "EUR");
        assert_eq!(q.namespace(), ISO4217_NS);
        assert_eq!(q.to_string(), "iso4217:EUR");
        assert_eq!(q.expanded_name(), format!("{ISO4217_NS}#EUR"));
    }

    #[test]
    fn test_rejects_malformed_qnames() {
        let ns = NamespaceManager::bootstrap();
        assert!(ns.parse("EUR").is_err());
        assert!(ns.parse("nope:EUR").is_err());
        assert!(ns.parse("xbrli:1bad").is_err());
        assert!(ns.parse("xbrli:").is_err());
        assert!(!ns.is_valid_qname("xbrli:has space"));
        assert!(ns.is_valid_qname("xbrli:pure"));
    }

    #[test]
    fn test_prefix_rebinding() {
        let mut ns = NamespaceManager::bootstrap();
        assert!(ns.add("demo", "https://example.com/demo").is_ok());
        // Same binding twice is fine
        assert!(ns.add("demo", "https://example.com/demo").is_ok());
        assert!(matches!(
            ns.add("demo", "https://example.com/other"),
            Err(Error::NamespacePrefix(_))
        ));
        assert!(ns.add("bad", "urn:not-http").is_err());
        assert!(ns.add("1bad", "https://example.com/x").is_err());
    }

    #[test]
    fn test_generated_prefixes() {
        let mut ns = NamespaceManager::bootstrap();
        ns.add("ns0", "https://example.com/taken").unwrap();
        let q = ns
            .qname_or_generate("https://example.com/fresh", "Thing")
            .unwrap();
        assert_eq!(q.prefix(), "ns1");
        let again = ns
            .qname_or_generate("https://example.com/fresh", "Other")
            .unwrap();
        assert_eq!(again.prefix(), "ns1");
    }

    #[test]
    fn test_ordering_and_equality() {
        let mut ns = NamespaceManager::bootstrap();
        ns.add("a", "https://example.com/a").unwrap();
        ns.add("b", "https://example.com/b").unwrap();
        let a_z = ns.parse("a:Z").unwrap();
        let b_a = ns.parse("b:A").unwrap();
        assert!(a_z < b_a);
        assert_eq!(a_z, ns.parse("a:Z").unwrap());
        assert_ne!(a_z, ns.parse("a:z").unwrap());
    }

    #[test]
    fn test_token_regexes() {
        let found: Vec<&str> = QNAME_TOKEN_RE
            .find_iter("tonnes [utr:t] or [utr:kg]")
            .map(|m| m.as_str())
            .collect();
        assert_eq!(found, vec!["utr:t", "utr:kg"]);
        assert!(is_ncname("_a.b-c"));
        assert!(!is_ncname("a:b"));
    }
}
