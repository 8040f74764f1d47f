use super::Taxonomy;
use crate::{Error, Result};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Taxonomies known to the process, keyed by entry point.
///
/// Populated once by the host at start-up. Registered taxonomies are never
/// replaced; lookups hand out shared read-only handles.
#[derive(Default)]
pub struct TaxonomyRegistry {
    taxonomies: RwLock<AHashMap<String, Arc<Taxonomy>>>,
}

impl TaxonomyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, taxonomy: Taxonomy) -> Result<Arc<Taxonomy>> {
        let mut taxonomies = self.taxonomies.write();
        if taxonomies.contains_key(taxonomy.entry_point()) {
            let mut loaded: Vec<&str> = taxonomies.keys().map(String::as_str).collect();
            loaded.sort_unstable();
            return Err(Error::Taxonomy(format!(
                "Already loaded taxonomy {}. Taxonomies loaded: {}",
                taxonomy.entry_point(),
                loaded.join(" ")
            )));
        }
        let taxonomy = Arc::new(taxonomy);
        taxonomies.insert(taxonomy.entry_point().to_string(), taxonomy.clone());
        log::info!("Registered taxonomy {}", taxonomy.entry_point());
        Ok(taxonomy)
    }

    pub fn get(&self, entry_point: &str) -> Result<Arc<Taxonomy>> {
        self.taxonomies
            .read()
            .get(entry_point)
            .cloned()
            .ok_or_else(|| {
                Error::UnknownTaxonomy(format!(
                    "No knowledge of taxonomy entry point \"{entry_point}\""
                ))
            })
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.taxonomies.read().contains_key(entry_point)
    }

    /// Registered entry points, sorted.
    pub fn entry_points(&self) -> Vec<String> {
        let mut entry_points: Vec<String> = self.taxonomies.read().keys().cloned().collect();
        entry_points.sort();
        entry_points
    }

    pub fn len(&self) -> usize {
        self.taxonomies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxonomies.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::tests::fixture;

    #[test]
    fn test_register_and_get() {
        let registry = TaxonomyRegistry::new();
        assert!(registry.is_empty());
        let taxonomy = registry.register(fixture()).unwrap();
        let entry_point = taxonomy.entry_point().to_string();
        assert!(registry.contains(&entry_point));
        assert!(Arc::ptr_eq(&taxonomy, &registry.get(&entry_point).unwrap()));
        assert_eq!(registry.entry_points(), vec![entry_point]);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = TaxonomyRegistry::new();
        registry.register(fixture()).unwrap();
        assert!(matches!(registry.register(fixture()), Err(Error::Taxonomy(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_entry_point() {
        let registry = TaxonomyRegistry::new();
        assert!(matches!(
            registry.get("https://example.com/missing.xsd"),
            Err(Error::UnknownTaxonomy(_))
        ));
    }

    #[test]
    fn test_shared_across_threads() {
        let registry = Arc::new(TaxonomyRegistry::new());
        registry.register(fixture()).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.entry_points().len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
    }
}
