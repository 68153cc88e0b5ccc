//! Resolution of free-text category names to catalog subcategory ids.
//!
//! Matching is case-insensitive and character based. A catalog entry matches
//! when one of the two names is a prefix of the other and the unmatched tail
//! of the longer one is at most `search_max_suffix` characters, which absorbs
//! declension and plural endings in the configured names.

use crate::config::{ConfigError, Settings};
use crate::domain::CatalogEntry;
use std::collections::HashSet;

/// A catalog entry accepted by the relaxed prefix rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryMatch {
    pub id: u64,
    /// Length of the unmatched tail on the longer name.
    pub suffix_len: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CategoryResolver {
    min_chars: usize,
    max_suffix: usize,
    max_matches: usize,
}

impl CategoryResolver {
    pub fn new(settings: &Settings) -> Self {
        Self {
            min_chars: settings.search_min_chars,
            max_suffix: settings.search_max_suffix,
            max_matches: settings.max_matched_subcategories,
        }
    }

    /// Resolve `name` to at most `max_matched_subcategories` subcategory ids.
    ///
    /// Returns an empty vec when nothing matches or when the name is
    /// ambiguous (more matches than allowed). Names shorter than
    /// `search_min_chars` are rejected.
    pub fn resolve(&self, name: &str, catalog: &[CatalogEntry]) -> Result<Vec<u64>, ConfigError> {
        let matches = self.match_candidates(name, catalog)?;
        if matches.len() > self.max_matches {
            return Ok(Vec::new());
        }
        Ok(matches.into_iter().map(|m| m.id).collect())
    }

    /// All relaxed matches for `name`, without the ambiguity cut-off.
    ///
    /// Ordered by ascending suffix length, then by id. Each id appears once.
    pub fn match_candidates(
        &self,
        name: &str,
        catalog: &[CatalogEntry],
    ) -> Result<Vec<CategoryMatch>, ConfigError> {
        let needle: Vec<char> = name.trim().to_lowercase().chars().collect();
        if needle.len() < self.min_chars {
            return Err(ConfigError::InvalidValue(
                "category name".to_string(),
                format!(
                    "\"{}\" is shorter than {} characters",
                    name.trim(),
                    self.min_chars
                ),
            ));
        }

        let mut matches: Vec<CategoryMatch> = catalog
            .iter()
            .filter_map(|entry| {
                let candidate: Vec<char> = entry.name.trim().to_lowercase().chars().collect();
                if candidate.is_empty() {
                    return None;
                }
                relaxed_suffix(&needle, &candidate)
                    .filter(|suffix_len| *suffix_len <= self.max_suffix)
                    .map(|suffix_len| CategoryMatch {
                        id: entry.id,
                        suffix_len,
                    })
            })
            .collect();

        matches.sort_by_key(|m| (m.suffix_len, m.id));
        let mut seen = HashSet::new();
        matches.retain(|m| seen.insert(m.id));

        Ok(matches)
    }
}

/// Length of the tail left over when the shorter name is a prefix of the longer.
fn relaxed_suffix(a: &[char], b: &[char]) -> Option<usize> {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.starts_with(short).then(|| long.len() - short.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(min_chars: usize, max_suffix: usize, max_matches: usize) -> CategoryResolver {
        CategoryResolver::new(&Settings {
            search_min_chars: min_chars,
            search_max_suffix: max_suffix,
            max_matched_subcategories: max_matches,
            ..Settings::default()
        })
    }

    fn catalog() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry::new(10, "Платья"),
            CatalogEntry::new(11, "Платье-рубашка"),
            CatalogEntry::new(20, "Блузки и рубашки"),
            CatalogEntry::new(30, "Брюки"),
            CatalogEntry::new(31, "Брюки спортивные"),
            CatalogEntry::new(40, "Джинсы"),
            CatalogEntry::new(41, "Джинсовые куртки"),
        ]
    }

    #[test]
    fn test_every_catalog_name_resolves_to_itself() {
        let r = resolver(4, 2, 3);
        for entry in catalog() {
            let ids = r.resolve(&entry.name, &catalog()).unwrap();
            assert_eq!(ids.first(), Some(&entry.id), "{}", entry.name);
        }
    }

    #[test]
    fn test_exact_match_is_unique_with_zero_suffix() {
        let r = resolver(4, 0, 3);
        assert_eq!(r.resolve("Брюки", &catalog()).unwrap(), vec![30]);
    }

    #[test]
    fn test_case_insensitive_and_trimmed() {
        let r = resolver(4, 0, 3);
        assert_eq!(r.resolve("  ПЛАТЬЯ ", &catalog()).unwrap(), vec![10]);
    }

    #[test]
    fn test_declension_suffix_tolerated() {
        let r = resolver(4, 2, 3);
        // "платьями" is "платья" plus two characters
        assert_eq!(r.resolve("Платьями", &catalog()).unwrap(), vec![10]);
        // catalog name longer than the input
        assert_eq!(r.resolve("Плать", &catalog()).unwrap(), vec![10]);
    }

    #[test]
    fn test_suffix_too_long_does_not_match() {
        let r = resolver(4, 1, 3);
        assert!(r.resolve("Джин", &catalog()).unwrap().is_empty());
        let r = resolver(4, 2, 3);
        assert_eq!(r.resolve("Джин", &catalog()).unwrap(), vec![40]);
    }

    #[test]
    fn test_ordering_by_suffix_then_id() {
        let r = resolver(4, 20, 5);
        let matches = r.match_candidates("Брюки", &catalog()).unwrap();
        assert_eq!(
            matches,
            vec![
                CategoryMatch { id: 30, suffix_len: 0 },
                CategoryMatch { id: 31, suffix_len: 11 },
            ]
        );
    }

    #[test]
    fn test_ties_broken_by_id() {
        let catalog = vec![
            CatalogEntry::new(9, "Шорты"),
            CatalogEntry::new(3, "Шорты"),
        ];
        let r = resolver(4, 0, 3);
        assert_eq!(r.resolve("шорты", &catalog).unwrap(), vec![3, 9]);
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let catalog = vec![
            CatalogEntry::new(5, "Носки"),
            CatalogEntry::new(5, "Носки"),
        ];
        let r = resolver(4, 0, 1);
        assert_eq!(r.resolve("Носки", &catalog).unwrap(), vec![5]);
    }

    #[test]
    fn test_too_short_is_configuration_error() {
        let r = resolver(4, 2, 3);
        assert!(matches!(
            r.resolve("Шор", &catalog()),
            Err(ConfigError::InvalidValue(_, _))
        ));
        assert!(r.resolve("", &[]).is_err());
    }

    #[test]
    fn test_ambiguous_returns_empty_not_subset() {
        let catalog: Vec<CatalogEntry> = (1..=4)
            .map(|id| CatalogEntry::new(id, "Кроссовки"))
            .collect();
        let r = resolver(4, 0, 3);
        assert!(r.resolve("Кроссовки", &catalog).unwrap().is_empty());
        assert_eq!(r.match_candidates("Кроссовки", &catalog).unwrap().len(), 4);

        let r = resolver(4, 0, 4);
        assert_eq!(r.resolve("Кроссовки", &catalog).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_catalog_names_ignored() {
        let catalog = vec![CatalogEntry::new(1, "  ")];
        let r = resolver(1, 10, 3);
        assert!(r.resolve("abc", &catalog).unwrap().is_empty());
    }
}
