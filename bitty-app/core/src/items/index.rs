use super::VaultItem;

/// Upper bound on search results handed to the launcher.
pub const SEARCH_RESULT_LIMIT: usize = 50;

/// In-memory snapshot of the last-known login items.
#[derive(Debug, Default)]
pub struct ItemIndex {
    items: Vec<VaultItem>,
}

impl ItemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new snapshot. The previous items are dropped (and zeroized).
    pub fn replace(&mut self, items: Vec<VaultItem>) {
        self.items = items;
    }

    pub fn clear(&mut self) {
        self.items = Vec::new();
    }

    pub fn items(&self) -> &[VaultItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&VaultItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Case-insensitive AND search over name, username and URI.
    ///
    /// A blank query returns the first items in listing order. At most
    /// [`SEARCH_RESULT_LIMIT`] results are returned either way.
    pub fn search(&self, query: &str) -> Vec<&VaultItem> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.items.iter().take(SEARCH_RESULT_LIMIT).collect();
        }

        let terms: Vec<&str> = query.split_whitespace().collect();
        self.items
            .iter()
            .filter(|item| {
                let haystack =
                    format!("{} {} {}", item.name, item.username, item.uri).to_lowercase();
                terms.iter().all(|term| haystack.contains(term))
            })
            .take(SEARCH_RESULT_LIMIT)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str, username: &str, uri: &str) -> VaultItem {
        VaultItem {
            id: id.into(),
            name: name.into(),
            username: username.into(),
            password: format!("pw-{}", id),
            uri: uri.into(),
            notes: String::new(),
            folder_id: None,
        }
    }

    fn sample_index() -> ItemIndex {
        let mut index = ItemIndex::new();
        index.replace(vec![
            item("1", "GitHub", "user@example.com", "https://github.com"),
            item("2", "GitLab", "dev@example.com", "https://gitlab.com"),
            item("3", "My Bank", "customer42", "https://mybank.example"),
            item("4", "Email", "user@example.com", "https://mail.example.com"),
        ]);
        index
    }

    fn ids(results: Vec<&VaultItem>) -> Vec<String> {
        results.into_iter().map(|i| i.id.clone()).collect()
    }

    #[test]
    fn test_blank_query_returns_first_fifty_in_order() {
        let mut index = ItemIndex::new();
        index.replace(
            (0..60)
                .map(|i| item(&i.to_string(), &format!("Item {}", i), "", ""))
                .collect(),
        );
        let results = index.search("   ");
        assert_eq!(results.len(), SEARCH_RESULT_LIMIT);
        assert_eq!(results[0].id, "0");
        assert_eq!(results[49].id, "49");
    }

    #[test]
    fn test_matching_results_are_capped() {
        let mut index = ItemIndex::new();
        index.replace(
            (0..60)
                .map(|i| item(&i.to_string(), &format!("Account {}", i), "", ""))
                .collect(),
        );
        assert_eq!(index.search("account").len(), SEARCH_RESULT_LIMIT);
    }

    #[test]
    fn test_single_term_matches_substring() {
        let index = sample_index();
        assert_eq!(ids(index.search("git")), vec!["1", "2"]);
    }

    #[test]
    fn test_terms_are_anded() {
        let index = sample_index();
        assert_eq!(ids(index.search("git user")), vec!["1"]);
        assert!(index.search("git customer42").is_empty());
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let index = sample_index();
        assert_eq!(ids(index.search("mybank")), ids(index.search("MYBANK")));
        assert_eq!(ids(index.search("MYBANK")), vec!["3"]);
    }

    #[test]
    fn test_search_covers_username_and_uri_only() {
        let index = sample_index();
        assert_eq!(ids(index.search("mail.example")), vec!["4"]);
        assert_eq!(ids(index.search("customer")), vec!["3"]);
        // Passwords are never searched
        assert!(index.search("pw-1").is_empty());
    }

    #[test]
    fn test_get_by_id_and_clear() {
        let mut index = sample_index();
        assert_eq!(index.get_by_id("3").map(|i| i.name.as_str()), Some("My Bank"));
        assert!(index.get_by_id("99").is_none());

        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert!(index.search("").is_empty());
    }
}
