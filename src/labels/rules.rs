use url::Url;

use crate::domain::{DomainRule, DomainRules};

/// Reduces user input such as `https://www.Example.com:8080/path` to the bare
/// hostname rules are keyed by (`example.com`). Returns `None` for blank input.
pub fn normalize_domain(input: &str) -> Option<String> {
    let mut value = input.trim().to_lowercase();
    if value.is_empty() {
        return None;
    }
    if value.contains("://") {
        if let Some(host) = Url::parse(&value).ok().and_then(|u| u.host_str().map(str::to_string)) {
            value = host;
        }
    }
    let value = value
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let value = value.split('/').next().unwrap_or_default();
    let value = value.split(':').next().unwrap_or_default();
    let value = value.strip_prefix("www.").unwrap_or(value);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Inserts or overwrites the rule for a domain. Returns the normalized key.
pub fn upsert_rule(rules: &mut DomainRules, domain: &str, label_id: &str) -> Option<String> {
    let key = normalize_domain(domain)?;
    rules.insert(key.clone(), DomainRule::new(label_id));
    Some(key)
}

pub fn delete_rule(rules: &mut DomainRules, domain: &str) -> bool {
    let key = normalize_domain(domain).unwrap_or_else(|| domain.to_string());
    rules.remove(&key).is_some()
}

pub fn clear_rules(rules: &mut DomainRules) -> usize {
    let count = rules.len();
    rules.clear();
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_urls_and_hostnames() {
        assert_eq!(
            normalize_domain("https://www.Example.com:8080/path?q=1"),
            Some("example.com".into())
        );
        assert_eq!(normalize_domain("www.github.com/rust-lang"), Some("github.com".into()));
        assert_eq!(normalize_domain("news.ycombinator.com:443"), Some("news.ycombinator.com".into()));
        assert_eq!(normalize_domain("   "), None);
    }

    #[test]
    fn upsert_overwrites_existing_rule() {
        let mut rules = DomainRules::new();
        assert_eq!(upsert_rule(&mut rules, "www.github.com", "work"), Some("github.com".into()));
        upsert_rule(&mut rules, "github.com", "read");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules["github.com"].label_id, "read");

        assert!(delete_rule(&mut rules, "https://github.com/"));
        assert!(rules.is_empty());
    }
}
