//! In-memory message catalog used by job bodies to localize what they send.

use std::collections::HashMap;

use echoboard_core::Locale;

/// `(locale, key) -> message` table.
///
/// Lookup order: exact locale, its primary language (`pt` for `pt-BR`), the
/// fallback locale, then the key itself.
#[derive(Debug, Clone)]
pub struct Catalog {
    fallback: Locale,
    messages: HashMap<String, HashMap<String, String>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(Locale::default())
    }
}

impl Catalog {
    pub fn new(fallback: Locale) -> Self {
        Self {
            fallback,
            messages: HashMap::new(),
        }
    }

    pub fn insert(&mut self, locale: &Locale, key: impl Into<String>, message: impl Into<String>) {
        self.messages
            .entry(locale.as_str().to_string())
            .or_default()
            .insert(key.into(), message.into());
    }

    pub fn with_messages<K, V>(
        mut self,
        locale: &Locale,
        messages: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, message) in messages {
            self.insert(locale, key, message);
        }
        self
    }

    /// Load a flat JSON object of `key: message` pairs for `locale`.
    pub fn load_json(&mut self, locale: &Locale, json: &str) -> Result<(), serde_json::Error> {
        let messages: HashMap<String, String> = serde_json::from_str(json)?;
        self.messages
            .entry(locale.as_str().to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }

    pub fn lookup<'a>(&'a self, locale: &Locale, key: &'a str) -> &'a str {
        [locale.as_str(), locale.language(), self.fallback.as_str()]
            .into_iter()
            .find_map(|tag| self.messages.get(tag).and_then(|m| m.get(key)))
            .map(String::as_str)
            .unwrap_or(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locale(tag: &str) -> Locale {
        tag.parse().unwrap()
    }

    fn catalog() -> Catalog {
        Catalog::default()
            .with_messages(
                &locale("en"),
                [("email.new_post.subject", "New post"), ("greeting", "Hello")],
            )
            .with_messages(&locale("fr"), [("email.new_post.subject", "Nouvelle publication")])
            .with_messages(&locale("pt-BR"), [("greeting", "Olá")])
    }

    #[test]
    fn exact_locale_wins() {
        assert_eq!(
            catalog().lookup(&locale("fr"), "email.new_post.subject"),
            "Nouvelle publication"
        );
    }

    #[test]
    fn region_falls_back_to_language() {
        let catalog = catalog().with_messages(&locale("fr"), [("greeting", "Bonjour")]);
        assert_eq!(catalog.lookup(&locale("fr-CA"), "greeting"), "Bonjour");
    }

    #[test]
    fn missing_message_falls_back_to_default_locale_then_key() {
        let catalog = catalog();
        assert_eq!(catalog.lookup(&locale("fr"), "greeting"), "Hello");
        assert_eq!(catalog.lookup(&locale("fr"), "unknown.key"), "unknown.key");
    }

    #[test]
    fn load_json_merges_messages() {
        let mut catalog = catalog();
        catalog
            .load_json(&locale("de"), r#"{"greeting": "Hallo"}"#)
            .unwrap();
        assert_eq!(catalog.lookup(&locale("de"), "greeting"), "Hallo");
        assert!(catalog.load_json(&locale("de"), "[1, 2]").is_err());
    }
}
