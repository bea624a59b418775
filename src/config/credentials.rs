use std::fmt;

/// Highest numbered `GEMINI_KEY_<n>` variable that is consulted.
const MAX_NUMBERED_KEYS: usize = 32;

/// Set of API keys available for rotation.
///
/// Keys come from the environment only and are never serialized.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialPool {
    keys: Vec<String>,
}

impl CredentialPool {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = Self::default();
        for key in keys {
            pool.push(key.into());
        }
        pool
    }

    /// Reads `GEMINI_KEY_1..GEMINI_KEY_32` and the comma-separated
    /// `GEMINI_API_KEYS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut pool = Self::default();
        for n in 1..=MAX_NUMBERED_KEYS {
            if let Some(key) = lookup(&format!("GEMINI_KEY_{}", n)) {
                pool.push(key);
            }
        }
        if let Some(list) = lookup("GEMINI_API_KEYS") {
            for key in list.split(',') {
                pool.push(key.to_string());
            }
        }
        pool
    }

    fn push(&mut self, key: String) {
        let key = key.trim();
        if !key.is_empty() && !self.keys.iter().any(|k| k == key) {
            self.keys.push(key.to_string());
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| mask_key(k)))
            .finish()
    }
}

/// Short prefix of a key, safe for logs.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(6).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn numbered_and_listed_keys_are_merged_without_blanks_or_duplicates() {
        let env: HashMap<String, String> = [
            ("GEMINI_KEY_1", "alpha"),
            ("GEMINI_KEY_3", "gamma"),
            ("GEMINI_KEY_4", "  "),
            ("GEMINI_API_KEYS", "delta, alpha,,epsilon"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let pool = CredentialPool::from_lookup(|name| env.get(name).cloned());
        assert_eq!(pool.keys(), ["alpha", "gamma", "delta", "epsilon"]);
    }

    #[test]
    fn debug_output_masks_keys() {
        let pool = CredentialPool::new(["AIzaSyVerySecretValue"]);
        let rendered = format!("{:?}", pool);
        assert!(rendered.contains("AIzaSy..."));
        assert!(!rendered.contains("VerySecret"));
    }
}
