use std::fmt;

pub const DEFAULT_ENVIRONMENTS: [&str; 3] = ["prod", "qa", "dev"];

/// Fleet cohorts a bundle may be requested for.
///
/// Matching is case-insensitive and by prefix, so `prod-a` and `dev-foo`
/// resolve to `prod` and `dev` respectively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvWhitelist {
    prefixes: Vec<String>,
}

impl EnvWhitelist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        Self { prefixes }
    }

    pub fn is_valid(&self, env: &str) -> bool {
        let env = env.to_ascii_lowercase();
        self.prefixes.iter().any(|prefix| env.starts_with(prefix.as_str()))
    }

    pub fn names(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for EnvWhitelist {
    fn default() -> Self {
        Self::new(DEFAULT_ENVIRONMENTS)
    }
}

impl fmt::Display for EnvWhitelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixes.join(","))
    }
}
