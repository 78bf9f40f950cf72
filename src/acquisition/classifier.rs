use std::{collections::BTreeSet, net::Ipv4Addr};

/// Decides whether an address is worth keeping by its first three octets.
#[derive(Debug, Clone, Default)]
pub struct PrefixClassifier {
    allowed: BTreeSet<String>,
}

impl PrefixClassifier {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: prefixes
                .into_iter()
                .map(|prefix| prefix.as_ref().trim().to_string())
                .filter(|prefix| !prefix.is_empty())
                .collect(),
        }
    }

    /// Unparseable addresses never qualify.
    pub fn qualifies(&self, address: &str) -> bool {
        network_prefix(address).is_some_and(|prefix| self.allowed.contains(&prefix))
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// `"43.204.6.17"` -> `"43.204.6"`.
pub fn network_prefix(address: &str) -> Option<String> {
    let parsed: Ipv4Addr = address.trim().parse().ok()?;
    let [a, b, c, _] = parsed.octets();
    Some(format!("{a}.{b}.{c}"))
}
