use std::fmt;

/// Credential state for the reading service.
///
/// Only ever replaced through the value returned by a refresh; nothing holds a
/// shared mutable copy.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    cookie: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &self.cookie_names())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
        }
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    fn cookie_names(&self) -> Vec<&str> {
        self.cookie
            .split(';')
            .filter_map(|pair| pair.trim().split_once('=').map(|(n, _)| n))
            .collect()
    }

    /// Session with every `Set-Cookie` pair folded into the cookie string.
    pub fn with_set_cookies<'a, I>(&self, set_cookies: I) -> Session
    where
        I: IntoIterator<Item = &'a str>,
    {
        Session {
            cookie: merge_set_cookies(&self.cookie, set_cookies),
        }
    }
}

/// Merge `Set-Cookie` header values into a `Cookie` header string. Attributes
/// after the first `;` are ignored; existing names are updated in place and new
/// names are appended.
pub fn merge_set_cookies<'a, I>(current: &str, set_cookies: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut pairs: Vec<(String, String)> = current
        .split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    for header in set_cookies {
        let first = header.split(';').next().unwrap_or_default().trim();
        let Some((name, value)) = first.split_once('=') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() || value.is_empty() {
            continue;
        }
        match pairs.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.to_string(),
            None => pairs.push((name.to_string(), value.to_string())),
        }
    }

    pairs
        .iter()
        .map(|(n, v)| format!("{}={}", n, v))
        .collect::<Vec<_>>()
        .join("; ")
}
