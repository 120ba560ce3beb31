//! Minimal robots.txt support: the `User-agent: *` group, `Disallow` prefixes, and
//! `Allow` overrides where the longest matching rule wins.

use reqwest::Client;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    prefix: String,
    allow: bool,
}

/// Path rules that apply to this crawler on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    rules: Vec<Rule>,
}

impl RobotsRules {
    /// Rules that permit every path.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses a robots.txt body, keeping only groups addressed to `*`.
    pub fn parse(body: &str) -> Self {
        let mut rules = Vec::new();
        let mut group_applies = false;
        let mut in_agent_block = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if !in_agent_block {
                        group_applies = false;
                        in_agent_block = true;
                    }
                    if value == "*" {
                        group_applies = true;
                    }
                }
                "allow" | "disallow" => {
                    in_agent_block = false;
                    if !group_applies || value.is_empty() {
                        continue;
                    }
                    rules.push(Rule {
                        prefix: value.trim_end_matches('*').to_string(),
                        allow: field == "allow",
                    });
                }
                _ => in_agent_block = false,
            }
        }
        Self { rules }
    }

    /// Whether `url` may be fetched under these rules.
    pub fn is_allowed(&self, url: &Url) -> bool {
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut verdict: Option<&Rule> = None;
        for rule in &self.rules {
            if !target.starts_with(&rule.prefix) {
                continue;
            }
            verdict = match verdict {
                Some(best)
                    if best.prefix.len() > rule.prefix.len()
                        || (best.prefix.len() == rule.prefix.len() && best.allow) =>
                {
                    Some(best)
                }
                _ => Some(rule),
            };
        }
        verdict.map(|rule| rule.allow).unwrap_or(true)
    }
}

/// Fetches and parses the robots.txt governing `url`'s origin.
///
/// Any failure to retrieve the file yields [`RobotsRules::allow_all`].
pub async fn fetch_rules(client: &Client, url: &Url) -> RobotsRules {
    let Ok(robots_url) = url.join("/robots.txt") else {
        return RobotsRules::allow_all();
    };
    let response = match client.get(robots_url.as_str()).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!(url = %robots_url, status = %response.status(), "robots.txt unavailable");
            return RobotsRules::allow_all();
        }
        Err(err) => {
            debug!(url = %robots_url, error = %err, "robots.txt unreachable");
            return RobotsRules::allow_all();
        }
    };
    match response.text().await {
        Ok(body) => RobotsRules::parse(&body),
        Err(_) => RobotsRules::allow_all(),
    }
}

/// Cache key identifying the robots.txt scope of `url`.
pub fn origin_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}
