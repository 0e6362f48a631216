// src/ingest/robots.rs
//! Minimal robots.txt handling: `User-agent` groups with `Allow`/`Disallow`
//! prefix rules. The longest matching rule wins; ties go to `Allow`.

use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    allow: Vec<String>,
    disallow: Vec<String>,
}

impl RobotsRules {
    /// Rules that apply to `user_agent`: its own group if present, else `*`.
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let token = user_agent
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let mut specific = RobotsRules::default();
        let mut wildcard = RobotsRules::default();
        let mut has_specific = false;

        // Agents named by the current group; reset when a rule follows a new UA line.
        let mut agents: Vec<String> = Vec::new();
        let mut in_rules = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            match key.as_str() {
                "user-agent" => {
                    if in_rules {
                        agents.clear();
                        in_rules = false;
                    }
                    agents.push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    for a in &agents {
                        let target = if a == "*" {
                            &mut wildcard
                        } else if !token.is_empty() && token == *a {
                            has_specific = true;
                            &mut specific
                        } else {
                            continue;
                        };
                        // Empty Disallow means "allow everything".
                        if value.is_empty() {
                            continue;
                        }
                        if key == "allow" {
                            target.allow.push(value.to_string());
                        } else {
                            target.disallow.push(value.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        if has_specific {
            specific
        } else {
            wildcard
        }
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |rules: &[String]| {
            rules
                .iter()
                .filter(|r| path.starts_with(r.as_str()))
                .map(|r| r.len())
                .max()
        };
        match (longest(&self.allow), longest(&self.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }
}

/// Parsed rules per host (`scheme://host:port`).
#[derive(Debug, Default)]
pub struct RobotsCache {
    hosts: Mutex<HashMap<String, RobotsRules>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, origin: &str) -> Option<RobotsRules> {
        self.hosts.lock().await.get(origin).cloned()
    }

    pub async fn put(&self, origin: &str, rules: RobotsRules) {
        self.hosts.lock().await.insert(origin.to_string(), rules);
    }
}
