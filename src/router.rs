//! Keyword routing of a question to the agents that can answer it.

use crate::models::AgentKind;

const GA4_SIGNALS: &[&str] = &[
    "page",
    "pages",
    "session",
    "sessions",
    "traffic",
    "visitor",
    "visitors",
    "user",
    "users",
    "pageview",
    "pageviews",
    "view",
    "views",
    "bounce",
    "conversion",
    "conversions",
    "engagement",
    "landing",
    "referral",
    "referrals",
    "channel",
    "channels",
    "device",
    "devices",
    "country",
    "countries",
    "event",
    "events",
    "audience",
];

const SEO_SIGNALS: &[&str] = &[
    "ranking",
    "rankings",
    "rank",
    "ranks",
    "keyword",
    "keywords",
    "backlink",
    "backlinks",
    "serp",
    "position",
    "positions",
    "impression",
    "impressions",
    "ctr",
    "organic",
    "domain",
    "authority",
    "crawl",
    "indexed",
    "indexing",
    "seo",
    "anchor",
    "referring",
];

/// Lowercase, split on anything that is not alphanumeric, and rejoin with
/// single spaces.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Agents to consult, GA4 first. Never empty: a question with signals for
/// both domains, or for neither, goes to both.
pub fn route(text: &str) -> Vec<AgentKind> {
    let normalized = normalize(text);
    let tokens: Vec<&str> = normalized.split(' ').collect();

    let ga4 = tokens.iter().any(|t| GA4_SIGNALS.contains(t));
    let seo = tokens.iter().any(|t| SEO_SIGNALS.contains(t));

    match (ga4, seo) {
        (true, false) => vec![AgentKind::Ga4],
        (false, true) => vec![AgentKind::Seo],
        _ => vec![AgentKind::Ga4, AgentKind::Seo],
    }
}
