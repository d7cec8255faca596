// crates/network/src/redact.rs
//! URL redaction for logs and error context

use reqwest::Url;

/// Placeholder written in place of anything that might identify a user
pub const REDACTED: &str = "***";

/// Path segments that are part of the API shape rather than user data
const SAFE_SEGMENTS: &[&str] = &[
    "$batch",
    "$value",
    "attachments",
    "beta",
    "calendars",
    "channels",
    "chats",
    "children",
    "contactfolders",
    "contacts",
    "content",
    "delta",
    "drive",
    "drives",
    "events",
    "groups",
    "items",
    "lists",
    "mailfolders",
    "me",
    "messages",
    "permissions",
    "root",
    "sites",
    "teams",
    "users",
    "v1.0",
];

fn is_safe_segment(segment: &str) -> bool {
    let lower = segment.to_ascii_lowercase();
    SAFE_SEGMENTS.contains(&lower.as_str())
}

/// Renders a URL with user-identifying parts replaced by `***`
///
/// Scheme, host and port are kept. Path segments outside a fixed API
/// vocabulary are replaced, every query value is replaced (keys are kept)
/// and any fragment or userinfo is dropped.
pub fn redact_url(url: &Url) -> String {
    let mut out = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    match url.path_segments() {
        Some(segments) => {
            for segment in segments {
                out.push('/');
                if segment.is_empty() || is_safe_segment(segment) {
                    out.push_str(segment);
                } else {
                    out.push_str(REDACTED);
                }
            }
        }
        None => out.push_str(url.path()),
    }

    let keys: Vec<String> = url
        .query_pairs()
        .map(|(key, _)| format!("{}={}", key, REDACTED))
        .collect();
    if !keys.is_empty() {
        out.push('?');
        out.push_str(&keys.join("&"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redact(url: &str) -> String {
        redact_url(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_user_segments_are_hidden() {
        assert_eq!(
            redact("https://graph.example.com/v1.0/users/alice@example.com/drive/items/01ABC/content"),
            "https://graph.example.com/v1.0/users/***/drive/items/***/content"
        );
    }

    #[test]
    fn test_query_values_are_hidden() {
        assert_eq!(
            redact("https://graph.example.com/v1.0/me/drive/root/delta?token=secret&$top=10"),
            "https://graph.example.com/v1.0/me/drive/root/delta?token=***&$top=***"
        );
    }

    #[test]
    fn test_userinfo_and_fragment_are_dropped() {
        assert_eq!(
            redact("https://user:pw@host.example.com:8443/beta/me#frag"),
            "https://host.example.com:8443/beta/me"
        );
    }

    #[test]
    fn test_segments_match_case_insensitively() {
        assert_eq!(
            redact("https://graph.example.com/v1.0/Users/x/MailFolders"),
            "https://graph.example.com/v1.0/Users/***/MailFolders"
        );
    }

    #[test]
    fn test_trailing_slash_is_kept() {
        assert_eq!(redact("https://host.example.com/"), "https://host.example.com/");
    }
}
