use url::Url;

/// Known domains that don't support webmentions. Mainly just the silos, plus
/// shorteners whose expanded form is already pulled from the post entities.
const WEBMENTION_BLACKLIST: &[&str] = &[
    "amzn.com",
    "amazon.com",
    "facebook.com",
    "m.facebook.com",
    "instagram.com",
    "plus.google.com",
    "twitter.com",
    "t.co",
    "youtube.com",
    "youtu.be",
];

/// Whether a candidate URL is eligible for webmention delivery. Total: any
/// malformed input is simply ineligible.
pub fn is_eligible(target: &str) -> bool {
    let parsed = match Url::parse(target) {
        Ok(url) => url,
        Err(_) => return false,
    };

    let host = match parsed.host_str() {
        Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return false,
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);

    !WEBMENTION_BLACKLIST.contains(&host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_sites() {
        assert!(is_eligible("http://example.com/post/123"));
        assert!(is_eligible("https://snarfed.org/2013-02-01_post"));
    }

    #[test]
    fn strips_www_before_matching() {
        assert!(!is_eligible("http://www.facebook.com/2468/posts/135"));
        assert!(!is_eligible("https://www.youtube.com/watch?v=abc"));
        // www on an ordinary site stays eligible
        assert!(is_eligible("http://www.example.com/post"));
    }

    #[test]
    fn rejects_silo_domains() {
        assert!(!is_eligible("https://twitter.com/user/status/1"));
        assert!(!is_eligible("http://t.co/abc"));
        assert!(!is_eligible("https://instagram.com/p/xyz"));
    }

    #[test]
    fn rejects_malformed_and_hostless() {
        assert!(!is_eligible(""));
        assert!(!is_eligible("not a url"));
        assert!(!is_eligible("mailto:someone@example.com"));
        assert!(!is_eligible("file:///etc/passwd"));
    }
}
