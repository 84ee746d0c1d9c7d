//! Share links of the form `<base>?peer=<id>`.

use tandem_shared::constants::DEEP_LINK_PARAM;
use tandem_shared::PeerId;
use url::{form_urlencoded, Url};

/// Link that makes whoever opens it dial `peer`.
pub fn share_link(base: &Url, peer: &PeerId) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .append_pair(DEEP_LINK_PARAM, peer.as_str());
    url
}

/// Target peer named by a link. Accepts a full URL or a bare query string
/// (`?peer=...`). A link without the parameter, or with an empty value,
/// names no one.
pub fn target_peer(link: &str) -> Result<Option<PeerId>, url::ParseError> {
    let link = link.trim();
    let query = match link.strip_prefix('?') {
        Some(query) => query.to_string(),
        None => Url::parse(link)?.query().unwrap_or_default().to_string(),
    };

    Ok(form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == DEEP_LINK_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PeerId::new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_link_carries_the_peer() {
        let base = Url::parse("https://tandem.local/chat?stale=1").unwrap();
        let link = share_link(&base, &"abc-123".into());
        assert_eq!(link.as_str(), "https://tandem.local/chat?peer=abc-123");
        assert_eq!(target_peer(link.as_str()).unwrap(), Some(PeerId::new("abc-123")));
    }

    #[test]
    fn bare_query_is_accepted() {
        assert_eq!(target_peer("?peer=xyz").unwrap(), Some(PeerId::new("xyz")));
        assert_eq!(target_peer("?other=1&peer=a%20b").unwrap(), Some(PeerId::new("a b")));
    }

    #[test]
    fn missing_or_empty_target_names_no_one() {
        assert_eq!(target_peer("https://tandem.local/").unwrap(), None);
        assert_eq!(target_peer("https://tandem.local/?peer=").unwrap(), None);
        assert_eq!(target_peer("?").unwrap(), None);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(target_peer("not a link").is_err());
    }
}
