//! Remote URL helpers: credential redaction and transport classification.

use std::sync::LazyLock;

use regex::Regex;

/// Replacement for a credential embedded in a URL.
pub const REDACTED: &str = "***";

/// `scheme://` followed by a userinfo segment (no `/`, `@` or whitespace)
/// ending at an `@`.
static USERINFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)(://)([^/@\s]+)@").expect("userinfo pattern is valid")
});

/// Mask an access token embedded before the `@` of a URL.
///
/// `https://ghp_abc123@github.com/o/r.git` becomes
/// `https://***@github.com/o/r.git`. Everything after the `@` is left
/// byte-for-byte intact. An ssh login name is not a secret: it is kept in
/// `ssh://git@host/path` just as in scp-style `git@host:path`, and only an
/// ssh `user:password` pair is masked. URLs without userinfo are returned
/// unchanged.
pub fn redact_credentials(url: &str) -> String {
    USERINFO
        .replace(url, |caps: &regex::Captures| {
            let (scheme, sep, userinfo) = (&caps[1], &caps[2], &caps[3]);
            if is_ssh_scheme(scheme) && !userinfo.contains(':') {
                caps[0].to_string()
            } else {
                format!("{}{}{}@", scheme, sep, REDACTED)
            }
        })
        .into_owned()
}

fn is_ssh_scheme(scheme: &str) -> bool {
    ["ssh", "git+ssh", "ssh+git"]
        .iter()
        .any(|s| scheme.eq_ignore_ascii_case(s))
}

/// How git reaches a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `ssh://...` or scp-style `user@host:path`.
    Ssh,
    Https,
    Http,
    /// The unauthenticated `git://` protocol.
    Git,
    /// A local path or `file://` URL.
    File,
    Unknown,
}

impl Transport {
    pub fn classify(url: &str) -> Self {
        let url = url.trim();
        let lower = url.to_ascii_lowercase();

        if lower.starts_with("ssh://") || lower.starts_with("git+ssh://") {
            return Transport::Ssh;
        }
        if lower.starts_with("https://") {
            return Transport::Https;
        }
        if lower.starts_with("http://") {
            return Transport::Http;
        }
        if lower.starts_with("git://") {
            return Transport::Git;
        }
        if lower.starts_with("file://") {
            return Transport::File;
        }
        if lower.contains("://") {
            return Transport::Unknown;
        }
        if is_scp_like(url) {
            return Transport::Ssh;
        }
        if url.starts_with('/') || url.starts_with('.') || url.starts_with('~') {
            return Transport::File;
        }
        Transport::Unknown
    }

    /// Whether a remote currently using `self` should be switched to the
    /// configured transport `wanted`.
    ///
    /// Plain http and git:// are always replaced. https is replaced when the
    /// configured remote uses ssh, so key-based auth is used instead of
    /// tokens.
    pub fn should_upgrade_to(self, wanted: Transport) -> bool {
        if self == wanted {
            return false;
        }
        match self {
            Transport::Http | Transport::Git => {
                matches!(wanted, Transport::Https | Transport::Ssh)
            }
            Transport::Https => wanted == Transport::Ssh,
            _ => false,
        }
    }
}

/// `[user@]host:path` where host has no slash before the colon.
fn is_scp_like(url: &str) -> bool {
    match url.find(':') {
        Some(colon) => {
            let host = &url[..colon];
            !host.is_empty() && !host.contains('/') && colon + 1 < url.len()
        }
        None => false,
    }
}
