//! Hostname matching against wildcarded certificate common names
//!
//! This is the permissive legacy algorithm, not RFC 6125. A `*` may appear
//! anywhere in any label and may match across several characters of a label,
//! and a pattern whose remaining left part is exactly `*` matches any number
//! of remaining host labels (`foo.foo.bar.com` matches `*.bar.com`). A bare
//! `*` pattern matches every hostname. Comparison ignores ASCII case.

/// Matches one label (or a dot-free remainder) against a wildcarded pattern
fn subdomain_match(label: &str, pattern: &str) -> bool {
    let Some(star) = pattern.find('*') else {
        return label == pattern;
    };
    if !label.starts_with(&pattern[..star]) {
        return false;
    }
    let rest = &pattern[star + 1..];
    if rest.is_empty() {
        return true;
    }
    // any character of the next literal piece may start the continuation;
    // an empty piece (`**`) may start anywhere, including the end
    let needle = rest.find('*').map_or(rest, |next| &rest[..next]);
    let remainder = &label[star..];
    remainder
        .char_indices()
        .map(|(pos, c)| (pos, Some(c)))
        .chain(std::iter::once((remainder.len(), None)))
        .any(|(pos, c)| {
            let starts_piece = match c {
                Some(c) => needle.is_empty() || needle.contains(c),
                None => needle.is_empty(),
            };
            starts_piece && subdomain_match(&remainder[pos..], rest)
        })
}

/// True when `hostname` is matched by the certificate name `pattern`; an empty hostname never is
pub fn wildcard_match(hostname: &str, pattern: &str) -> bool {
    let hostname = hostname.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    let mut host = hostname.strip_suffix('.').unwrap_or(&hostname);
    let mut pattern = pattern.strip_suffix('.').unwrap_or(&pattern);
    if host.is_empty() {
        return false;
    }

    while let (Some(h), Some(p)) = (host.rfind('.'), pattern.rfind('.')) {
        if !subdomain_match(&host[h + 1..], &pattern[p + 1..]) {
            return false;
        }
        host = &host[..h];
        pattern = &pattern[..p];
    }

    if pattern == "*" {
        return true;
    }
    subdomain_match(host, pattern)
}
