//! Domain name helpers shared by the extractor and the generator.
//!
//! Matching is ASCII case-insensitive and ignores a trailing dot. Wildcards
//! cover exactly one label, so `*.x.com` covers `api.x.com` but neither
//! `x.com` nor `a.b.x.com`.

/// Lowercase and strip surrounding whitespace and a trailing dot.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Returns true if a certificate name (possibly a wildcard) covers `domain`.
pub fn name_covers(cert_name: &str, domain: &str) -> bool {
    let cert_name = normalize_domain(cert_name);
    let domain = normalize_domain(domain);

    if cert_name == domain {
        return true;
    }

    match cert_name.strip_prefix("*.") {
        Some(parent) => match domain.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == parent,
            None => false,
        },
        None => false,
    }
}

/// Traefik router/service name for a domain: `rmm.x.com` → `rmm-x-com`,
/// `*.x.com` → `wildcard-x-com`.
pub fn service_name(domain: &str) -> String {
    let normalized = normalize_domain(domain);
    let mut name = String::with_capacity(normalized.len() + 8);
    for c in normalized.chars() {
        match c {
            '*' => name.push_str("wildcard"),
            '.' => name.push('-'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => name.push(c),
            _ => name.push('_'),
        }
    }
    name.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_domain(" RMM.Example.com. "), "rmm.example.com");
    }

    #[test]
    fn test_exact_and_wildcard_cover() {
        assert!(name_covers("api.x.com", "API.x.com"));
        assert!(name_covers("*.x.com", "api.x.com"));
        assert!(!name_covers("*.x.com", "x.com"));
        assert!(!name_covers("*.x.com", "a.b.x.com"));
        assert!(!name_covers("api.x.com", "mesh.x.com"));
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("rmm.x.com"), "rmm-x-com");
        assert_eq!(service_name("*.x.com"), "wildcard-x-com");
        assert_eq!(service_name("Mesh.X.com."), "mesh-x-com");
    }
}
