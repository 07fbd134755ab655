//! Cookie-domain normalization.
//!
//! The platform serves the same account from two sibling domains and is
//! picky about which domain a continuation cookie was issued for. This
//! module canonicalizes domain spellings and mirrors critical records onto
//! the sibling domain. It is a compatibility shim; nothing else in the
//! crate depends on its details.

use std::collections::HashSet;

use durand_core::{CredentialBundle, CredentialRecord};

/// Canonical spellings of the two related platform domains.
pub const PLATFORM_DOMAINS: [&str; 2] = [".facebook.com", ".messenger.com"];

/// Canonical form of a domain string.
///
/// Any spelling of a platform domain or one of its sub-domains maps to the
/// dotted base (`www.facebook.com` → `.facebook.com`). Other domains are
/// only trimmed.
#[must_use]
pub fn canonical_domain(domain: &str) -> String {
    let bare = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    for canonical in PLATFORM_DOMAINS {
        let base = &canonical[1..];
        if bare == base || bare.ends_with(canonical) {
            return canonical.to_string();
        }
    }
    domain.trim().to_string()
}

fn sibling(domain: &str) -> Option<&'static str> {
    match domain {
        d if d == PLATFORM_DOMAINS[0] => Some(PLATFORM_DOMAINS[1]),
        d if d == PLATFORM_DOMAINS[1] => Some(PLATFORM_DOMAINS[0]),
        _ => None,
    }
}

/// Normalize a bundle.
///
/// Output length is at least the de-duplicated input length: every
/// critical record seen under one platform domain also appears under the
/// sibling. Records are unique by `(key, domain)`, first occurrence wins,
/// so `normalize(normalize(b)) == normalize(b)`.
#[must_use]
pub fn normalize(bundle: CredentialBundle, critical_keys: &[String]) -> CredentialBundle {
    let mut seen: HashSet<(String, Option<String>)> = HashSet::new();
    let mut records: Vec<CredentialRecord> = Vec::with_capacity(bundle.len() * 2);

    for mut record in bundle.into_records() {
        record.domain = record.domain.as_deref().map(canonical_domain);
        if seen.insert((record.key.clone(), record.domain.clone())) {
            records.push(record);
        }
    }

    let mut mirrored = Vec::new();
    for record in &records {
        if !critical_keys.iter().any(|k| *k == record.key) {
            continue;
        }
        let Some(other) = record.domain.as_deref().and_then(sibling) else {
            continue;
        };
        if seen.insert((record.key.clone(), Some(other.to_string()))) {
            mirrored.push(record.with_domain(other));
        }
    }
    records.extend(mirrored);

    CredentialBundle::new(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CredentialPolicy;

    fn critical() -> Vec<String> {
        CredentialPolicy::default().critical_keys
    }

    fn rec(key: &str, domain: Option<&str>) -> CredentialRecord {
        CredentialRecord::new(key, format!("{key}-value"), domain)
    }

    #[test]
    fn test_canonical_domain() {
        assert_eq!(canonical_domain("facebook.com"), ".facebook.com");
        assert_eq!(canonical_domain(" .www.Facebook.com "), ".facebook.com");
        assert_eq!(canonical_domain("m.facebook.com"), ".facebook.com");
        assert_eq!(canonical_domain("messenger.com"), ".messenger.com");
        assert_eq!(canonical_domain("notfacebook.com"), "notfacebook.com");
        assert_eq!(canonical_domain(" example.org"), "example.org");
    }

    #[test]
    fn test_critical_records_are_mirrored() {
        let input = CredentialBundle::new(vec![
            rec("c_user", Some("facebook.com")),
            rec("xs", Some(".messenger.com")),
            rec("presence", Some(".facebook.com")),
            rec("datr", None),
        ]);
        let out = normalize(input.clone(), &critical());

        assert!(out.len() >= input.len());
        let pairs: Vec<(&str, Option<&str>)> = out
            .iter()
            .map(|r| (r.key.as_str(), r.domain.as_deref()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("c_user", Some(".facebook.com")),
                ("xs", Some(".messenger.com")),
                ("presence", Some(".facebook.com")),
                ("datr", None),
                ("c_user", Some(".messenger.com")),
                ("xs", Some(".facebook.com")),
            ]
        );
        assert_eq!(out.records()[4].value, "c_user-value");
    }

    #[test]
    fn test_duplicates_collapse_first_wins() {
        let mut first = rec("c_user", Some(".facebook.com"));
        first.value = "first".into();
        let mut second = rec("c_user", Some("www.facebook.com"));
        second.value = "second".into();
        let out = normalize(CredentialBundle::new(vec![first, second]), &critical());

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.value == "first"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = vec![
            CredentialBundle::default(),
            CredentialBundle::new(vec![rec("c_user", Some("facebook.com"))]),
            CredentialBundle::new(vec![
                rec("c_user", Some("www.facebook.com")),
                rec("c_user", Some("messenger.com")),
                rec("xs", Some(".facebook.com")),
                rec("xs", Some(".facebook.com")),
                rec("fr", Some("example.org")),
                rec("sb", None),
            ]),
            CredentialBundle::new(vec![
                rec("datr", Some(".messenger.com")),
                rec("wd", Some("m.facebook.com")),
                rec("datr", Some(".facebook.com")),
            ]),
        ];

        for bundle in samples {
            let once = normalize(bundle, &critical());
            let twice = normalize(once.clone(), &critical());
            assert_eq!(once, twice);
        }
    }
}
