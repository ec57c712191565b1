//! Deterministic, bounded-length identifiers.
//!
//! Cluster and virtual-host names are derived from Kubernetes object names,
//! which may individually be up to 253 characters; Envoy limits resource names
//! to 60. [`hashname`] joins the parts with `/` and, when the result is too
//! long, truncates parts from the right, branding each truncated part with a
//! short hash of the whole input so that distinct inputs stay distinct.
//!
//! The output is a wire contract: the same `(namespace, service, port)` triple
//! must map to the same cluster name on every code path that mentions it.

use sha2::{Digest, Sha256};

/// The maximum length of a generated resource name.
pub const MAX_NAME_LEN: usize = 60;

const SHORTHASH: usize = 6;

/// Returns an identifier no longer than `l` derived from `parts`.
///
/// If the `/`-joined parts fit under `l` they are returned verbatim.
/// Otherwise parts are truncated right-to-left, each branded with a six
/// character hash of the original joined string; if every part has been
/// truncated and the result is still too long, the hash itself (clipped to
/// `l`) is returned.
pub fn hashname(l: usize, parts: &[&str]) -> String {
    let mut parts: Vec<String> = parts.iter().map(|s| (*s).to_owned()).collect();
    let mut r = parts.join("/");
    if l > r.len() {
        return r;
    }

    let hash = hex_digest(&r);
    for n in (0..parts.len()).rev() {
        parts[n] = truncate(l / parts.len(), &parts[n], &hash[..SHORTHASH]);
        r = parts.join("/");
        if l > r.len() {
            return r;
        }
    }

    // Truncated everything and still too long.
    hash[..l.min(hash.len())].to_owned()
}

/// Truncates `s` to at most `l` bytes by replacing its tail with `-suffix`.
fn truncate(l: usize, s: &str, suffix: &str) -> String {
    if l >= s.len() {
        return s.to_owned();
    }
    if l <= suffix.len() {
        return suffix[..l.min(suffix.len())].to_owned();
    }
    format!("{}-{}", &s[..l - suffix.len() - 1], suffix)
}

fn hex_digest(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_pass_through() {
        assert_eq!(
            hashname(MAX_NAME_LEN, &["default", "kuard", "80"]),
            "default/kuard/80"
        );
        assert_eq!(hashname(MAX_NAME_LEN, &["*"]), "*");
        assert_eq!(hashname(MAX_NAME_LEN, &["www.example.com"]), "www.example.com");
    }

    #[test]
    fn output_never_exceeds_limit() {
        let long = "a".repeat(250);
        let cases: Vec<Vec<&str>> = vec![
            vec![&long],
            vec!["default", &long, "80"],
            vec![&long, &long, &long],
            vec!["ns", "svc", "http"],
        ];
        for parts in &cases {
            for l in [6, 15, 32, 60] {
                let name = hashname(l, parts);
                assert!(
                    name.len() <= l,
                    "hashname({}, {:?}) = {:?} exceeds limit",
                    l,
                    parts,
                    name
                );
            }
        }
    }

    #[test]
    fn deterministic() {
        let long = "b".repeat(120);
        let parts = ["default", long.as_str(), "8080"];
        assert_eq!(hashname(MAX_NAME_LEN, &parts), hashname(MAX_NAME_LEN, &parts));
    }

    #[test]
    fn distinct_inputs_stay_distinct() {
        let a = "a".repeat(120);
        let b = format!("{}x", "a".repeat(119));
        assert_ne!(
            hashname(MAX_NAME_LEN, &["default", &a, "80"]),
            hashname(MAX_NAME_LEN, &["default", &b, "80"])
        );
    }

    #[test]
    fn truncated_parts_carry_the_brand() {
        let long = "c".repeat(200);
        let name = hashname(MAX_NAME_LEN, &["default", &long, "80"]);
        assert!(name.len() <= MAX_NAME_LEN);
        // The tail part is truncated last; the middle part carries -hash.
        assert!(name.starts_with("default/"), "got {:?}", name);
        assert!(name.ends_with("/80"), "got {:?}", name);
        assert!(name.contains('-'), "got {:?}", name);
    }

    #[test]
    fn truncate_rules() {
        assert_eq!(truncate(10, "short", "abcdef"), "short");
        assert_eq!(truncate(4, "longer-than-l", "abcdef"), "abcd");
        assert_eq!(truncate(10, "longer-than-l", "abcdef"), "lon-abcdef");
    }
}
