//! Host key policy decisions

use beacon_core::HostKeyPolicy;

/// What the known-hosts file says about a presented key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KnownHost {
    /// Same key recorded for this host
    Match,
    /// Host not recorded
    Unknown,
    /// A different key is recorded for this host
    Changed,
}

/// Outcome of applying the policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Accept as is
    Accept,
    /// Accept and append to the known-hosts file
    AcceptAndRecord,
    /// Accept although the recorded key differs
    AcceptChanged,
    /// Refuse the handshake
    Reject(String),
}

/// Decide whether to trust a server key.
///
/// `pinned` is `Some(true)` when a configured fingerprint matches the key,
/// `Some(false)` when one is configured and differs, `None` when unset.
/// A configured pin narrows every policy: a mismatch always rejects, and a
/// match never overrides what the known-hosts file says.
pub(crate) fn decide(policy: HostKeyPolicy, known: KnownHost, pinned: Option<bool>) -> Verdict {
    if pinned == Some(false) {
        return Verdict::Reject("host key does not match the pinned fingerprint".into());
    }

    match policy {
        HostKeyPolicy::TrustOnFirstUse => match known {
            KnownHost::Match => Verdict::Accept,
            KnownHost::Unknown => Verdict::AcceptAndRecord,
            KnownHost::Changed => Verdict::AcceptChanged,
        },
        HostKeyPolicy::TrustStoreVerified => match known {
            KnownHost::Match => Verdict::Accept,
            KnownHost::Unknown => {
                Verdict::Reject("host is not in the known-hosts file".to_string())
            }
            KnownHost::Changed => Verdict::Reject(
                "host key differs from the one in the known-hosts file".to_string(),
            ),
        },
        HostKeyPolicy::RejectUnknown => match pinned {
            Some(_) => Verdict::Accept,
            None => Verdict::Reject("no pinned fingerprint configured".into()),
        },
    }
}

/// Compare a fingerprint with a configured pin, ignoring an `SHA256:` prefix
pub(crate) fn fingerprint_matches(pinned: &str, fingerprint: &str) -> bool {
    let strip = |s: &str| s.trim().trim_start_matches("SHA256:").to_string();
    strip(pinned) == strip(fingerprint)
}
