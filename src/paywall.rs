//! Detection of subscriber-wall stubs masquerading as article bodies.

/// Texts longer than this are treated as real content regardless of wording.
pub const MAX_STUB_WORDS: usize = 1000;

/// How many distinct signatures must appear before a text counts as a stub.
pub const MIN_SIGNATURE_MATCHES: usize = 2;

const SIGNATURES: &[&str] = &[
    "subscribe to stratechery",
    "this update is for paying subscribers",
    "already a subscriber? sign in",
    "join as a paid subscriber",
    "this post is for paid subscribers",
    "upgrade to paid",
    "member-only content",
    "subscriber-only",
    "premium subscription",
    "sign in to read",
    "become a member",
    "exclusive content for subscribers",
    "stratechery plus",
];

/// True when `text` looks like a paywall page instead of the article itself.
/// Shared by the fetch path and the processing pre-filter.
pub fn is_paywall(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    if text.split_whitespace().count() > MAX_STUB_WORDS {
        return false;
    }
    let lower = text.to_lowercase();
    SIGNATURES.iter().filter(|sig| lower.contains(*sig)).count() >= MIN_SIGNATURE_MATCHES
}
