//! Identicon seed derivation.
//!
//! Both sides render the same identicon for a pairing so a user can compare
//! them. Rendering the image is left to the embedding application; this module
//! only derives the string it is rendered from.

/// Minimum length of a pairing hash worth rendering.
pub const MIN_HASH_LEN: usize = 68;

/// Derive the identicon input from a pairing hash.
///
/// The hash is reversed and every tenth character (index 10, 20, ...) is
/// replaced by `-`. Hashes shorter than [`MIN_HASH_LEN`] characters yield
/// `None`.
///
/// # Example
///
/// ```
/// use peerconnect_lib::identicon::identicon_seed;
///
/// assert_eq!(identicon_seed("too short"), None);
///
/// let seed = identicon_seed(&"0123456789".repeat(7)).unwrap();
/// assert!(seed.starts_with("9876543210-"));
/// ```
pub fn identicon_seed(hash: &str) -> Option<String> {
    if hash.chars().count() < MIN_HASH_LEN {
        #[cfg(feature = "tracing")]
        tracing::warn!("pairing hash is too short, not generating identicon");
        return None;
    }

    Some(
        hash.chars()
            .rev()
            .enumerate()
            .map(|(index, c)| if index > 0 && index % 10 == 0 { '-' } else { c })
            .collect(),
    )
}

/// Identicon input for a pairing between two addresses.
///
/// The dApp passes `(wallet, dapp)` and the wallet `(own, remote)`, so both
/// end up hashing the same concatenation.
pub fn pairing_identicon(first: &crate::PeerAddress, second: &crate::PeerAddress) -> Option<String> {
    identicon_seed(&format!("{}{}", first, second))
}
