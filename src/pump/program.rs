//! Pump.fun program constants and discriminators
//!
//! # WARNING: These constants may change without notice
//! Pump.fun has historically modified their program behavior.
//! If event parsing breaks, these values may need to be updated.
//!
//! # How discriminators are calculated
//! Anchor uses the first 8 bytes of SHA-256("event:<EventName>")
//! as the discriminator of an emitted event.

/// Pump.fun program ID
/// WARNING: This may change if pump.fun deploys a new program version
pub const PUMP_PROGRAM_ID_STR: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Prefix Anchor puts in front of base64 event payloads in program logs
pub const PROGRAM_DATA_PREFIX: &str = "Program data: ";

lazy_static::lazy_static! {
    /// Discriminator of the `CreateEvent` emitted by the create instruction
    pub static ref CREATE_EVENT_DISCRIMINATOR: [u8; 8] = calculate_event_discriminator("CreateEvent");
}

/// Calculate event discriminator from name
/// This follows Anchor's convention: SHA-256("event:<name>")[0..8]
pub fn calculate_event_discriminator(name: &str) -> [u8; 8] {
    use sha2::{Digest, Sha256};

    let preimage = format!("event:{}", name);
    let hash = Sha256::digest(preimage.as_bytes());

    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}
