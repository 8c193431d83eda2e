//! Creation-event detection and extraction
//!
//! Transactions are classified from their account keys and log output
//! only. Field extraction is best-effort: a missing name or symbol falls
//! back to a placeholder, a missing mint drops the event.

use base64::Engine;
use borsh::BorshDeserialize;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tracing::debug;

use super::program::{CREATE_EVENT_DISCRIMINATOR, PROGRAM_DATA_PREFIX};
use crate::rpc::client::TransactionDetail;

/// Placeholder for a token whose name could not be read
pub const UNKNOWN_NAME: &str = "Unknown Token";

/// Placeholder for a token whose symbol could not be read
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// A newly created token, as seen in one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct CreationEvent {
    /// Token mint address
    pub asset_id: String,
    /// Token name
    pub name: String,
    /// Token symbol
    pub symbol: String,
    /// Transaction signature the event was read from
    pub source_signature: String,
    /// Slot of the source transaction
    pub slot: u64,
}

/// Layout of the Anchor `CreateEvent` payload (after the discriminator).
/// Newer program versions append fields; those are ignored.
#[derive(Debug, BorshDeserialize)]
struct CreateEventData {
    name: String,
    symbol: String,
    _uri: String,
    mint: [u8; 32],
    _bonding_curve: [u8; 32],
    _user: [u8; 32],
}

/// Does this transaction look like a token creation on `program_id`?
///
/// Requires the program in the account keys and at least one log line
/// containing a creation marker.
pub fn is_creation_transaction(
    tx: &TransactionDetail,
    program_id: &str,
    markers: &[String],
) -> bool {
    let references_program = tx.account_keys.iter().any(|k| k == program_id);
    if !references_program {
        return false;
    }

    tx.logs
        .iter()
        .any(|line| markers.iter().any(|m| line.contains(m.as_str())))
}

/// Extract a creation event from a transaction's logs
pub fn extract_creation_event(tx: &TransactionDetail) -> Option<CreationEvent> {
    let fields = parse_log_fields(&tx.logs);

    let (mint, name, symbol) = match fields.mint {
        Some(mint) => (mint, fields.name, fields.symbol),
        None => {
            let decoded = decode_create_event(&tx.logs)?;
            (
                decoded.mint,
                fields.name.or(Some(decoded.name)),
                fields.symbol.or(Some(decoded.symbol)),
            )
        }
    };

    let name = name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string());
    let symbol = symbol
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SYMBOL.to_string());

    Some(CreationEvent {
        asset_id: mint.to_string(),
        name,
        symbol,
        source_signature: tx.signature.clone(),
        slot: tx.slot,
    })
}

#[derive(Debug, Default)]
struct LogFields {
    mint: Option<Pubkey>,
    name: Option<String>,
    symbol: Option<String>,
}

/// Scrape `mint:`, `name:` and `symbol:` fields from log lines
fn parse_log_fields(logs: &[String]) -> LogFields {
    let mut fields = LogFields::default();

    for line in logs {
        if let Some(value) = field_value(line, "mint:") {
            // Shortest base58 pubkey is 32 chars
            if value.len() >= 32 {
                if let Ok(pubkey) = Pubkey::from_str(value) {
                    fields.mint = Some(pubkey);
                }
            }
        }

        if let Some(value) = field_value(line, "name:") {
            fields.name = Some(value.to_string());
        }

        if let Some(value) = field_value(line, "symbol:") {
            fields.symbol = Some(value.to_string());
        }
    }

    fields
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split(key).nth(1).map(str::trim)
}

struct DecodedCreate {
    mint: Pubkey,
    name: String,
    symbol: String,
}

/// Decode the first `CreateEvent` found in `Program data:` lines
fn decode_create_event(logs: &[String]) -> Option<DecodedCreate> {
    for line in logs {
        let Some(payload) = line
            .find(PROGRAM_DATA_PREFIX)
            .map(|idx| &line[idx + PROGRAM_DATA_PREFIX.len()..])
        else {
            continue;
        };

        let bytes = match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };

        if bytes.len() < 8 || bytes[..8] != CREATE_EVENT_DISCRIMINATOR[..] {
            continue;
        }

        let mut data = &bytes[8..];
        match CreateEventData::deserialize(&mut data) {
            Ok(event) => {
                return Some(DecodedCreate {
                    mint: Pubkey::new_from_array(event.mint),
                    name: event.name,
                    symbol: event.symbol,
                })
            }
            Err(e) => {
                debug!("CreateEvent decode failed: {}", e);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::program::PUMP_PROGRAM_ID_STR;

    fn tx(account_keys: Vec<&str>, logs: Vec<String>) -> TransactionDetail {
        TransactionDetail {
            signature: "sig1".to_string(),
            slot: 42,
            account_keys: account_keys.into_iter().map(String::from).collect(),
            logs,
        }
    }

    fn markers() -> Vec<String> {
        vec!["Instruction: Create".to_string()]
    }

    fn encode_create_event(name: &str, symbol: &str, mint: &Pubkey) -> String {
        let mut data = CREATE_EVENT_DISCRIMINATOR.to_vec();
        for s in [name, symbol, "https://example.com/meta.json"] {
            data.extend_from_slice(&(s.len() as u32).to_le_bytes());
            data.extend_from_slice(s.as_bytes());
        }
        data.extend_from_slice(&mint.to_bytes());
        data.extend_from_slice(&Pubkey::new_unique().to_bytes());
        data.extend_from_slice(&Pubkey::new_unique().to_bytes());
        // trailing fields from newer program versions
        data.extend_from_slice(&[0u8; 40]);

        format!(
            "Program data: {}",
            base64::engine::general_purpose::STANDARD.encode(data)
        )
    }

    #[test]
    fn test_creation_predicate_needs_program_and_marker() {
        let logs = vec!["Program log: Instruction: Create".to_string()];

        assert!(is_creation_transaction(
            &tx(vec![PUMP_PROGRAM_ID_STR], logs.clone()),
            PUMP_PROGRAM_ID_STR,
            &markers()
        ));
        assert!(!is_creation_transaction(
            &tx(vec!["11111111111111111111111111111111"], logs),
            PUMP_PROGRAM_ID_STR,
            &markers()
        ));
        assert!(!is_creation_transaction(
            &tx(
                vec![PUMP_PROGRAM_ID_STR],
                vec!["Program log: Instruction: Buy".to_string()]
            ),
            PUMP_PROGRAM_ID_STR,
            &markers()
        ));
    }

    #[test]
    fn test_extract_from_log_fields() {
        let mint = Pubkey::new_unique();
        let detail = tx(
            vec![PUMP_PROGRAM_ID_STR],
            vec![
                "Program log: Instruction: Create".to_string(),
                format!("Program log: mint: {}", mint),
                "Program log: name: Moon Dog".to_string(),
                "Program log: symbol: MDOG".to_string(),
            ],
        );

        let event = extract_creation_event(&detail).unwrap();
        assert_eq!(event.asset_id, mint.to_string());
        assert_eq!(event.name, "Moon Dog");
        assert_eq!(event.symbol, "MDOG");
        assert_eq!(event.source_signature, "sig1");
        assert_eq!(event.slot, 42);
    }

    #[test]
    fn test_missing_name_and_symbol_use_placeholders() {
        let mint = Pubkey::new_unique();
        let detail = tx(
            vec![PUMP_PROGRAM_ID_STR],
            vec![format!("Program log: mint: {}", mint)],
        );

        let event = extract_creation_event(&detail).unwrap();
        assert_eq!(event.name, UNKNOWN_NAME);
        assert_eq!(event.symbol, UNKNOWN_SYMBOL);
    }

    #[test]
    fn test_missing_mint_drops_event() {
        let detail = tx(
            vec![PUMP_PROGRAM_ID_STR],
            vec![
                "Program log: name: Moon Dog".to_string(),
                "Program log: mint: not-a-key".to_string(),
            ],
        );

        assert!(extract_creation_event(&detail).is_none());
    }

    #[test]
    fn test_extract_from_anchor_event() {
        let mint = Pubkey::new_unique();
        let detail = tx(
            vec![PUMP_PROGRAM_ID_STR],
            vec![
                "Program log: Instruction: Create".to_string(),
                "Program data: not base64 !!".to_string(),
                encode_create_event("Frog Coin", "FROG", &mint),
            ],
        );

        let event = extract_creation_event(&detail).unwrap();
        assert_eq!(event.asset_id, mint.to_string());
        assert_eq!(event.name, "Frog Coin");
        assert_eq!(event.symbol, "FROG");
    }
}
