//! Share codes for moving a card between devices
//!
//! A share code is base64 of an AES-GCM sealed box over the card's fields.
//! Two plaintext layouts exist:
//!
//! - **Version 2** (written here): `wvsc2:` header, fields joined by `|~|`.
//! - **Version 1** (read only): no header, fields joined by `,`, as written by
//!   the SafeWallet and early WalletVault apps. Card names could contain
//!   commas, so the last four components are taken as number, expiry, CVV
//!   and PIN and anything before them is the name.
//!
//! Codes are opened with the current key first, then the SafeWallet
//! legacy share key.

use crate::models::CardInfo;
use crate::security::{self, SymmetricKey};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Header of the version 2 plaintext
pub const SHARE_FORMAT_V2_HEADER: &str = "wvsc2:";

/// Field separator of the version 2 plaintext
pub const SHARE_FIELD_SEPARATOR: &str = "|~|";

const LEGACY_FIELD_SEPARATOR: &str = ",";

const FIELD_COUNT: usize = 5;

/// Encodes and decodes share codes
pub struct ShareCodeCodec {
    current: SymmetricKey,
    legacy_keys: Vec<SymmetricKey>,
}

impl ShareCodeCodec {
    /// Codec that also reads codes sealed with the SafeWallet share key
    pub fn new(current: SymmetricKey) -> Self {
        Self {
            current,
            legacy_keys: vec![SymmetricKey::legacy_share()],
        }
    }

    /// Codec that only accepts codes sealed with `current`
    pub fn without_legacy_keys(current: SymmetricKey) -> Self {
        Self {
            current,
            legacy_keys: Vec::new(),
        }
    }

    /// Seal a card into a share code
    pub fn encode(&self, card: &CardInfo) -> Result<String> {
        let fields = [
            &card.card_name,
            &card.card_number,
            &card.expiry_date,
            &card.cvv_code,
            &card.pin,
        ];
        let mut plaintext = zeroize::Zeroizing::new(String::from(SHARE_FORMAT_V2_HEADER));
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                plaintext.push_str(SHARE_FIELD_SEPARATOR);
            }
            plaintext.push_str(field);
        }

        // A field that contains or borders on the separator (`a|~`, `~|b`)
        // would split somewhere else on the receiving side
        let body = &plaintext[SHARE_FORMAT_V2_HEADER.len()..];
        let splits_back = body
            .split(SHARE_FIELD_SEPARATOR)
            .eq(fields.iter().map(|f| f.as_str()));
        if !splits_back {
            return Err(Error::Validation(format!(
                "Card fields must not contain or border on '{}'",
                SHARE_FIELD_SEPARATOR
            )));
        }

        security::encrypt_string(&plaintext, &self.current)
    }

    /// Open a share code. `None` for undecryptable or malformed codes.
    pub fn decode(&self, code: &str) -> Option<CardInfo> {
        let combined = match STANDARD.decode(code.trim()) {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::debug!("Share code is not valid base64");
                return None;
            }
        };

        let mut candidates = Vec::with_capacity(self.legacy_keys.len() + 1);
        candidates.push(self.current.clone());
        candidates.extend(self.legacy_keys.iter().cloned());

        let (index, plaintext) = match security::open_with_candidates(&candidates, &combined) {
            Some(opened) => opened,
            None => {
                tracing::warn!("Failed to decrypt share code with current and legacy keys");
                return None;
            }
        };
        if index > 0 {
            tracing::info!("Share code decrypted with legacy SafeWallet key");
        }

        let plaintext = std::str::from_utf8(&plaintext).ok()?;
        let card = parse_plaintext(plaintext);
        if card.is_none() {
            tracing::warn!("Share code does not contain the expected number of fields");
        }
        card
    }
}

fn parse_plaintext(plaintext: &str) -> Option<CardInfo> {
    let components: Vec<&str> = match plaintext.strip_prefix(SHARE_FORMAT_V2_HEADER) {
        Some(body) => body.split(SHARE_FIELD_SEPARATOR).collect(),
        None => plaintext.split(LEGACY_FIELD_SEPARATOR).collect(),
    };

    if components.len() < FIELD_COUNT {
        return None;
    }

    let is_v2 = plaintext.starts_with(SHARE_FORMAT_V2_HEADER);
    let (name, rest) = if is_v2 {
        (components[0].to_string(), &components[1..FIELD_COUNT])
    } else {
        let split = components.len() - (FIELD_COUNT - 1);
        (
            components[..split].join(LEGACY_FIELD_SEPARATOR),
            &components[split..],
        )
    };

    Some(CardInfo::new(
        name.trim(),
        rest[0].trim(),
        rest[1].trim(),
        rest[2].trim(),
        rest[3].trim(),
    ))
}
