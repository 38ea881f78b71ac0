//! Card models

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Decrypted card details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInfo {
    /// Display name
    pub card_name: String,
    /// Card number, formatted with spaces
    pub card_number: String,
    /// Expiry date (MM/yy)
    pub expiry_date: String,
    /// Security code
    pub cvv_code: String,
    /// Card PIN; empty when the card has none
    pub pin: String,
    /// Favourite flag
    pub is_favorited: bool,
}

impl CardInfo {
    /// Create card info
    pub fn new(
        card_name: impl Into<String>,
        card_number: impl Into<String>,
        expiry_date: impl Into<String>,
        cvv_code: impl Into<String>,
        pin: impl Into<String>,
    ) -> Self {
        Self {
            card_name: card_name.into(),
            card_number: card_number.into(),
            expiry_date: expiry_date.into(),
            cvv_code: cvv_code.into(),
            pin: pin.into(),
            is_favorited: false,
        }
    }

    /// Set favourite
    pub fn with_favorited(mut self, is_favorited: bool) -> Self {
        self.is_favorited = is_favorited;
        self
    }

    /// Detected card type
    pub fn card_type(&self) -> CardType {
        CardType::detect(&self.card_number)
    }

    /// Validate user input against today's date
    pub fn validate(&self, today: NaiveDate) -> Result<(), CardValidationError> {
        if self.card_name.is_empty()
            || self.card_number.is_empty()
            || self.expiry_date.is_empty()
            || self.cvv_code.is_empty()
        {
            return Err(CardValidationError::MissingField);
        }

        let card_type = self.card_type();
        if self.card_number.chars().count() != card_type.formatted_number_length() {
            return Err(CardValidationError::ShortCardNumber);
        }

        let (month, year) =
            parse_expiry(&self.expiry_date).ok_or(CardValidationError::InvalidDate)?;
        // Valid through the end of the expiry month
        if (year, month) <= (today.year(), today.month()) {
            return Err(CardValidationError::InvalidDate);
        }

        Ok(())
    }

    /// Human-readable text for sharing through the platform share sheet
    pub fn formatted_share_text(&self) -> String {
        let mut info = format!(
            "Card Name: {} \nCard Number: {} \nExpiry Date: {} \nCVV: {} \n",
            self.card_name, self.card_number, self.expiry_date, self.cvv_code
        );
        if !self.pin.is_empty() {
            info.push_str(&format!("Card Pin: {}", self.pin));
        }
        info
    }
}

/// Parse `MM/yy` into (month, four-digit year)
fn parse_expiry(expiry: &str) -> Option<(u32, i32)> {
    let (month, year) = expiry.split_once('/')?;
    if month.len() != 2 || year.len() != 2 {
        return None;
    }
    if !month.chars().chain(year.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let month: u32 = month.parse().ok()?;
    let year: i32 = year.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((month, 2000 + year))
}

/// Card input validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CardValidationError {
    /// Name, number, expiry or CVV is empty
    #[error("Card name, number, expiry date and CVV are required")]
    MissingField,
    /// Card number length does not match the detected card type
    #[error("Card number is too short for its card type")]
    ShortCardNumber,
    /// Expiry is malformed or not in the future
    #[error("Expiry date must be a future month in MM/yy format")]
    InvalidDate,
}

/// Card record as stored: sensitive fields in their on-disk form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCard {
    /// Row ID
    pub id: i64,
    /// Display name (not encrypted)
    pub card_name: String,
    /// Stored card number
    pub card_number: String,
    /// Stored CVV
    pub cvv_code: String,
    /// Expiry date (not encrypted)
    pub expiry_date: String,
    /// Stored PIN
    pub pin: String,
    /// Favourite flag
    pub is_favorited: bool,
}

impl StoredCard {
    /// Stored value of a sensitive field
    pub fn field(&self, field: SensitiveField) -> &str {
        match field {
            SensitiveField::CardNumber => &self.card_number,
            SensitiveField::CvvCode => &self.cvv_code,
            SensitiveField::Pin => &self.pin,
        }
    }
}

/// Card fields that are encrypted at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensitiveField {
    /// Card number
    CardNumber,
    /// CVV / CID
    CvvCode,
    /// PIN
    Pin,
}

impl SensitiveField {
    /// All sensitive fields
    pub const ALL: [SensitiveField; 3] = [
        SensitiveField::CardNumber,
        SensitiveField::CvvCode,
        SensitiveField::Pin,
    ];

    /// Column name in the cards table
    pub fn column(&self) -> &'static str {
        match self {
            SensitiveField::CardNumber => "card_number",
            SensitiveField::CvvCode => "cvv_code",
            SensitiveField::Pin => "pin",
        }
    }
}

/// Card network, detected from the number prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardType {
    /// Visa
    Visa,
    /// Mastercard
    Mastercard,
    /// American Express
    Amex,
    /// Discover
    Discover,
    /// Unrecognised
    Unknown,
}

impl CardType {
    /// Detect from a card number, with or without spaces
    pub fn detect(card_number: &str) -> Self {
        let digits: String = card_number.chars().filter(|c| *c != ' ').collect();
        if digits.is_empty() {
            return CardType::Unknown;
        }

        let prefix = |len: usize| -> Option<u32> {
            digits
                .get(..len)
                .filter(|p| p.chars().all(|c| c.is_ascii_digit()))
                .and_then(|p| p.parse().ok())
        };

        if digits.starts_with('4') {
            return CardType::Visa;
        }
        if matches!(prefix(2), Some(51..=55)) || matches!(prefix(4), Some(2221..=2720)) {
            return CardType::Mastercard;
        }
        if matches!(prefix(2), Some(34) | Some(37)) {
            return CardType::Amex;
        }
        if prefix(4) == Some(6011)
            || prefix(2) == Some(65)
            || matches!(prefix(3), Some(644..=649))
        {
            return CardType::Discover;
        }

        CardType::Unknown
    }

    /// Expected digit count
    pub fn number_length(&self) -> usize {
        match self {
            CardType::Amex => 15,
            _ => 16,
        }
    }

    /// Expected length including grouping spaces
    pub fn formatted_number_length(&self) -> usize {
        match self {
            CardType::Amex => 17,
            _ => 19,
        }
    }

    /// Expected security code length
    pub fn cvv_length(&self) -> usize {
        match self {
            CardType::Amex => 4,
            _ => 3,
        }
    }

    /// Label for the security code
    pub fn cvv_label(&self) -> &'static str {
        match self {
            CardType::Amex => "CID",
            _ => "CVV",
        }
    }

    /// Group the digits of `number` the way this network prints them:
    /// 4-6-5 for Amex, groups of four otherwise
    pub fn format_number(&self, number: &str) -> String {
        if *self != CardType::Amex {
            return format_card_number(number);
        }

        let digits: String = number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .take(self.number_length())
            .collect();
        let mut groups = Vec::with_capacity(3);
        let mut rest = digits.as_str();
        for width in [4, 6, 5] {
            if rest.is_empty() {
                break;
            }
            let (group, tail) = rest.split_at(width.min(rest.len()));
            groups.push(group);
            rest = tail;
        }
        groups.join(" ")
    }

    /// Display name
    pub fn display_name(&self) -> &'static str {
        match self {
            CardType::Visa => "Visa",
            CardType::Mastercard => "Mastercard",
            CardType::Amex => "American Express",
            CardType::Discover => "Discover",
            CardType::Unknown => "Unknown",
        }
    }
}

/// Keep digits, cap at 16, and group by four
pub fn format_card_number(number: &str) -> String {
    let digits: Vec<char> = number
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(16)
        .collect();

    digits
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Last four digits, for display and logs
pub fn masked_card_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "••••".to_string();
    }
    let last: String = digits[digits.len() - 4..].iter().collect();
    format!("•••• {}", last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    #[test]
    fn test_card_type_detection() {
        assert_eq!(CardType::detect("4111 1111 1111 1111"), CardType::Visa);
        assert_eq!(CardType::detect("5500 0000 0000 0004"), CardType::Mastercard);
        assert_eq!(CardType::detect("2221 0000 0000 0009"), CardType::Mastercard);
        assert_eq!(CardType::detect("2720 9900 0000 0000"), CardType::Mastercard);
        assert_eq!(CardType::detect("3782 822463 10005"), CardType::Amex);
        assert_eq!(CardType::detect("6011 0000 0000 0004"), CardType::Discover);
        assert_eq!(CardType::detect("6445 0000 0000 0000"), CardType::Discover);
        assert_eq!(CardType::detect("6500 0000 0000 0000"), CardType::Discover);
        assert_eq!(CardType::detect("1234 5678 9012 3456"), CardType::Unknown);
        assert_eq!(CardType::detect("2721 0000 0000 0000"), CardType::Unknown);
        assert_eq!(CardType::detect(""), CardType::Unknown);
    }

    #[test]
    fn test_card_type_rules() {
        assert_eq!(CardType::Amex.number_length(), 15);
        assert_eq!(CardType::Amex.formatted_number_length(), 17);
        assert_eq!(CardType::Amex.cvv_length(), 4);
        assert_eq!(CardType::Amex.cvv_label(), "CID");
        assert_eq!(CardType::Visa.formatted_number_length(), 19);
        assert_eq!(CardType::Visa.cvv_label(), "CVV");
    }

    #[test]
    fn test_format_card_number() {
        assert_eq!(format_card_number("1234567890123456"), "1234 5678 9012 3456");
        assert_eq!(format_card_number("1234-5678 90"), "1234 5678 90");
        assert_eq!(format_card_number("12345678901234567890"), "1234 5678 9012 3456");
        assert_eq!(format_card_number(""), "");
    }

    #[test]
    fn test_format_number_per_type() {
        assert_eq!(CardType::Amex.format_number("378282246310005"), "3782 822463 10005");
        assert_eq!(CardType::Amex.format_number("3782 8224"), "3782 8224");
        assert_eq!(
            CardType::Visa.format_number("4111111111111111"),
            "4111 1111 1111 1111"
        );

        let amex = CardInfo::new("Amex", CardType::Amex.format_number("378282246310005"), "04/27", "1234", "");
        assert_eq!(amex.validate(today()), Ok(()));
    }

    #[test]
    fn test_masked_card_number() {
        assert_eq!(masked_card_number("4111 1111 1111 1234"), "•••• 1234");
        assert_eq!(masked_card_number("12"), "••••");
    }

    #[test]
    fn test_validate_accepts_good_card() {
        let card = CardInfo::new("Travel", "4111 1111 1111 1111", "04/26", "123", "");
        assert_eq!(card.validate(today()), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let missing = CardInfo::new("", "4111 1111 1111 1111", "04/27", "123", "");
        assert_eq!(missing.validate(today()), Err(CardValidationError::MissingField));

        let short = CardInfo::new("Travel", "4111 1111 1111", "04/27", "123", "");
        assert_eq!(short.validate(today()), Err(CardValidationError::ShortCardNumber));

        let no_slash = CardInfo::new("Travel", "4111 1111 1111 1111", "0427", "123", "");
        assert_eq!(no_slash.validate(today()), Err(CardValidationError::InvalidDate));

        let bad_month = CardInfo::new("Travel", "4111 1111 1111 1111", "13/27", "123", "");
        assert_eq!(bad_month.validate(today()), Err(CardValidationError::InvalidDate));

        let this_month = CardInfo::new("Travel", "4111 1111 1111 1111", "03/26", "123", "");
        assert_eq!(this_month.validate(today()), Err(CardValidationError::InvalidDate));
    }

    #[test]
    fn test_formatted_share_text() {
        let card = CardInfo::new("Test Card", "1234567890123456", "12/25", "123", "1234");
        assert_eq!(
            card.formatted_share_text(),
            "Card Name: Test Card \nCard Number: 1234567890123456 \nExpiry Date: 12/25 \nCVV: 123 \nCard Pin: 1234"
        );

        let no_pin = CardInfo::new("Test Card", "1234567890123456", "12/25", "123", "");
        assert!(!no_pin.formatted_share_text().contains("Card Pin"));
    }
}
