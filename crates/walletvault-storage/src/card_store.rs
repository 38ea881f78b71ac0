//! Card storage
//!
//! CRUD over the `cards` table. Sensitive fields go through
//! [`FieldEncryptionService`] on every write and read; a write whose
//! encryption fails is rejected before anything reaches the database.

use crate::database::Database;
use crate::encryption::FieldEncryptionService;
use crate::error::{Error, Result};
use crate::key_migration::{CardRecordStore, FieldUpdate};
use crate::models::{CardInfo, StoredCard};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Decrypted card with its row ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    /// Row ID
    pub id: i64,
    /// Decrypted details
    pub info: CardInfo,
}

/// Sensitive fields of a card, encrypted for storage
struct EncryptedFields {
    card_number: String,
    cvv_code: String,
    pin: String,
}

/// Card storage
pub struct CardStorage {
    encryption: Arc<FieldEncryptionService>,
}

impl CardStorage {
    /// Create storage over an encryption service
    pub fn new(encryption: Arc<FieldEncryptionService>) -> Self {
        Self { encryption }
    }

    /// Insert a new card. Rejects a card number that is already stored.
    pub fn insert(&self, conn: &Connection, card: &CardInfo) -> Result<i64> {
        Self::validate(card)?;
        if self.find_by_number(conn, &card.card_number)?.is_some() {
            return Err(Error::Duplicate("A card with this number already exists".to_string()));
        }

        let fields = self.encrypt_fields(card)?;
        let now = chrono::Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO cards
                (card_name, card_number, cvv_code, expiry_date, pin, is_favorited,
                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                card.card_name,
                fields.card_number,
                fields.cvv_code,
                card.expiry_date,
                fields.pin,
                card.is_favorited as i32,
                now,
                now,
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Inserted card '{}' as {}", card.card_name, id);
        Ok(id)
    }

    /// Replace every field of an existing card
    pub fn update(&self, conn: &Connection, id: i64, card: &CardInfo) -> Result<()> {
        Self::validate(card)?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM cards WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::NotFound(format!("Card {} not found", id)));
        }
        if let Some(existing) = self.find_by_number(conn, &card.card_number)? {
            if existing != id {
                return Err(Error::Duplicate(
                    "A card with this number already exists".to_string(),
                ));
            }
        }

        let fields = self.encrypt_fields(card)?;
        let now = chrono::Utc::now().to_rfc3339();

        let rows = conn.execute(
            r#"
            UPDATE cards SET
                card_name = ?1,
                card_number = ?2,
                cvv_code = ?3,
                expiry_date = ?4,
                pin = ?5,
                is_favorited = ?6,
                updated_at = ?7
            WHERE id = ?8
            "#,
            params![
                card.card_name,
                fields.card_number,
                fields.cvv_code,
                card.expiry_date,
                fields.pin,
                card.is_favorited as i32,
                now,
                id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("Card {} not found", id)));
        }
        Ok(())
    }

    /// Delete card
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        let rows = conn.execute("DELETE FROM cards WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(Error::NotFound(format!("Card {} not found", id)));
        }
        Ok(())
    }

    /// Delete several cards at once; returns how many existed
    pub fn delete_many(conn: &Connection, ids: &[i64]) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM cards WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Set the favourite flag
    pub fn set_favorited(conn: &Connection, id: i64, is_favorited: bool) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE cards SET is_favorited = ?1, updated_at = ?2 WHERE id = ?3",
            params![is_favorited as i32, now, id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("Card {} not found", id)));
        }
        Ok(())
    }

    /// Get a decrypted card by ID
    pub fn get(&self, conn: &Connection, id: i64) -> Result<Option<Card>> {
        let stored = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_CARDS),
                params![id],
                row_to_stored,
            )
            .optional()?;

        Ok(stored.map(|s| self.decrypt_card(&s)))
    }

    /// All cards, decrypted; favourites first, then by name
    pub fn list(&self, conn: &Connection) -> Result<Vec<Card>> {
        Ok(Self::list_stored(conn)?
            .iter()
            .map(|s| self.decrypt_card(s))
            .collect())
    }

    /// All cards with sensitive fields in their stored form
    pub fn list_stored(conn: &Connection) -> Result<Vec<StoredCard>> {
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY is_favorited DESC, card_name COLLATE NOCASE ASC, id ASC",
            SELECT_CARDS
        ))?;
        let cards = stmt
            .query_map([], row_to_stored)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    /// Number of stored cards
    pub fn count(conn: &Connection) -> Result<u32> {
        let count = conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;
        Ok(count)
    }

    fn validate(card: &CardInfo) -> Result<()> {
        if card.card_name.trim().is_empty() {
            return Err(Error::Validation("Card name cannot be empty".to_string()));
        }
        if card.card_number.trim().is_empty() {
            return Err(Error::Validation("Card number cannot be empty".to_string()));
        }
        Ok(())
    }

    fn encrypt_fields(&self, card: &CardInfo) -> Result<EncryptedFields> {
        let encrypt = |value: &str, name: &str| {
            self.encryption
                .encrypt_for_storage(value)
                .ok_or_else(|| Error::Encryption(format!("Failed to encrypt {}", name)))
        };

        Ok(EncryptedFields {
            card_number: encrypt(&card.card_number, "card number")?,
            cvv_code: encrypt(&card.cvv_code, "CVV")?,
            pin: encrypt(&card.pin, "PIN")?,
        })
    }

    fn decrypt_card(&self, stored: &StoredCard) -> Card {
        Card {
            id: stored.id,
            info: CardInfo {
                card_name: stored.card_name.clone(),
                card_number: self.encryption.decrypt_from_storage(&stored.card_number),
                expiry_date: stored.expiry_date.clone(),
                cvv_code: self.encryption.decrypt_from_storage(&stored.cvv_code),
                pin: self.encryption.decrypt_from_storage(&stored.pin),
                is_favorited: stored.is_favorited,
            },
        }
    }

    /// ID of the card whose decrypted number matches, ignoring spacing.
    ///
    /// Stored numbers are randomized ciphertext, so each one is decrypted.
    fn find_by_number(&self, conn: &Connection, number: &str) -> Result<Option<i64>> {
        let wanted = normalize_number(number);
        for stored in Self::list_stored(conn)? {
            let decrypted = Zeroizing::new(self.encryption.decrypt_from_storage(&stored.card_number));
            if normalize_number(&decrypted) == wanted {
                return Ok(Some(stored.id));
            }
        }
        Ok(None)
    }
}

const SELECT_CARDS: &str =
    "SELECT id, card_name, card_number, cvv_code, expiry_date, pin, is_favorited FROM cards";

fn row_to_stored(row: &rusqlite::Row) -> rusqlite::Result<StoredCard> {
    Ok(StoredCard {
        id: row.get(0)?,
        card_name: row.get(1)?,
        card_number: row.get(2)?,
        cvv_code: row.get(3)?,
        expiry_date: row.get(4)?,
        pin: row.get(5)?,
        is_favorited: row.get::<_, i32>(6)? != 0,
    })
}

fn normalize_number(number: &str) -> Zeroizing<String> {
    Zeroizing::new(number.chars().filter(|c| !c.is_whitespace()).collect())
}

// ============================================================================
// Migration sweep adapter
// ============================================================================

/// [`CardRecordStore`] over a SQLite database
pub struct SqliteCardStore<'a> {
    db: &'a mut Database,
}

impl<'a> SqliteCardStore<'a> {
    /// Wrap an open database
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }
}

impl CardRecordStore for SqliteCardStore<'_> {
    fn fetch_all(&mut self) -> Result<Vec<StoredCard>> {
        CardStorage::list_stored(self.db.conn())
    }

    fn commit(&mut self, updates: &[FieldUpdate]) -> Result<()> {
        let tx = self.db.transaction()?;
        for update in updates {
            // Column names come from a closed enum, never from input
            let sql = format!("UPDATE cards SET {} = ?1 WHERE id = ?2", update.field.column());
            let rows = tx.execute(&sql, params![update.value, update.card_id])?;
            if rows == 0 {
                // Dropping the transaction rolls back
                return Err(Error::NotFound(format!("Card {} not found", update.card_id)));
            }
        }
        tx.commit()?;
        tracing::debug!("Committed {} field updates", updates.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::ENCRYPTED_PREFIX;
    use crate::keystore::StaticKeyProvider;
    use crate::models::SensitiveField;
    use crate::security::SymmetricKey;

    fn setup() -> (Database, CardStorage) {
        let db = Database::open_in_memory().unwrap();
        let provider = Arc::new(StaticKeyProvider::new(SymmetricKey::generate()));
        let service = Arc::new(FieldEncryptionService::with_legacy_storage_key(provider));
        (db, CardStorage::new(service))
    }

    fn visa() -> CardInfo {
        CardInfo::new("Travel", "4111 1111 1111 1111", "12/30", "123", "9876")
    }

    #[test]
    fn test_insert_encrypts_sensitive_fields() {
        let (db, storage) = setup();
        let id = storage.insert(db.conn(), &visa()).unwrap();

        let stored = CardStorage::list_stored(db.conn()).unwrap();
        assert_eq!(stored.len(), 1);
        for field in SensitiveField::ALL {
            assert!(stored[0].field(field).starts_with(ENCRYPTED_PREFIX));
        }
        assert_eq!(stored[0].card_name, "Travel");
        assert_eq!(stored[0].expiry_date, "12/30");

        let card = storage.get(db.conn(), id).unwrap().unwrap();
        assert_eq!(card.info, visa());
    }

    #[test]
    fn test_empty_pin_stored_empty() {
        let (db, storage) = setup();
        let card = CardInfo::new("No pin", "4111 1111 1111 1111", "12/30", "123", "");
        storage.insert(db.conn(), &card).unwrap();
        assert_eq!(CardStorage::list_stored(db.conn()).unwrap()[0].pin, "");
    }

    #[test]
    fn test_duplicate_number_rejected() {
        let (db, storage) = setup();
        storage.insert(db.conn(), &visa()).unwrap();

        let again = CardInfo::new("Other", "4111111111111111", "01/31", "321", "");
        assert!(matches!(
            storage.insert(db.conn(), &again),
            Err(Error::Duplicate(_))
        ));
    }

    #[test]
    fn test_update_and_favorite() {
        let (db, storage) = setup();
        let id = storage.insert(db.conn(), &visa()).unwrap();

        let mut edited = visa();
        edited.card_name = "Renamed".to_string();
        edited.cvv_code = "456".to_string();
        storage.update(db.conn(), id, &edited).unwrap();
        CardStorage::set_favorited(db.conn(), id, true).unwrap();

        let card = storage.get(db.conn(), id).unwrap().unwrap();
        assert_eq!(card.info.card_name, "Renamed");
        assert_eq!(card.info.cvv_code, "456");
        assert!(card.info.is_favorited);

        assert!(matches!(
            storage.update(db.conn(), id + 100, &edited),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_update_rejects_number_of_other_card() {
        let (db, storage) = setup();
        storage.insert(db.conn(), &visa()).unwrap();
        let second = CardInfo::new("Second", "5500 0000 0000 0004", "12/30", "123", "");
        let id = storage.insert(db.conn(), &second).unwrap();

        let mut clash = second.clone();
        clash.card_number = visa().card_number;
        assert!(matches!(
            storage.update(db.conn(), id, &clash),
            Err(Error::Duplicate(_))
        ));
    }

    #[test]
    fn test_update_missing_card_is_not_found() {
        let (db, storage) = setup();
        storage.insert(db.conn(), &visa()).unwrap();

        // Number belongs to a stored card, but the target id does not exist
        assert!(matches!(
            storage.update(db.conn(), 999, &visa()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_list_order_favorites_first() {
        let (db, storage) = setup();
        storage
            .insert(db.conn(), &CardInfo::new("b", "4111 1111 1111 1111", "12/30", "1", ""))
            .unwrap();
        storage
            .insert(db.conn(), &CardInfo::new("A", "4111 1111 1111 1112", "12/30", "1", ""))
            .unwrap();
        storage
            .insert(
                db.conn(),
                &CardInfo::new("z", "4111 1111 1111 1113", "12/30", "1", "").with_favorited(true),
            )
            .unwrap();

        let names: Vec<String> = storage
            .list(db.conn())
            .unwrap()
            .into_iter()
            .map(|c| c.info.card_name)
            .collect();
        assert_eq!(names, vec!["z", "A", "b"]);
    }

    #[test]
    fn test_delete_and_delete_many() {
        let (db, storage) = setup();
        let a = storage.insert(db.conn(), &visa()).unwrap();
        let b = storage
            .insert(db.conn(), &CardInfo::new("B", "5500 0000 0000 0004", "12/30", "1", ""))
            .unwrap();
        let c = storage
            .insert(db.conn(), &CardInfo::new("C", "6011 0000 0000 0004", "12/30", "1", ""))
            .unwrap();

        CardStorage::delete(db.conn(), a).unwrap();
        assert!(matches!(CardStorage::delete(db.conn(), a), Err(Error::NotFound(_))));

        assert_eq!(CardStorage::delete_many(db.conn(), &[b, c, 999]).unwrap(), 2);
        assert_eq!(CardStorage::count(db.conn()).unwrap(), 0);
    }

    #[test]
    fn test_validation() {
        let (db, storage) = setup();
        let nameless = CardInfo::new(" ", "4111 1111 1111 1111", "12/30", "1", "");
        assert!(matches!(
            storage.insert(db.conn(), &nameless),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_sqlite_store_commit_rolls_back_on_missing_card() {
        let (mut db, storage) = setup();
        let id = storage.insert(db.conn(), &visa()).unwrap();
        let before = CardStorage::list_stored(db.conn()).unwrap();

        let updates = vec![
            FieldUpdate {
                card_id: id,
                field: SensitiveField::CvvCode,
                value: "ENCRYPTED:AAAA".to_string(),
            },
            FieldUpdate {
                card_id: id + 1,
                field: SensitiveField::Pin,
                value: "ENCRYPTED:BBBB".to_string(),
            },
        ];

        let mut store = SqliteCardStore::new(&mut db);
        assert!(store.commit(&updates).is_err());
        assert_eq!(CardStorage::list_stored(db.conn()).unwrap(), before);
    }
}
