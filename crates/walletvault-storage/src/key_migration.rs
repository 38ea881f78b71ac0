//! Forward migration of stored card fields to the current key
//!
//! One sweep over every stored card: plaintext fields are encrypted, fields
//! that only open under a legacy key are re-encrypted, everything else is
//! left alone. Updates are collected in memory and handed to the store in a
//! single commit, so an interrupted sweep writes nothing and the next run
//! starts over.

use crate::encryption::{FieldEncryptionService, FieldState};
use crate::models::{SensitiveField, StoredCard};
use crate::{Error, Result};
use std::sync::Arc;

/// Record source and sink for the migration sweep
pub trait CardRecordStore {
    /// Every stored card, sensitive fields in their on-disk form
    fn fetch_all(&mut self) -> Result<Vec<StoredCard>>;

    /// Apply all updates atomically: either every update lands or none does
    fn commit(&mut self, updates: &[FieldUpdate]) -> Result<()>;
}

/// New stored value for one field of one card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    /// Card row ID
    pub card_id: i64,
    /// Field to overwrite
    pub field: SensitiveField,
    /// New stored value (always tagged ciphertext)
    pub value: String,
}

/// Outcome of a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Cards with at least one rewritten field
    pub migrated_count: usize,
    /// Cards left untouched
    pub already_current_count: usize,
    /// Plaintext fields that were encrypted
    pub plaintext_fields_encrypted: usize,
    /// Legacy-key fields re-encrypted under the current key
    pub legacy_fields_reencrypted: usize,
    /// Tagged fields no candidate key opens (left as is)
    pub unreadable_fields: usize,
}

impl MigrationReport {
    /// Total number of field writes
    pub fn updated_fields(&self) -> usize {
        self.plaintext_fields_encrypted + self.legacy_fields_reencrypted
    }
}

/// Runs the migration sweep
pub struct LegacyKeyMigrator {
    encryption: Arc<FieldEncryptionService>,
}

impl LegacyKeyMigrator {
    /// Create migrator
    pub fn new(encryption: Arc<FieldEncryptionService>) -> Self {
        Self { encryption }
    }

    /// Sweep every card in `store`.
    ///
    /// Fails without writing when the current key is unavailable, when the
    /// fetch fails, or when the commit fails.
    pub fn migrate(&self, store: &mut dyn CardRecordStore) -> Result<MigrationReport> {
        let current = self.encryption.current_key()?;

        let cards = store.fetch_all().map_err(|e| {
            tracing::error!("Migration aborted, failed to fetch cards: {}", e);
            Error::Migration(format!("Failed to fetch cards: {}", e))
        })?;

        let mut report = MigrationReport::default();
        let mut updates = Vec::new();

        for card in &cards {
            let before = updates.len();

            for field in SensitiveField::ALL {
                let stored = card.field(field);
                let new_value = match self.encryption.classify_with(&current, stored) {
                    FieldState::Empty | FieldState::Current => continue,
                    FieldState::Unreadable => {
                        tracing::warn!(
                            "Card {} field {} cannot be decrypted with any known key",
                            card.id,
                            field.column()
                        );
                        report.unreadable_fields += 1;
                        continue;
                    }
                    FieldState::Plaintext => match self.encryption.encrypt_with(&current, stored) {
                        Ok(v) => {
                            report.plaintext_fields_encrypted += 1;
                            v
                        }
                        Err(e) => {
                            tracing::error!(
                                "Failed to encrypt card {} field {}: {}",
                                card.id,
                                field.column(),
                                e
                            );
                            report.unreadable_fields += 1;
                            continue;
                        }
                    },
                    FieldState::Legacy(plaintext) => {
                        match self.encryption.encrypt_with(&current, &plaintext) {
                            Ok(v) => {
                                report.legacy_fields_reencrypted += 1;
                                v
                            }
                            Err(e) => {
                                tracing::error!(
                                    "Failed to re-encrypt card {} field {}: {}",
                                    card.id,
                                    field.column(),
                                    e
                                );
                                report.unreadable_fields += 1;
                                continue;
                            }
                        }
                    }
                };

                updates.push(FieldUpdate {
                    card_id: card.id,
                    field,
                    value: new_value,
                });
            }

            if updates.len() > before {
                tracing::debug!("Card '{}' queued for migration", card.card_name);
                report.migrated_count += 1;
            } else {
                report.already_current_count += 1;
            }
        }

        if !updates.is_empty() {
            store.commit(&updates).map_err(|e| {
                tracing::error!("Migration commit failed: {}", e);
                Error::Migration(format!("Failed to commit {} updates: {}", updates.len(), e))
            })?;
        }

        tracing::info!(
            "Migration sweep complete: {} migrated, {} already current, {} plaintext encrypted, {} legacy re-encrypted, {} unreadable",
            report.migrated_count,
            report.already_current_count,
            report.plaintext_fields_encrypted,
            report.legacy_fields_reencrypted,
            report.unreadable_fields
        );

        Ok(report)
    }
}
