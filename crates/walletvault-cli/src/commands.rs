//! Command implementations
//!
//! Everything printed here is decrypted or masked; stored ciphertext never
//! reaches the terminal.

use crate::file_keystore::{key_dir_for, FileKeystore};
use anyhow::{bail, Context};
use std::path::Path;
use std::sync::Arc;
use walletvault_storage::{
    masked_card_number, CardInfo, CardStorage, Database, Error, FieldEncryptionService,
    KeyManager, KeyProvider, KeySource, LegacyKeyMigrator, MigrationReport, ShareCodeCodec,
    SqliteCardStore, SymmetricKey, VaultConfig,
};

/// Open vault: database, key manager and the services over them
pub struct Vault {
    db: Database,
    storage: CardStorage,
    encryption: Arc<FieldEncryptionService>,
    keys: Arc<KeyManager>,
    config: VaultConfig,
}

/// Fields for `edit`; `None` keeps the current value
#[derive(Debug, Default)]
pub struct CardEdit {
    pub name: Option<String>,
    pub number: Option<String>,
    pub expiry: Option<String>,
    pub cvv: Option<String>,
    pub pin: Option<String>,
}

impl Vault {
    /// Open the database at `db_path` with keys stored next to it
    pub fn open(config: VaultConfig, db_path: &Path) -> anyhow::Result<Self> {
        let keystore = Arc::new(FileKeystore::new(key_dir_for(db_path)));
        let mut manager = KeyManager::new(keystore, config.key_identifier());
        if config.allow_fallback_key {
            manager = manager.with_fallback(SymmetricKey::legacy_storage());
        }
        let keys = Arc::new(manager);
        let encryption = Arc::new(FieldEncryptionService::with_legacy_storage_key(
            keys.clone(),
        ));

        let db = Database::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        Ok(Self {
            db,
            storage: CardStorage::new(encryption.clone()),
            encryption,
            keys,
            config,
        })
    }

    /// Run the key migration sweep
    pub fn migrate(&mut self) -> walletvault_storage::Result<MigrationReport> {
        let migrator = LegacyKeyMigrator::new(self.encryption.clone());
        migrator.migrate(&mut SqliteCardStore::new(&mut self.db))
    }

    /// Sweep at startup. Failures are logged and retried on the next run.
    pub fn migrate_on_start(&mut self) {
        if let Err(e) = self.migrate() {
            tracing::warn!("Startup migration did not complete: {}", e);
        }
        self.warn_if_degraded();
    }

    fn warn_if_degraded(&self) {
        if self.keys.key_source() == KeySource::Fallback {
            eprintln!(
                "warning: keystore unavailable, cards are protected only by the built-in key"
            );
        }
    }

    fn today() -> chrono::NaiveDate {
        chrono::Local::now().date_naive()
    }

    /// Normalize and validate user input
    fn prepare(card: CardInfo) -> anyhow::Result<CardInfo> {
        let mut card = card;
        card.card_number = card.card_type().format_number(&card.card_number);
        if let Err(e) = card.validate(Self::today()) {
            bail!("{}", e);
        }
        Ok(card)
    }

    pub fn add(&self, card: CardInfo) -> anyhow::Result<()> {
        let card = Self::prepare(card)?;
        match self.storage.insert(self.db.conn(), &card) {
            Ok(id) => {
                println!("Added card {} ({})", id, card.card_name);
                Ok(())
            }
            Err(Error::Duplicate(_)) => bail!("A card with the same number already exists"),
            Err(e) => Err(e.into()),
        }
    }

    pub fn edit(&self, id: i64, edit: CardEdit) -> anyhow::Result<()> {
        let mut card = self.require(id)?;
        if let Some(name) = edit.name {
            card.card_name = name;
        }
        if let Some(number) = edit.number {
            card.card_number = number;
        }
        if let Some(expiry) = edit.expiry {
            card.expiry_date = expiry;
        }
        if let Some(cvv) = edit.cvv {
            card.cvv_code = cvv;
        }
        if let Some(pin) = edit.pin {
            card.pin = pin;
        }

        let card = Self::prepare(card)?;
        self.storage.update(self.db.conn(), id, &card)?;
        println!("Updated card {}", id);
        Ok(())
    }

    pub fn list(&self) -> anyhow::Result<()> {
        let cards = self.storage.list(self.db.conn())?;
        if cards.is_empty() {
            println!("No cards");
            return Ok(());
        }

        for card in cards {
            println!(
                "{:>4}  {} {:<24} {:<20} {:<5} {}",
                card.id,
                if card.info.is_favorited { "*" } else { " " },
                card.info.card_name,
                masked_card_number(&card.info.card_number),
                card.info.expiry_date,
                card.info.card_type().display_name(),
            );
        }
        Ok(())
    }

    pub fn show(&self, id: i64, reveal: bool) -> anyhow::Result<()> {
        let card = self.require(id)?;
        let card_type = card.card_type();

        println!("Name:    {}", card.card_name);
        println!("Type:    {}", card_type.display_name());
        println!("Expiry:  {}", card.expiry_date);
        if reveal {
            println!("Number:  {}", card.card_number);
            println!("{:<8} {}", format!("{}:", card_type.cvv_label()), card.cvv_code);
            if !card.pin.is_empty() {
                println!("PIN:     {}", card.pin);
            }
        } else {
            println!("Number:  {}", masked_card_number(&card.card_number));
        }
        println!("Favorite: {}", if card.is_favorited { "yes" } else { "no" });
        Ok(())
    }

    pub fn remove(&self, ids: &[i64]) -> anyhow::Result<()> {
        match ids {
            [id] => {
                CardStorage::delete(self.db.conn(), *id)?;
                println!("Removed card {}", id);
            }
            _ => {
                let removed = CardStorage::delete_many(self.db.conn(), ids)?;
                println!("Removed {} of {} cards", removed, ids.len());
            }
        }
        Ok(())
    }

    pub fn favorite(&self, id: i64, is_favorited: bool) -> anyhow::Result<()> {
        CardStorage::set_favorited(self.db.conn(), id, is_favorited)?;
        Ok(())
    }

    pub fn share(&self, id: i64, as_text: bool) -> anyhow::Result<()> {
        let card = self.require(id)?;
        if as_text {
            println!("{}", card.formatted_share_text());
            return Ok(());
        }

        let codec = self.share_codec()?;
        let code = codec.encode(&card).context("Could not create share code")?;
        println!("{}", code);
        Ok(())
    }

    pub fn import(&self, code: &str) -> anyhow::Result<()> {
        let codec = self.share_codec()?;
        let card = match codec.decode(code) {
            Some(card) => Self::prepare(card)?,
            None => bail!("Could not read share code"),
        };

        match self.storage.insert(self.db.conn(), &card) {
            Ok(id) => {
                println!("Imported card {} ({})", id, card.card_name);
                Ok(())
            }
            Err(Error::Duplicate(_)) => bail!("This card is already in the vault"),
            Err(e) => Err(e.into()),
        }
    }

    pub fn print_report(report: &MigrationReport) {
        println!("Migrated cards:         {}", report.migrated_count);
        println!("Already current:        {}", report.already_current_count);
        println!("Plaintext encrypted:    {}", report.plaintext_fields_encrypted);
        println!("Legacy re-encrypted:    {}", report.legacy_fields_reencrypted);
        println!("Unreadable fields:      {}", report.unreadable_fields);
    }

    pub fn key_status(&self) -> anyhow::Result<()> {
        // Resolve so the source reflects this run
        let resolved = self.keys.current_key();
        let id = self.keys.key_id();
        println!("Key:     {}/{}", id.service, id.account);
        match (resolved, self.keys.key_source()) {
            (Err(e), _) => println!("Status:  unavailable ({})", e),
            (Ok(_), KeySource::Fallback) => println!("Status:  fallback (built-in key)"),
            (Ok(key), _) => println!("Status:  keystore (AES-{})", key.bits()),
        }
        let storage = if self.keys.capabilities().has_secure_hardware {
            "secure hardware"
        } else {
            "software only"
        };
        println!("Storage: {}", storage);
        println!("Cards:   {}", CardStorage::count(self.db.conn())?);
        Ok(())
    }

    /// Delete the installation key and every card encrypted under it
    pub fn reset_key(&self, confirmed: bool) -> anyhow::Result<()> {
        if !confirmed {
            bail!("reset-key deletes every stored card; pass --yes to confirm");
        }

        let ids: Vec<i64> = CardStorage::list_stored(self.db.conn())?
            .iter()
            .map(|c| c.id)
            .collect();
        let removed = CardStorage::delete_many(self.db.conn(), &ids)?;

        if !self.keys.delete_key() {
            bail!("Failed to delete encryption key");
        }
        println!("Removed {} cards and deleted the encryption key", removed);
        Ok(())
    }

    fn require(&self, id: i64) -> anyhow::Result<CardInfo> {
        match self.storage.get(self.db.conn(), id)? {
            Some(card) => Ok(card.info),
            None => bail!("No card with id {}", id),
        }
    }

    fn share_codec(&self) -> anyhow::Result<ShareCodeCodec> {
        let key = self
            .encryption
            .current_key()
            .context("Encryption key unavailable")?;
        Ok(if self.config.accept_legacy_share_codes {
            ShareCodeCodec::new(key)
        } else {
            ShareCodeCodec::without_legacy_keys(key)
        })
    }
}
