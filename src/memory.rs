use std::path::Path;

use redb::{
    Database,
    MultimapTableDefinition,
    ReadableDatabase,
    ReadableMultimapTable,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    processor::{FileCategory, ProcessedFile},
};

/// File path -> JSON-encoded [`FileMetadata`].
const FILES: TableDefinition<&str, &str> = TableDefinition::new("files");
/// Tag name -> tag id.
const TAGS: TableDefinition<&str, u64> = TableDefinition::new("tags");
/// Tag id -> tag name.
const TAG_NAMES: TableDefinition<u64, &str> = TableDefinition::new("tag_names");
const FILE_TAGS: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("file_tags");
const TAG_FILES: MultimapTableDefinition<u64, &str> =
    MultimapTableDefinition::new("tag_files");
/// Collection name -> JSON-encoded [`StoredCollection`].
const COLLECTIONS: TableDefinition<&str, &str> =
    TableDefinition::new("collections");
const COLLECTION_FILES: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("collection_files");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Metadata persisted for every indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub category: FileCategory,
    pub file_size: u64,
    pub created_at: u64,
    pub modified_at: u64,
    pub indexed_at: u64,
    pub text_sample: Option<String>,
}

impl FileMetadata {
    pub fn from_processed(
        file_path: &str,
        processed: &ProcessedFile,
        indexed_at: u64,
    ) -> Self {
        Self {
            file_path: file_path.to_string(),
            file_name: processed.file_name.clone(),
            file_type: processed.file_type.clone(),
            category: processed.category,
            file_size: processed.file_size,
            created_at: processed.created_at,
            modified_at: processed.modified_at,
            indexed_at,
            text_sample: processed.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCollection {
    id: u64,
    description: String,
    created_at: u64,
    updated_at: u64,
}

/// A user-defined, named group of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Collection {
    fn from_stored(name: &str, stored: StoredCollection) -> Self {
        Self {
            id: stored.id,
            name: name.to_string(),
            description: stored.description,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

/// Normalize a tag label: trimmed and lowercase. Empty labels are rejected.
///
/// ```
/// use file_concierge::memory::normalize_tag;
///
/// let tag = normalize_tag("  Machine-Learning ").unwrap();
/// assert_eq!(tag, "machine-learning");
/// assert!(normalize_tag("   ").is_err());
/// ```
pub fn normalize_tag(tag: &str) -> Result<String> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        return Err(Error::Validation("tag must not be empty".into()));
    }
    Ok(tag)
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Persistent store for file metadata, tags, collections and settings.
pub struct LongTermMemory {
    db: Database,
}

impl LongTermMemory {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(FILES)?;
        txn.open_table(TAGS)?;
        txn.open_table(TAG_NAMES)?;
        txn.open_multimap_table(FILE_TAGS)?;
        txn.open_multimap_table(TAG_FILES)?;
        txn.open_table(COLLECTIONS)?;
        txn.open_multimap_table(COLLECTION_FILES)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- File metadata --

    /// Insert or fully replace the metadata record for a path.
    pub fn store_file_metadata(&self, meta: &FileMetadata) -> Result<()> {
        let encoded = serde_json::to_string(meta)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FILES)?;
            table.insert(meta.file_path.as_str(), encoded.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_file_metadata(
        &self,
        path: &str,
    ) -> Result<Option<FileMetadata>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        match table.get(path)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn has_file(&self, path: &str) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        Ok(table.get(path)?.is_some())
    }

    /// All metadata records, ordered by path.
    pub fn get_all_files(&self) -> Result<Vec<FileMetadata>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_str(v.value())?);
        }
        Ok(result)
    }

    pub fn count_files(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        Ok(table.len()?)
    }

    /// Remove a metadata record. Tags and collection memberships are kept.
    pub fn remove_file_metadata(&self, path: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(FILES)?;
            table.remove(path)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    // -- Tags --

    /// Get or create a tag, returning its id.
    pub fn add_tag(&self, tag: &str) -> Result<u64> {
        let tag = normalize_tag(tag)?;
        let txn = self.db.begin_write()?;
        let id = {
            let mut tags = txn.open_table(TAGS)?;
            let mut names = txn.open_table(TAG_NAMES)?;
            get_or_create_tag(&mut tags, &mut names, &tag)?
        };
        txn.commit()?;
        Ok(id)
    }

    /// Associate a tag with a file. Applying an existing tag is a no-op.
    pub fn tag_file(&self, path: &str, tag: &str) -> Result<()> {
        self.tag_file_many(path, &[tag]).map(drop)
    }

    /// Apply several tags to one file in a single transaction.
    pub fn tag_file_many<S: AsRef<str>>(
        &self,
        path: &str,
        tags: &[S],
    ) -> Result<Vec<String>> {
        let normalized = tags
            .iter()
            .map(|t| normalize_tag(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let txn = self.db.begin_write()?;
        {
            let mut tag_table = txn.open_table(TAGS)?;
            let mut names = txn.open_table(TAG_NAMES)?;
            let mut file_tags = txn.open_multimap_table(FILE_TAGS)?;
            let mut tag_files = txn.open_multimap_table(TAG_FILES)?;
            for tag in &normalized {
                let id = get_or_create_tag(&mut tag_table, &mut names, tag)?;
                file_tags.insert(path, id)?;
                tag_files.insert(id, path)?;
            }
        }
        txn.commit()?;
        Ok(normalized)
    }

    /// Remove a tag from a file. Returns whether the association existed.
    pub fn untag_file(&self, path: &str, tag: &str) -> Result<bool> {
        let tag = normalize_tag(tag)?;
        let txn = self.db.begin_write()?;
        let removed = {
            let tags = txn.open_table(TAGS)?;
            let id = tags.get(tag.as_str())?.map(|v| v.value());
            match id {
                Some(id) => {
                    let mut file_tags = txn.open_multimap_table(FILE_TAGS)?;
                    let mut tag_files = txn.open_multimap_table(TAG_FILES)?;
                    tag_files.remove(id, path)?;
                    file_tags.remove(path, id)?
                }
                None => false,
            }
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Tags applied to a file, in the order they were first created.
    pub fn get_file_tags(&self, path: &str) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let file_tags = txn.open_multimap_table(FILE_TAGS)?;
        let names = txn.open_table(TAG_NAMES)?;
        let mut result = Vec::new();
        for id in file_tags.get(path)? {
            let id = id?.value();
            if let Some(name) = names.get(id)? {
                result.push(name.value().to_string());
            }
        }
        Ok(result)
    }

    /// Paths carrying the given tag, ordered by path.
    pub fn get_files_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let tag = normalize_tag(tag)?;
        let txn = self.db.begin_read()?;
        let tags = txn.open_table(TAGS)?;
        let Some(id) = tags.get(tag.as_str())?.map(|v| v.value()) else {
            return Ok(Vec::new());
        };
        let tag_files = txn.open_multimap_table(TAG_FILES)?;
        let mut result = Vec::new();
        for path in tag_files.get(id)? {
            result.push(path?.value().to_string());
        }
        Ok(result)
    }

    /// Every known tag name, sorted.
    pub fn get_all_tags(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TAGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _v) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }

    // -- Collections --

    /// Create a collection. Fails if the name is already taken.
    ///
    /// Names are trimmed here and on every lookup.
    pub fn create_collection(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Collection> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation(
                "collection name must not be empty".into(),
            ));
        }

        let txn = self.db.begin_write()?;
        let collection = {
            let mut table = txn.open_table(COLLECTIONS)?;
            if table.get(name)?.is_some() {
                return Err(Error::Validation(format!(
                    "collection '{name}' already exists"
                )));
            }

            let mut next_id = 1;
            for entry in table.iter()? {
                let (_k, v) = entry?;
                let stored: StoredCollection = serde_json::from_str(v.value())?;
                next_id = next_id.max(stored.id + 1);
            }

            let now = now_secs();
            let stored = StoredCollection {
                id: next_id,
                description: description.to_string(),
                created_at: now,
                updated_at: now,
            };
            let encoded = serde_json::to_string(&stored)?;
            table.insert(name, encoded.as_str())?;
            Collection::from_stored(name, stored)
        };
        txn.commit()?;
        Ok(collection)
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<Collection>> {
        let name = name.trim();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        match table.get(name)? {
            Some(v) => {
                let stored = serde_json::from_str(v.value())?;
                Ok(Some(Collection::from_stored(name, stored)))
            }
            None => Ok(None),
        }
    }

    /// Add a file to an existing collection.
    pub fn add_file_to_collection(
        &self,
        collection: &str,
        path: &str,
    ) -> Result<()> {
        self.add_files_to_collection(collection, &[path])
    }

    /// Add several files to an existing collection in one transaction.
    ///
    /// Fails with `NotFound` and writes nothing if the collection does not
    /// exist. Paths already in the collection are left as they are; the
    /// collection's `updated_at` is refreshed either way.
    pub fn add_files_to_collection<S: AsRef<str>>(
        &self,
        collection: &str,
        paths: &[S],
    ) -> Result<()> {
        let collection = collection.trim();
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(COLLECTIONS)?;
            let mut stored: StoredCollection = match table.get(collection)? {
                Some(v) => serde_json::from_str(v.value())?,
                None => return Err(Error::not_found("collection", collection)),
            };

            let mut members = txn.open_multimap_table(COLLECTION_FILES)?;
            for path in paths {
                members.insert(collection, path.as_ref())?;
            }

            stored.updated_at = now_secs();
            let encoded = serde_json::to_string(&stored)?;
            table.insert(collection, encoded.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Files in a collection, ordered by path. Unknown collections are empty.
    pub fn get_collection_files(
        &self,
        collection: &str,
    ) -> Result<Vec<String>> {
        let collection = collection.trim();
        let txn = self.db.begin_read()?;
        let members = txn.open_multimap_table(COLLECTION_FILES)?;
        let mut result = Vec::new();
        for path in members.get(collection)? {
            result.push(path?.value().to_string());
        }
        Ok(result)
    }

    /// Every collection, ordered by name.
    pub fn get_all_collections(&self) -> Result<Vec<Collection>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let stored = serde_json::from_str(v.value())?;
            result.push(Collection::from_stored(k.value(), stored));
        }
        Ok(result)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

fn get_or_create_tag(
    tags: &mut redb::Table<'_, &'static str, u64>,
    names: &mut redb::Table<'_, u64, &'static str>,
    tag: &str,
) -> Result<u64> {
    if let Some(id) = tags.get(tag)?.map(|v| v.value()) {
        return Ok(id);
    }
    let id = match names.last()? {
        Some((k, _v)) => k.value() + 1,
        None => 1,
    };
    tags.insert(tag, id)?;
    names.insert(id, tag)?;
    Ok(id)
}

impl std::fmt::Debug for LongTermMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTermMemory").finish_non_exhaustive()
    }
}
