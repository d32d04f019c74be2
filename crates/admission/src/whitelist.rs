use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// How often the whitelist is fetched again from its source
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum WhitelistError {
    #[error("Failed to read whitelist from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Whitelist has no header row")]
    MissingHeader,

    #[error("Whitelist has no column named '{0}'")]
    MissingColumn(String),

    #[error("Malformed whitelist table: {0}")]
    Csv(#[from] csv::Error),

    #[error("Whitelist source failed: {0}")]
    Source(String),
}

/// Authorized submitter keys, each with the rest of its row as metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Whitelist {
    entries: HashMap<String, BTreeMap<String, String>>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, metadata: BTreeMap<String, String>) {
        self.entries.insert(key.into(), metadata);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn metadata(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses a delimited table with a header row, taking keys from the named column.
    ///
    /// The delimiter is a tab if the header contains one, a comma otherwise.
    /// Cells may be quoted. Blank lines and rows with an empty key cell are skipped.
    pub fn from_table(table: &str, column: &str) -> Result<Self, WhitelistError> {
        let header = table
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or(WhitelistError::MissingHeader)?;

        let delimiter = if header.contains('\t') { b'\t' } else { b',' };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(table.as_bytes());

        let columns = reader.headers()?.clone();

        let key_index = columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| WhitelistError::MissingColumn(column.to_string()))?;

        let mut whitelist = Self::new();

        for record in reader.records() {
            let record = record?;

            let Some(key) = record.get(key_index).filter(|k| !k.is_empty()) else {
                continue;
            };

            let metadata = columns
                .iter()
                .zip(record.iter())
                .enumerate()
                .filter(|(i, _)| *i != key_index)
                .map(|(_, (name, value))| (name.to_string(), value.to_string()))
                .collect();

            whitelist.insert(key, metadata);
        }

        Ok(whitelist)
    }
}

impl FromIterator<String> for Whitelist {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|k| (k, BTreeMap::new())).collect(),
        }
    }
}

/// Holds the active whitelist snapshot.
///
/// Reads are lock-free and return a reference-counted snapshot that stays valid
/// for as long as it is held. A refresh swaps in a whole new snapshot, it is never
/// edited in place.
#[derive(Debug, Default)]
pub struct WhitelistCell {
    current: ArcSwap<Whitelist>,
    loaded: AtomicBool,
}

impl WhitelistCell {
    /// An empty cell, not yet loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cell already holding a snapshot.
    pub fn with_snapshot(whitelist: Whitelist) -> Self {
        let cell = Self::new();
        cell.store(whitelist);
        cell
    }

    pub fn load(&self) -> Arc<Whitelist> {
        self.current.load_full()
    }

    pub fn store(&self, whitelist: Whitelist) {
        self.current.store(Arc::new(whitelist));
        self.loaded.store(true, Ordering::Release);
    }

    /// Whether a snapshot has been stored at least once.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }
}

/// External tabular source the whitelist is fetched from.
#[async_trait]
pub trait WhitelistSource: Send + Sync {
    async fn fetch(&self) -> Result<Whitelist, WhitelistError>;
}

/// Reads the whitelist from a delimited text file on disk.
#[derive(Clone, Debug)]
pub struct FileWhitelistSource {
    path: PathBuf,
    column: String,
}

impl FileWhitelistSource {
    pub fn new(path: impl Into<PathBuf>, column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            column: column.into(),
        }
    }
}

#[async_trait]
impl WhitelistSource for FileWhitelistSource {
    async fn fetch(&self) -> Result<Whitelist, WhitelistError> {
        let table = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| WhitelistError::Io {
                path: self.path.clone(),
                source,
            })?;

        Whitelist::from_table(&table, &self.column)
    }
}

/// Fetches the whitelist once and stores it in the cell.
///
/// On failure the previous snapshot stays active.
pub async fn refresh_once(
    cell: &WhitelistCell,
    source: &dyn WhitelistSource,
) -> Result<usize, WhitelistError> {
    let whitelist = source.fetch().await?;
    let len = whitelist.len();
    cell.store(whitelist);
    Ok(len)
}

/// Refreshes the whitelist forever, starting immediately.
#[tracing::instrument(name = "whitelist", skip_all)]
pub async fn refresh_loop(
    cell: Arc<WhitelistCell>,
    source: Arc<dyn WhitelistSource>,
    interval: Duration,
) {
    info!(?interval, "Starting whitelist refresh");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match refresh_once(&cell, source.as_ref()).await {
            Ok(len) => debug!(entries = len, "Whitelist refreshed"),
            Err(e) => warn!("Failed to refresh whitelist, keeping previous snapshot: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_with_named_column() {
        let table = "name,public_key,email\n\
                     alice,B62qalice,a@example.com\n\
                     bob,B62qbob,\n\
                     \n\
                     nobody,,n@example.com\n";

        let whitelist = Whitelist::from_table(table, "public_key").unwrap();

        assert_eq!(whitelist.len(), 2);
        assert!(whitelist.contains("B62qalice"));
        assert!(whitelist.contains("B62qbob"));
        assert!(!whitelist.contains(""));

        let alice = whitelist.metadata("B62qalice").unwrap();
        assert_eq!(alice.get("name").map(String::as_str), Some("alice"));
        assert_eq!(
            alice.get("email").map(String::as_str),
            Some("a@example.com")
        );
        assert!(!alice.contains_key("public_key"));
    }

    #[test]
    fn tab_separated_table() {
        let table = "key\tnote\nB62qa\tfirst\nB62qb\tsecond\n";
        let whitelist = Whitelist::from_table(table, "key").unwrap();
        assert!(whitelist.contains("B62qa"));
        assert!(whitelist.contains("B62qb"));
    }

    #[test]
    fn quoted_cell_with_delimiter() {
        let table = "name,public_key\n\"Doe, John\",B62qalice\n";
        let whitelist = Whitelist::from_table(table, "public_key").unwrap();

        assert_eq!(whitelist.len(), 1);
        assert!(whitelist.contains("B62qalice"));

        let alice = whitelist.metadata("B62qalice").unwrap();
        assert_eq!(alice.get("name").map(String::as_str), Some("Doe, John"));
    }

    #[test]
    fn short_rows_are_tolerated() {
        let table = "public_key,name,email\nB62qa\nB62qb,bob\n";
        let whitelist = Whitelist::from_table(table, "public_key").unwrap();

        assert_eq!(whitelist.len(), 2);
        assert_eq!(
            whitelist.metadata("B62qb").unwrap().get("name").map(String::as_str),
            Some("bob")
        );
    }

    #[test]
    fn missing_column() {
        assert!(matches!(
            Whitelist::from_table("a,b\n1,2\n", "c"),
            Err(WhitelistError::MissingColumn(c)) if c == "c"
        ));
        assert!(matches!(
            Whitelist::from_table("", "c"),
            Err(WhitelistError::MissingHeader)
        ));
    }

    #[test]
    fn cell_swaps_whole_snapshot() {
        let cell = WhitelistCell::new();
        assert!(!cell.is_loaded());
        assert!(cell.load().is_empty());

        cell.store(["a".to_string()].into_iter().collect());
        let old = cell.load();

        cell.store(["b".to_string(), "c".to_string()].into_iter().collect());

        // A snapshot taken before the swap is unaffected by it
        assert!(old.contains("a"));
        assert_eq!(old.len(), 1);

        let new = cell.load();
        assert!(!new.contains("a"));
        assert_eq!(new.len(), 2);
        assert!(cell.is_loaded());
    }
}
