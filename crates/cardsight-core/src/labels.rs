//! Label catalog: ordered class names, indexed by model class index.
//!
//! Slot 0 is reserved (background), so a raw class index `c` from the model
//! resolves to entry `c + 1`.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("labels file not found: {0}")]
    NotFound(String),
    #[error("labels file {path} cannot be read: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Immutable, ordered list of class names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// Load a newline-delimited labels file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LabelError::NotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path).map_err(|source| LabelError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;

        let table = Self::from_text(&contents);
        tracing::info!(path = %path.display(), count = table.len(), "loaded labels");
        Ok(table)
    }

    /// Split text into one entry per line.
    ///
    /// Empty lines, including the one after a final newline, are kept so that
    /// indices line up with the model's class ids.
    pub fn from_text(contents: &str) -> Self {
        let labels = contents
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect();
        Self { labels }
    }

    /// Table slot for a raw model class index, or `None` if it has no entry.
    ///
    /// Non-finite indices never resolve.
    pub fn slot_for_class(&self, class_index: f32) -> Option<usize> {
        if !class_index.is_finite() {
            return None;
        }
        let slot = (class_index as i64).checked_add(1)?;
        let slot = usize::try_from(slot).ok()?;
        (slot < self.labels.len()).then_some(slot)
    }

    /// Resolve a raw model class index (as emitted in the classes tensor).
    ///
    /// Returns `None` when the model and labels file do not match.
    pub fn class_name(&self, class_index: f32) -> Option<&str> {
        self.get(self.slot_for_class(class_index)?)
    }

    /// Entry at table position `slot` (already offset).
    pub fn get(&self, slot: usize) -> Option<&str> {
        self.labels.get(slot).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_text_keeps_trailing_empty_entry() {
        let table = LabelTable::from_text("???\nid_front\nid_back\n");
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(3), Some(""));
    }

    #[test]
    fn test_from_text_strips_carriage_returns() {
        let table = LabelTable::from_text("???\r\ncard\r\n");
        let entries: Vec<&str> = table.iter().collect();
        assert_eq!(entries, vec!["???", "card", ""]);
    }

    #[test]
    fn test_class_name_offsets_by_one() {
        let table = LabelTable::from_text("???\nperson\nbicycle\ncar");
        assert_eq!(table.class_name(0.0), Some("person"));
        assert_eq!(table.class_name(2.0), Some("car"));
        assert_eq!(table.class_name(-1.0), Some("???"));
    }

    #[test]
    fn test_class_name_out_of_range() {
        let table = LabelTable::from_text("???\nperson");
        assert_eq!(table.class_name(5.0), None);
        assert_eq!(table.class_name(-3.0), None);
    }

    #[test]
    fn test_non_finite_class_never_resolves() {
        let table = LabelTable::from_text("???\nperson\ncar");
        for class_index in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 1e19] {
            assert_eq!(table.slot_for_class(class_index), None);
            assert_eq!(table.class_name(class_index), None);
        }
    }

    #[test]
    fn test_slot_for_class() {
        let table = LabelTable::from_text("???\nperson\ncar");
        assert_eq!(table.slot_for_class(0.0), Some(1));
        assert_eq!(table.slot_for_class(1.0), Some(2));
        assert_eq!(table.slot_for_class(2.0), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "???\nid\npassport\n").unwrap();
        let table = LabelTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.class_name(1.0), Some("passport"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LabelTable::load(dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, LabelError::NotFound(_)));
    }

    #[test]
    fn test_load_non_utf8_is_unreadable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0x00, 0x80]).unwrap();
        let err = LabelTable::load(file.path()).unwrap_err();
        assert!(matches!(err, LabelError::Unreadable { .. }));
    }
}
