//! Human verse references ("John 3:16") and their canonical node ids ("John-3-16").

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerseRef {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
}

impl VerseRef {
    /// Build a reference, rejecting empty books and zero chapter/verse numbers.
    pub fn new(book: impl Into<String>, chapter: u32, verse: u32) -> Result<Self, GraphError> {
        let book = book.into().split_whitespace().collect::<Vec<_>>().join(" ");
        if book.is_empty() {
            return Err(GraphError::InvalidReference("missing book name".to_string()));
        }
        if chapter == 0 || verse == 0 {
            return Err(GraphError::InvalidReference(format!(
                "{book} {chapter}:{verse}: chapter and verse start at 1"
            )));
        }
        Ok(Self {
            book,
            chapter,
            verse,
        })
    }

    /// `John-3-16`, `1_John-4-8`, `Song_of_Solomon-2-1`.
    pub fn canonical_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.book.replace(' ', "_"),
            self.chapter,
            self.verse
        )
    }

    /// Inverse of [`VerseRef::canonical_id`].
    pub fn from_canonical_id(id: &str) -> Result<Self, GraphError> {
        let invalid = || GraphError::InvalidReference(id.to_string());
        let mut parts = id.rsplitn(3, '-');
        let verse = parts.next().ok_or_else(invalid)?;
        let chapter = parts.next().ok_or_else(invalid)?;
        let book = parts.next().ok_or_else(invalid)?;
        Self::new(
            book.replace('_', " "),
            chapter.parse().map_err(|_| invalid())?,
            verse.parse().map_err(|_| invalid())?,
        )
    }
}

impl FromStr for VerseRef {
    type Err = GraphError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || GraphError::InvalidReference(raw.to_string());
        let (book, location) = raw.trim().rsplit_once(' ').ok_or_else(invalid)?;
        let (chapter, verse) = location.split_once(':').ok_or_else(invalid)?;
        Self::new(
            book,
            chapter.trim().parse().map_err(|_| invalid())?,
            verse.trim().parse().map_err(|_| invalid())?,
        )
    }
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_word_books() {
        let reference: VerseRef = "1 John 4:8".parse().unwrap();
        assert_eq!(reference.book, "1 John");
        assert_eq!(reference.canonical_id(), "1_John-4-8");

        let reference: VerseRef = "Song of Solomon 2:1".parse().unwrap();
        assert_eq!(reference.to_string(), "Song of Solomon 2:1");
    }

    #[test]
    fn canonical_ids_match_seed_format() {
        let reference: VerseRef = "John 3:16".parse().unwrap();
        assert_eq!(reference.canonical_id(), "John-3-16");
        assert_eq!(VerseRef::from_canonical_id("John-3-16").unwrap(), reference);
        assert_eq!(
            VerseRef::from_canonical_id("1_John-4-8").unwrap().book,
            "1 John"
        );
    }

    #[test]
    fn rejects_zero_and_malformed_references() {
        assert!("John 0:16".parse::<VerseRef>().is_err());
        assert!("John 3:0".parse::<VerseRef>().is_err());
        assert!("John".parse::<VerseRef>().is_err());
        assert!("John three:16".parse::<VerseRef>().is_err());
        assert!(VerseRef::from_canonical_id("John-3").is_err());
        assert!(VerseRef::new("  ", 1, 1).is_err());
    }
}
