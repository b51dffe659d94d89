use serde::{Deserialize, Serialize};

/// Absolute coordinate in a packed sequence.
pub type GenomicPos = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    /// Short label used in file names and logs.
    pub fn label(self) -> &'static str {
        match self {
            Strand::Forward => "forward",
            Strand::Reverse => "reverse",
        }
    }
}

impl From<Strand> for char {
    fn from(strand: Strand) -> Self {
        match strand {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

/// A named record inside a packed multi-sequence store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contig {
    pub name: String,
    /// Start of the record in the concatenated coordinate space.
    pub offset: GenomicPos,
    pub length: GenomicPos,
}

impl Contig {
    pub fn end(&self) -> GenomicPos {
        self.offset + self.length
    }

    pub fn contains(&self, pos: GenomicPos) -> bool {
        pos >= self.offset && pos < self.end()
    }
}

/// Half-open interval on a single contig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalInterval {
    pub contig: usize,
    pub start: GenomicPos,
    pub end: GenomicPos,
}

impl LocalInterval {
    pub fn len(&self) -> GenomicPos {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strand_conversions() {
        assert_eq!(char::from(Strand::Forward), '+');
        assert_eq!(char::from(Strand::Reverse), '-');
        assert_eq!(Strand::Reverse.label(), "reverse");
    }

    #[test]
    fn test_contig_bounds() {
        let contig = Contig {
            name: "chr1".to_string(),
            offset: 100,
            length: 50,
        };
        assert_eq!(contig.end(), 150);
        assert!(contig.contains(100));
        assert!(contig.contains(149));
        assert!(!contig.contains(150));
        assert!(!contig.contains(99));
    }
}
