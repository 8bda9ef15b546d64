//! Flat batch buffers with per-image counts.
//!
//! All detections of a batch live in one `Vec` and image `i` owns the
//! contiguous range that starts at `counts[..i].sum()`. Construction from raw
//! parts validates that the counts cover the buffer exactly.

use crate::detection::Detection;
use crate::util::{DetPostError, DetPostResult};

/// Detections for a whole batch plus per-image counts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchBuffer {
    rows: Vec<Detection>,
    counts: Vec<usize>,
}

impl BatchBuffer {
    /// Creates an empty buffer with no images.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing rows and counts, checking `sum(counts) == rows.len()`.
    pub fn from_parts(rows: Vec<Detection>, counts: Vec<usize>) -> DetPostResult<Self> {
        let counts_sum = counts
            .iter()
            .try_fold(0usize, |acc, &c| acc.checked_add(c))
            .ok_or(DetPostError::CountMismatch {
                counts_sum: usize::MAX,
                rows: rows.len(),
            })?;
        if counts_sum != rows.len() {
            return Err(DetPostError::CountMismatch {
                counts_sum,
                rows: rows.len(),
            });
        }
        Ok(Self { rows, counts })
    }

    /// Parses a `[label, score, x1, y1, x2, y2]` table.
    pub fn from_table(table: &[[f32; 6]], counts: Vec<usize>) -> DetPostResult<Self> {
        let rows = table.iter().copied().map(Detection::from_row).collect();
        Self::from_parts(rows, counts)
    }

    /// Packs per-image detection lists.
    pub fn from_images<I>(images: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<[Detection]>,
    {
        let mut out = Self::new();
        for image in images {
            out.push_image(image.as_ref());
        }
        out
    }

    /// Appends one image's detections.
    pub fn push_image(&mut self, detections: &[Detection]) {
        self.rows.extend_from_slice(detections);
        self.counts.push(detections.len());
    }

    pub fn rows(&self) -> &[Detection] {
        &self.rows
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn num_images(&self) -> usize {
        self.counts.len()
    }

    /// Total number of rows across all images.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Start row of every image.
    pub fn offsets(&self) -> Vec<usize> {
        let mut start = 0usize;
        self.counts
            .iter()
            .map(|&c| {
                let offset = start;
                start += c;
                offset
            })
            .collect()
    }

    /// Row range owned by image `idx`.
    pub fn image_range(&self, idx: usize) -> Option<std::ops::Range<usize>> {
        let count = *self.counts.get(idx)?;
        let start: usize = self.counts[..idx].iter().sum();
        Some(start..start + count)
    }

    /// Detections of image `idx`.
    pub fn image(&self, idx: usize) -> Option<&[Detection]> {
        self.image_range(idx).map(|range| &self.rows[range])
    }

    /// Iterates over per-image slices in batch order.
    pub fn images(&self) -> Images<'_> {
        Images {
            rows: &self.rows,
            counts: self.counts.iter(),
        }
    }

    /// Replaces every image without detections by a single `sentinel` row.
    pub fn with_sentinels(&self, sentinel: &Detection) -> Self {
        let mut out = Self {
            rows: Vec::with_capacity(self.rows.len() + self.counts.len()),
            counts: Vec::with_capacity(self.counts.len()),
        };
        for image in self.images() {
            if image.is_empty() {
                out.push_image(std::slice::from_ref(sentinel));
            } else {
                out.push_image(image);
            }
        }
        out
    }

    /// Appends `sentinel` to the last image.
    ///
    /// Export graphs always emit one trailing placeholder row, so this is only
    /// defined for a single-image batch.
    pub fn append_sentinel(&mut self, sentinel: &Detection) -> DetPostResult<()> {
        if self.counts.len() != 1 {
            return Err(DetPostError::BatchSizeMismatch {
                expected: 1,
                got: self.counts.len(),
                context: "append_sentinel",
            });
        }
        self.rows.push(*sentinel);
        self.counts[0] += 1;
        Ok(())
    }

    /// Flattens rows to `[label, score, x1, y1, x2, y2]`.
    pub fn to_table(&self) -> Vec<[f32; 6]> {
        self.rows.iter().map(Detection::to_row).collect()
    }
}

/// Iterator over per-image detection slices.
pub struct Images<'a> {
    rows: &'a [Detection],
    counts: std::slice::Iter<'a, usize>,
}

impl<'a> Iterator for Images<'a> {
    type Item = &'a [Detection];

    fn next(&mut self) -> Option<Self::Item> {
        let &count = self.counts.next()?;
        let (head, tail) = self.rows.split_at(count);
        self.rows = tail;
        Some(head)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.counts.size_hint()
    }
}

impl ExactSizeIterator for Images<'_> {}
