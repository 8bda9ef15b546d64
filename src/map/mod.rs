//! Borrowed and owned 2D maps used for mask logits and mask canvases.
//!
//! `MapView` is a borrowed 2D view into a 1D buffer with an explicit stride.
//! The stride counts elements between the starts of consecutive rows, so a
//! stride larger than the width represents a cropped or padded map. ROI slices
//! are zero-copy views into the same backing slice and retain the original
//! stride. `MapStack` is a contiguous `[count, height, width]` stack of maps,
//! the layout mask heads emit.

use crate::util::{DetPostError, DetPostResult};

/// Borrowed 2D view with an explicit stride.
#[derive(Copy, Clone, Debug)]
pub struct MapView<'a, T> {
    data: &'a [T],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a, T> MapView<'a, T> {
    /// Creates a contiguous view with `stride == width`.
    pub fn from_slice(data: &'a [T], width: usize, height: usize) -> DetPostResult<Self> {
        Self::new(data, width, height, width)
    }

    /// Creates a view with an explicit stride.
    pub fn new(data: &'a [T], width: usize, height: usize, stride: usize) -> DetPostResult<Self> {
        let needed = required_len(width, height, stride)?;
        if data.len() < needed {
            return Err(DetPostError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the stride in elements between row starts.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Returns the element at `(x, y)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<&'a T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y.checked_mul(self.stride)?.checked_add(x)?;
        self.data.get(idx)
    }

    /// Returns a contiguous slice for row `y` with length `width`.
    pub fn row(&self, y: usize) -> Option<&'a [T]> {
        if y >= self.height {
            return None;
        }
        let start = y.checked_mul(self.stride)?;
        let end = start.checked_add(self.width)?;
        self.data.get(start..end)
    }

    /// Returns the top-left `width x height` corner as a zero-copy view.
    ///
    /// The requested size is clamped to the view, which is what cropping
    /// network padding off an upsampled mask needs.
    pub fn crop_top_left(&self, width: usize, height: usize) -> DetPostResult<MapView<'a, T>> {
        let width = width.min(self.width);
        let height = height.min(self.height);
        MapView::new(self.data, width, height, self.stride)
    }
}

fn required_len(width: usize, height: usize, stride: usize) -> DetPostResult<usize> {
    if width == 0 || height == 0 {
        return Err(DetPostError::InvalidDimensions { width, height });
    }
    if stride < width {
        return Err(DetPostError::InvalidConfig {
            reason: "stride must be at least the width",
        });
    }
    (height - 1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(width))
        .ok_or(DetPostError::InvalidDimensions { width, height })
}

/// Owned contiguous 2D map.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedMap<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> OwnedMap<T> {
    /// Wraps a contiguous buffer whose length must equal `width * height`.
    pub fn new(data: Vec<T>, width: usize, height: usize) -> DetPostResult<Self> {
        if width == 0 || height == 0 {
            return Err(DetPostError::InvalidDimensions { width, height });
        }
        let needed = width
            .checked_mul(height)
            .ok_or(DetPostError::InvalidDimensions { width, height })?;
        if data.len() < needed {
            return Err(DetPostError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        if data.len() > needed {
            return Err(DetPostError::InvalidDimensions { width, height });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Borrows the map as a contiguous view.
    pub fn view(&self) -> MapView<'_, T> {
        MapView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width,
        }
    }
}

impl<T: Copy> OwnedMap<T> {
    /// Creates a map filled with `value`.
    pub fn filled(value: T, width: usize, height: usize) -> DetPostResult<Self> {
        let len = width
            .checked_mul(height)
            .ok_or(DetPostError::InvalidDimensions { width, height })?;
        Self::new(vec![value; len], width, height)
    }
}

/// Contiguous `[count, height, width]` stack of maps.
#[derive(Copy, Clone, Debug)]
pub struct MapStack<'a, T> {
    data: &'a [T],
    count: usize,
    width: usize,
    height: usize,
}

impl<'a, T> MapStack<'a, T> {
    /// Validates that `data` holds exactly `count * height * width` values.
    pub fn new(data: &'a [T], count: usize, width: usize, height: usize) -> DetPostResult<Self> {
        if width == 0 || height == 0 {
            return Err(DetPostError::InvalidDimensions { width, height });
        }
        let needed = count
            .checked_mul(height)
            .and_then(|v| v.checked_mul(width))
            .ok_or(DetPostError::InvalidDimensions { width, height })?;
        if data.len() != needed {
            return Err(DetPostError::ShapeMismatch {
                expected: needed,
                got: data.len(),
                context: "map stack length",
            });
        }
        Ok(Self {
            data,
            count,
            width,
            height,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns map `idx` as a contiguous view.
    pub fn map(&self, idx: usize) -> Option<MapView<'a, T>> {
        if idx >= self.count {
            return None;
        }
        let plane = self.width * self.height;
        let start = idx * plane;
        let data = self.data.get(start..start + plane)?;
        Some(MapView {
            data,
            width: self.width,
            height: self.height,
            stride: self.width,
        })
    }
}
