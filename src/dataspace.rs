//! Dataspace.
//!
//! Mirrors the HDF5 dataspace: class, rank, per-dimension current/maximum
//! extent, and the current selection (none, points, regular hyperslab, or
//! all). Selections are only ever *regular* hyperslabs; irregular unions of
//! hyperslabs are out of scope.

use smallvec::SmallVec;

/// Inline-sized vector of per-dimension values; HDF5 ranks rarely exceed a
/// handful of dimensions, so this avoids a heap allocation in the common
/// case (the same reasoning `rsmpi` applies to its own `smallvec` use for
/// short-lived argument buffers).
pub type Dims = SmallVec<[u64; 4]>;

/// Coarse class of a dataspace, matching HDF5's `H5S_class_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Single, dimensionless element.
    Scalar,
    /// An n-dimensional array with a current and a maximum extent.
    Simple,
    /// No elements.
    Null,
}

/// A regular hyperslab: `count` blocks of shape `block`, spaced `stride`
/// apart, starting at `start`. All four vectors have one entry per
/// dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperslab {
    pub start: Dims,
    pub stride: Dims,
    pub count: Dims,
    pub block: Dims,
}

/// The element-addressing mode of a dataspace I/O call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// No elements selected.
    None,
    /// Every element of the current extent.
    All,
    /// An explicit, possibly irregular, list of n-dimensional coordinates.
    Points(Vec<Dims>),
    /// A regular hyperslab.
    Hyperslab(Hyperslab),
}

/// Mirrors an HDF5 dataspace.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataspace {
    class: Class,
    current: Dims,
    /// `None` for a dimension means unlimited (`H5S_UNLIMITED`).
    max: SmallVec<[Option<u64>; 4]>,
    selection: Selection,
}

impl Dataspace {
    /// A scalar (rank 0) dataspace selecting its single element.
    pub fn scalar() -> Self {
        Dataspace {
            class: Class::Scalar,
            current: Dims::new(),
            max: SmallVec::new(),
            selection: Selection::All,
        }
    }

    /// A null (`H5S_NULL`) dataspace: no elements, no selection.
    pub fn null() -> Self {
        Dataspace {
            class: Class::Null,
            current: Dims::new(),
            max: SmallVec::new(),
            selection: Selection::None,
        }
    }

    /// A simple dataspace with the given current extent and maximum extent
    /// (`None` entries are unlimited), selecting everything.
    pub fn simple(current: impl Into<Dims>, max: Vec<Option<u64>>) -> Self {
        let current = current.into();
        debug_assert_eq!(current.len(), max.len());
        Dataspace {
            class: Class::Simple,
            current,
            max: max.into_iter().collect(),
            selection: Selection::All,
        }
    }

    /// A simple dataspace whose maximum extent equals its current extent
    /// (the common "fixed-size dataset" case).
    pub fn simple_fixed(current: impl Into<Dims>) -> Self {
        let current = current.into();
        let max = current.iter().map(|&d| Some(d)).collect();
        Dataspace {
            class: Class::Simple,
            current,
            max,
            selection: Selection::All,
        }
    }

    /// The number of dimensions (0 for scalar/null).
    pub fn rank(&self) -> usize {
        self.current.len()
    }

    /// The dataspace class.
    pub fn class(&self) -> Class {
        self.class
    }

    /// The current extent.
    pub fn current_extent(&self) -> &[u64] {
        &self.current
    }

    /// The maximum extent (`None` per dimension means unlimited).
    pub fn max_extent(&self) -> &[Option<u64>] {
        &self.max
    }

    /// The current selection.
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Return a copy of this dataspace with a different selection applied.
    pub fn with_selection(&self, selection: Selection) -> Self {
        Dataspace {
            selection,
            ..self.clone()
        }
    }

    /// Total number of elements addressed by the current selection.
    pub fn selected_count(&self) -> u64 {
        match &self.selection {
            Selection::None => 0,
            Selection::All => self.current.iter().product(),
            Selection::Points(pts) => pts.len() as u64,
            Selection::Hyperslab(h) => h.count.iter().product::<u64>() * h.block.iter().product::<u64>(),
        }
    }

    /// Extend the current extent, keeping the lower bound fixed at the
    /// origin. Fails if the requested size
    /// exceeds a finite maximum extent.
    pub fn set_extent(
        &mut self,
        size: impl Into<Dims>,
        maxsize: Option<Vec<Option<u64>>>,
    ) -> Result<(), String> {
        let size = size.into();
        if size.len() != self.current.len() {
            return Err(format!(
                "set_extent: rank mismatch ({} vs {})",
                size.len(),
                self.current.len()
            ));
        }
        for (i, &s) in size.iter().enumerate() {
            if let Some(max) = self.max[i] {
                if s > max {
                    return Err(format!(
                        "set_extent: dim {} size {} exceeds maximum {}",
                        i, s, max
                    ));
                }
            }
        }
        self.current = size;
        if let Some(maxsize) = maxsize {
            self.max = maxsize.into_iter().collect();
        }
        Ok(())
    }

    /// Bounding box (`min`, `max` per dimension, inclusive) covered by the
    /// current selection. `None` if the selection is empty.
    fn bounds(&self) -> Option<(Dims, Dims)> {
        match &self.selection {
            Selection::None => None,
            Selection::All => {
                if self.current.is_empty() {
                    return Some((Dims::new(), Dims::new()));
                }
                if self.current.iter().any(|&d| d == 0) {
                    return None;
                }
                let min = Dims::from_elem(0, self.current.len());
                let max: Dims = self.current.iter().map(|&d| d - 1).collect();
                Some((min, max))
            }
            Selection::Points(pts) => {
                let first = pts.first()?;
                let mut min = first.clone();
                let mut max = first.clone();
                for p in &pts[1..] {
                    for i in 0..p.len() {
                        if p[i] < min[i] {
                            min[i] = p[i];
                        }
                        if p[i] > max[i] {
                            max[i] = p[i];
                        }
                    }
                }
                Some((min, max))
            }
            Selection::Hyperslab(h) => {
                if h.count.iter().any(|&c| c == 0) || h.block.iter().any(|&b| b == 0) {
                    return None;
                }
                let min = h.start.clone();
                let max: Dims = (0..h.start.len())
                    .map(|i| h.start[i] + (h.count[i] - 1) * h.stride[i] + h.block[i] - 1)
                    .collect();
                Some((min, max))
            }
        }
    }

    /// Whether this dataspace's selection has non-empty intersection with
    /// `other`'s, using bounding-box overlap.
    pub fn intersects(&self, other: &Dataspace) -> bool {
        let (a_min, a_max) = match self.bounds() {
            Some(b) => b,
            None => return false,
        };
        let (b_min, b_max) = match other.bounds() {
            Some(b) => b,
            None => return false,
        };
        if a_min.len() != b_min.len() {
            return false;
        }
        (0..a_min.len()).all(|i| a_min[i] <= b_max[i] && b_min[i] <= a_max[i])
    }

    /// Enumerate the coordinates addressed by the selection, in the
    /// canonical row-major (C) order HDF5 uses to linearize a selection.
    pub fn points(&self) -> Vec<Dims> {
        match &self.selection {
            Selection::None => Vec::new(),
            Selection::Points(pts) => pts.clone(),
            Selection::All => enumerate_box(&Dims::from_elem(0, self.current.len()), &self.current, &Dims::from_elem(1, self.current.len())),
            Selection::Hyperslab(h) => {
                let mut out = Vec::new();
                enumerate_hyperslab(h, &mut Dims::new(), 0, &mut out);
                out
            }
        }
    }

    /// Linear (row-major, within this dataspace's own current extent) byte
    /// offset of a coordinate.
    fn linear_offset(&self, point: &[u64], element_size: usize) -> u64 {
        let mut offset: u64 = 0;
        let mut stride: u64 = 1;
        for i in (0..self.current.len()).rev() {
            offset += point[i] * stride;
            stride *= self.current[i].max(1);
        }
        offset * element_size as u64
    }

    /// Stream the selection as a sequence of `(byte_offset, byte_length)`
    /// runs, merging adjacent selected elements into maximal contiguous
    /// runs.
    pub fn iterate(&self, element_size: usize, mut f: impl FnMut(u64, u64)) {
        let pts = self.points();
        let mut offsets: Vec<u64> = pts
            .iter()
            .map(|p| self.linear_offset(p, element_size))
            .collect();
        if offsets.is_empty() {
            return;
        }
        // `points()` already yields ascending row-major order for the
        // `All`/`Hyperslab` cases; an explicit `Points` list is sorted here
        // so runs can still be merged.
        if matches!(self.selection, Selection::Points(_)) {
            offsets.sort_unstable();
            offsets.dedup();
        }
        let elem = element_size as u64;
        let mut run_start = offsets[0];
        let mut run_len = elem;
        for &off in &offsets[1..] {
            if off == run_start + run_len {
                run_len += elem;
            } else {
                f(run_start, run_len);
                run_start = off;
                run_len = elem;
            }
        }
        f(run_start, run_len);
    }

    /// Walk two selections of equal point count in lockstep, yielding
    /// `(offset_in_a, offset_in_b, length)` for the longest runs over which
    /// *both* sequences stay simultaneously contiguous.
    pub fn iterate_pair(
        a: &Dataspace,
        a_elem_size: usize,
        b: &Dataspace,
        b_elem_size: usize,
        mut f: impl FnMut(u64, u64, u64),
    ) {
        let a_pts = a.points();
        let b_pts = b.points();
        debug_assert_eq!(a_pts.len(), b_pts.len(), "iterate_pair: point count mismatch");
        let n = a_pts.len().min(b_pts.len());
        if n == 0 {
            return;
        }
        let a_off: Vec<u64> = a_pts[..n].iter().map(|p| a.linear_offset(p, a_elem_size)).collect();
        let b_off: Vec<u64> = b_pts[..n].iter().map(|p| b.linear_offset(p, b_elem_size)).collect();
        let elem = a_elem_size as u64;
        debug_assert_eq!(a_elem_size, b_elem_size, "iterate_pair: element size mismatch");

        let mut run_a = a_off[0];
        let mut run_b = b_off[0];
        let mut run_len = elem;
        for i in 1..n {
            if a_off[i] == run_a + run_len && b_off[i] == run_b + run_len {
                run_len += elem;
            } else {
                f(run_a, run_b, run_len);
                run_a = a_off[i];
                run_b = b_off[i];
                run_len = elem;
            }
        }
        f(run_a, run_b, run_len);
    }

    /// Return a new selection on `dst` corresponding to the points of `src`
    /// (`self` is `src`) that lie inside `src_intersect`. `self` and `dst` must enumerate the same
    /// number of points, in lockstep correspondence (as mem/file selections
    /// of a single I/O call always do).
    pub fn project_intersection(&self, dst: &Dataspace, src_intersect: &Dataspace) -> Dataspace {
        let src_pts = self.points();
        let dst_pts = dst.points();
        let n = src_pts.len().min(dst_pts.len());
        let mut projected = Vec::new();
        for i in 0..n {
            if point_in_selection(&src_pts[i], src_intersect) {
                projected.push(dst_pts[i].clone());
            }
        }
        Dataspace {
            class: dst.class,
            current: dst.current.clone(),
            max: dst.max.clone(),
            selection: Selection::Points(projected),
        }
    }
}

fn point_in_selection(point: &[u64], space: &Dataspace) -> bool {
    match space.bounds() {
        None => false,
        Some((min, max)) => (0..point.len()).all(|i| point[i] >= min[i] && point[i] <= max[i]),
    }
}

fn enumerate_box(min: &[u64], shape: &[u64], _step: &[u64]) -> Vec<Dims> {
    let rank = shape.len();
    if rank == 0 {
        return vec![Dims::new()];
    }
    if shape.iter().any(|&d| d == 0) {
        return Vec::new();
    }
    let total: u64 = shape.iter().product();
    let mut out = Vec::with_capacity(total as usize);
    let mut idx = vec![0u64; rank];
    for _ in 0..total {
        let point: Dims = (0..rank).map(|i| min[i] + idx[i]).collect();
        out.push(point);
        for i in (0..rank).rev() {
            idx[i] += 1;
            if idx[i] < shape[i] {
                break;
            }
            idx[i] = 0;
        }
    }
    out
}

fn enumerate_hyperslab(h: &Hyperslab, prefix: &mut Dims, dim: usize, out: &mut Vec<Dims>) {
    if h.count.iter().any(|&c| c == 0) || h.block.iter().any(|&b| b == 0) {
        return;
    }
    if dim == h.start.len() {
        out.push(prefix.clone());
        return;
    }
    for c in 0..h.count[dim] {
        for b in 0..h.block[dim] {
            let coord = h.start[dim] + c * h.stride[dim] + b;
            prefix.push(coord);
            enumerate_hyperslab(h, prefix, dim + 1, out);
            prefix.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_selection_enumerates_row_major() {
        let ds = Dataspace::simple_fixed(Dims::from_slice(&[2, 3]));
        let pts = ds.points();
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[0].as_slice(), &[0, 0]);
        assert_eq!(pts[1].as_slice(), &[0, 1]);
        assert_eq!(pts[3].as_slice(), &[1, 0]);
    }

    #[test]
    fn hyperslab_intersects_bbox() {
        let a = Dataspace::simple_fixed(Dims::from_slice(&[100]))
            .with_selection(Selection::Hyperslab(Hyperslab {
                start: Dims::from_slice(&[0]),
                stride: Dims::from_slice(&[1]),
                count: Dims::from_slice(&[50]),
                block: Dims::from_slice(&[1]),
            }));
        let b = Dataspace::simple_fixed(Dims::from_slice(&[100]))
            .with_selection(Selection::Hyperslab(Hyperslab {
                start: Dims::from_slice(&[50]),
                stride: Dims::from_slice(&[1]),
                count: Dims::from_slice(&[50]),
                block: Dims::from_slice(&[1]),
            }));
        assert!(!a.intersects(&b));

        let c = Dataspace::simple_fixed(Dims::from_slice(&[100]))
            .with_selection(Selection::Hyperslab(Hyperslab {
                start: Dims::from_slice(&[25]),
                stride: Dims::from_slice(&[1]),
                count: Dims::from_slice(&[50]),
                block: Dims::from_slice(&[1]),
            }));
        assert!(a.intersects(&c));
    }

    #[test]
    fn iterate_merges_contiguous_runs() {
        let ds = Dataspace::simple_fixed(Dims::from_slice(&[10]));
        let mut runs = Vec::new();
        ds.iterate(4, |off, len| runs.push((off, len)));
        assert_eq!(runs, vec![(0, 40)]);
    }

    #[test]
    fn project_intersection_keeps_pairing() {
        let file = Dataspace::simple_fixed(Dims::from_slice(&[10]));
        let mem = Dataspace::simple_fixed(Dims::from_slice(&[10]));
        let window = Dataspace::simple_fixed(Dims::from_slice(&[10])).with_selection(
            Selection::Hyperslab(Hyperslab {
                start: Dims::from_slice(&[2]),
                stride: Dims::from_slice(&[1]),
                count: Dims::from_slice(&[3]),
                block: Dims::from_slice(&[1]),
            }),
        );
        let projected = file.project_intersection(&mem, &window);
        assert_eq!(projected.selected_count(), 3);
        assert_eq!(
            projected.points(),
            vec![Dims::from_slice(&[2]), Dims::from_slice(&[3]), Dims::from_slice(&[4])]
        );
    }

    #[test]
    fn set_extent_rejects_exceeding_fixed_max() {
        let mut ds = Dataspace::simple_fixed(Dims::from_slice(&[10]));
        assert!(ds.set_extent(Dims::from_slice(&[20]), None).is_err());
        assert!(ds.set_extent(Dims::from_slice(&[5]), None).is_ok());
        assert_eq!(ds.current_extent(), &[5]);
    }

    #[test]
    fn set_extent_allows_unlimited() {
        let mut ds = Dataspace::simple(Dims::from_slice(&[10]), vec![None]);
        assert!(ds.set_extent(Dims::from_slice(&[1_000_000]), None).is_ok());
    }
}
