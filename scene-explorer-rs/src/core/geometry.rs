//! Planar geometry kernel.
//!
//! Bounding boxes, polyline downsampling and resampling, and lane polygon
//! reconstruction from paired boundary polylines. Pure functions, no I/O.

use serde::Serialize;

/// A 2D point in a local metric frame.
pub type Point = [f64; 2];

/// Axis-aligned bounding box.
///
/// The empty box is `(+inf, +inf, -inf, -inf)`; extending it with any point
/// yields a valid box, and merging it into another box changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Default for BBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BBox {
    /// Creates the empty (invalid) box.
    pub const fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Creates a box from explicit bounds.
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounding box of a point sequence (empty if there are no points).
    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut b = Self::empty();
        for p in points {
            b.extend(p[0], p[1]);
        }
        b
    }

    /// Returns true if at least one point has been accumulated.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min_x.is_finite() && self.max_x.is_finite() && self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Grows the box to contain `(x, y)`. Non-finite coordinates are ignored.
    #[inline]
    pub fn extend(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Grows the box to contain `other`. No-op when `other` is empty.
    pub fn merge(&mut self, other: &BBox) {
        if !other.is_valid() {
            return;
        }
        self.extend(other.min_x, other.min_y);
        self.extend(other.max_x, other.max_y);
    }

    /// Union of two boxes.
    pub fn union(&self, other: &BBox) -> BBox {
        let mut out = *self;
        out.merge(other);
        out
    }

    /// Expands every side by `pad`. The empty box stays empty.
    pub fn padded(&self, pad: f64) -> BBox {
        if !self.is_valid() {
            return *self;
        }
        BBox::new(self.min_x - pad, self.min_y - pad, self.max_x + pad, self.max_y + pad)
    }

    /// Returns true if both boxes are valid and overlap (touching counts).
    pub fn intersects(&self, other: &BBox) -> bool {
        if !self.is_valid() || !other.is_valid() {
            return false;
        }
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    /// Returns true if `p` lies inside the box (inclusive).
    pub fn contains(&self, p: Point) -> bool {
        self.is_valid() && self.min_x <= p[0] && p[0] <= self.max_x && self.min_y <= p[1] && p[1] <= self.max_y
    }

    /// Center of the box, `None` when empty.
    pub fn center(&self) -> Option<Point> {
        if !self.is_valid() {
            return None;
        }
        Some([(self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0])
    }

    /// Returns `Some(self)` if valid.
    pub fn valid(self) -> Option<BBox> {
        if self.is_valid() {
            Some(self)
        } else {
            None
        }
    }
}

/// Squared euclidean distance.
#[inline]
pub fn dist2(a: Point, b: Point) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

#[inline]
fn dist(a: Point, b: Point) -> f64 {
    dist2(a, b).sqrt()
}

/// Indices kept when downsampling a polyline of `len` points by `step`.
///
/// Short polylines (`len <= max(12, 2 * step)`) or `step <= 1` keep every
/// index; otherwise every `step`-th index plus the final one.
pub fn sample_indices(len: usize, step: usize) -> Vec<usize> {
    if step <= 1 || len <= 12.max(step * 2) {
        return (0..len).collect();
    }
    let mut idxs: Vec<usize> = (0..len).step_by(step).collect();
    let last = len - 1;
    if idxs.last() != Some(&last) {
        idxs.push(last);
    }
    idxs
}

/// Downsamples raw polyline items, parsing each kept item into a point.
///
/// Items that fail to parse are skipped. If the result collapses to a single
/// point while the source had at least two items, the parsed final item is
/// appended so the line keeps its extent.
pub fn downsample_with<T, F>(items: &[T], step: usize, parse: F) -> Vec<Point>
where
    F: Fn(&T) -> Option<Point>,
{
    if items.is_empty() {
        return Vec::new();
    }
    let mut out: Vec<Point> = sample_indices(items.len(), step)
        .into_iter()
        .filter_map(|i| parse(&items[i]))
        .collect();

    if out.len() == 1 && items.len() >= 2 {
        if let Some(last) = items.last().and_then(&parse) {
            if last != out[0] {
                out.push(last);
            }
        }
    }
    out
}

/// Downsamples an already-parsed polyline.
pub fn downsample_polyline(points: &[Point], step: usize) -> Vec<Point> {
    downsample_with(points, step, |p| Some(*p))
}

/// Total arc length of a polyline.
pub fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| dist(w[0], w[1])).sum()
}

/// Resamples a polyline to exactly `n` points evenly spaced by arc length.
///
/// Endpoints are preserved. A single-point input is repeated; an empty input
/// stays empty.
pub fn resample_polyline(points: &[Point], n: usize) -> Vec<Point> {
    if points.is_empty() || n == 0 {
        return Vec::new();
    }
    if points.len() == 1 || n == 1 {
        return vec![points[0]; n];
    }

    let total = polyline_length(points);
    if total <= f64::EPSILON {
        return vec![points[0]; n];
    }

    let mut out = Vec::with_capacity(n);
    let mut seg = 0usize;
    let mut seg_start = 0.0;
    let mut seg_len = dist(points[0], points[1]);

    for i in 0..n {
        let target = total * (i as f64) / ((n - 1) as f64);
        while seg + 2 < points.len() && seg_start + seg_len < target {
            seg_start += seg_len;
            seg += 1;
            seg_len = dist(points[seg], points[seg + 1]);
        }
        let t = if seg_len > 0.0 {
            ((target - seg_start) / seg_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let a = points[seg];
        let b = points[seg + 1];
        out.push([a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]);
    }

    // Guard against float drift on the final point.
    if let (Some(last_out), Some(last_in)) = (out.last_mut(), points.last()) {
        *last_out = *last_in;
    }
    out
}

/// Appends the first point if the ring is not already closed.
pub fn close_ring(mut ring: Vec<Point>) -> Vec<Point> {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
    ring
}

/// Lane geometry reconstructed from boundary polylines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaneGeometry {
    pub centerline: Vec<Point>,
    /// Closed ring, or empty when only one boundary is usable.
    pub polygon: Vec<Point>,
}

/// Reconstructs a lane polygon and centerline from left/right boundaries.
///
/// The right boundary is reversed when pairing its endpoints crosswise with
/// the left boundary is shorter than pairing them directly. Both sides are
/// resampled to a common count and averaged into the centerline. The polygon
/// is the left side followed by the reversed right side, closed.
///
/// When only one boundary has two or more points, that boundary becomes the
/// centerline and no polygon is produced.
pub fn reconstruct_lane(left: &[Point], right: &[Point]) -> LaneGeometry {
    let left_ok = left.len() >= 2;
    let right_ok = right.len() >= 2;

    match (left_ok, right_ok) {
        (true, true) => {}
        (true, false) => {
            return LaneGeometry {
                centerline: left.to_vec(),
                polygon: Vec::new(),
            }
        }
        (false, true) => {
            return LaneGeometry {
                centerline: right.to_vec(),
                polygon: Vec::new(),
            }
        }
        (false, false) => return LaneGeometry::default(),
    }

    let l0 = left[0];
    let l1 = left[left.len() - 1];
    let r0 = right[0];
    let r1 = right[right.len() - 1];
    let direct = dist(l0, r0) + dist(l1, r1);
    let crossed = dist(l0, r1) + dist(l1, r0);

    let right_aligned: Vec<Point> = if crossed < direct {
        right.iter().rev().copied().collect()
    } else {
        right.to_vec()
    };

    let n = left.len().max(right_aligned.len()).max(2);
    let l = resample_polyline(left, n);
    let r = resample_polyline(&right_aligned, n);

    let centerline: Vec<Point> = l
        .iter()
        .zip(r.iter())
        .map(|(a, b)| [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0])
        .collect();

    let mut polygon = l;
    polygon.extend(r.iter().rev().copied());

    LaneGeometry {
        centerline,
        polygon: close_ring(polygon),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_empty_is_identity() {
        let a = BBox::new(0.0, 0.0, 2.0, 3.0);
        assert_eq!(a.union(&BBox::empty()), a);
        assert_eq!(BBox::empty().union(&a), a);
        assert!(!BBox::empty().is_valid());
        assert!(!BBox::empty().intersects(&a));
    }

    #[test]
    fn test_bbox_union_laws() {
        let a = BBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BBox::new(-2.0, 0.5, 0.5, 4.0);
        let c = BBox::new(3.0, -1.0, 5.0, 0.0);

        assert_eq!(a.union(&b), b.union(&a));
        assert_eq!(a.union(&b).union(&c), a.union(&b.union(&c)));
        assert_eq!(a.union(&b).union(&c), BBox::new(-2.0, -1.0, 5.0, 4.0));
    }

    #[test]
    fn test_bbox_pad_and_contains() {
        let b = BBox::new(0.0, 0.0, 10.0, 10.0).padded(5.0);
        assert_eq!(b, BBox::new(-5.0, -5.0, 15.0, 15.0));
        assert!(b.contains([-5.0, 15.0]));
        assert!(!b.contains([-5.1, 0.0]));
        assert_eq!(b.center(), Some([5.0, 5.0]));
        assert!(!BBox::empty().padded(10.0).is_valid());
    }

    #[test]
    fn test_downsample_short_polyline_unchanged() {
        let pts: Vec<Point> = (0..12).map(|i| [i as f64, 0.0]).collect();
        assert_eq!(downsample_polyline(&pts, 5), pts);
        let once = downsample_polyline(&pts, 5);
        assert_eq!(downsample_polyline(&once, 5), once);
    }

    #[test]
    fn test_downsample_long_polyline_keeps_endpoints() {
        let pts: Vec<Point> = (0..23).map(|i| [i as f64, 1.0]).collect();
        let out = downsample_polyline(&pts, 5);
        assert_eq!(out.first(), Some(&[0.0, 1.0]));
        assert_eq!(out.last(), Some(&[22.0, 1.0]));
        assert_eq!(out.len(), 6); // 0,5,10,15,20 + 22
    }

    #[test]
    fn test_downsample_skips_unparseable_points() {
        let items = vec!["(0, 0)", "bad", "bad", "(4, 4)"];
        let out = downsample_with(&items, 1, |s| {
            let s = s.trim_matches(|c| c == '(' || c == ')');
            let mut it = s.split(',');
            let x = it.next()?.trim().parse().ok()?;
            let y = it.next()?.trim().parse().ok()?;
            Some([x, y])
        });
        assert_eq!(out, vec![[0.0, 0.0], [4.0, 4.0]]);
    }

    #[test]
    fn test_resample_preserves_endpoints() {
        let pts = vec![[0.0, 0.0], [10.0, 0.0]];
        let out = resample_polyline(&pts, 5);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], [0.0, 0.0]);
        assert_eq!(out[2], [5.0, 0.0]);
        assert_eq!(out[4], [10.0, 0.0]);
    }

    #[test]
    fn test_reconstruct_lane_reverses_opposed_boundary() {
        let left = vec![[0.0, 0.0], [10.0, 0.0]];
        let right = vec![[10.0, 4.0], [0.0, 4.0]];
        let lane = reconstruct_lane(&left, &right);

        assert_eq!(lane.centerline.first(), Some(&[0.0, 2.0]));
        assert_eq!(lane.centerline.last(), Some(&[10.0, 2.0]));
        assert_eq!(lane.polygon.first(), lane.polygon.last());
        assert!(lane.polygon.len() >= 4);
    }

    #[test]
    fn test_reconstruct_lane_closure_cases() {
        let one_side = reconstruct_lane(&[[0.0, 0.0], [1.0, 0.0]], &[[5.0, 5.0]]);
        assert!(one_side.polygon.is_empty());
        assert_eq!(one_side.centerline.len(), 2);

        let nothing = reconstruct_lane(&[], &[[1.0, 1.0]]);
        assert!(nothing.polygon.is_empty());
        assert!(nothing.centerline.is_empty());
    }
}
