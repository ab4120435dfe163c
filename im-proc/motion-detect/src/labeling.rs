//! Two-pass connected-component labeling with 8-connectivity.

/// Result of labeling a binary change plane.
pub(crate) struct LabelResult {
    /// Per-pixel label, 0 for background. Same shape as the change plane.
    pub labels: Vec<u16>,
    /// Number of distinct blobs found.
    pub total: u16,
    /// Label id of the largest blob (0 when none).
    pub largest: u16,
    /// Pixel count of the largest blob.
    pub largest_pixels: u32,
    /// Pixel counts per label, indexed by label id.
    pub sizes: Vec<u32>,
}

struct UnionFind {
    parent: Vec<u16>,
}

impl UnionFind {
    fn new() -> Self {
        // Index 0 is the background and never merged.
        Self { parent: vec![0] }
    }

    fn make(&mut self) -> u16 {
        if self.parent.len() >= u16::MAX as usize {
            // Provisional label space exhausted; collapse into the last one.
            return (self.parent.len() - 1) as u16;
        }
        let id = self.parent.len() as u16;
        self.parent.push(id);
        id
    }

    fn find(&mut self, mut x: u16) -> u16 {
        while self.parent[x as usize] != x {
            // Path halving.
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u16, b: u16) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi as usize] = lo;
        }
    }
}

/// Label the nonzero pixels of `change` (width*height, row major).
pub(crate) fn label_components(change: &[u8], width: usize, height: usize) -> LabelResult {
    debug_assert_eq!(change.len(), width * height);
    let mut labels = vec![0u16; change.len()];
    let mut uf = UnionFind::new();

    // First pass: provisional labels, merging across the four already-seen
    // neighbors (W, NW, N, NE).
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if change[i] == 0 {
                continue;
            }
            let mut neighbor = 0u16;
            let merge = |lab: u16, uf: &mut UnionFind, neighbor: &mut u16| {
                if lab != 0 {
                    if *neighbor == 0 {
                        *neighbor = lab;
                    } else if lab != *neighbor {
                        uf.union(lab, *neighbor);
                    }
                }
            };
            if x > 0 {
                merge(labels[i - 1], &mut uf, &mut neighbor);
            }
            if y > 0 {
                if x > 0 {
                    merge(labels[i - width - 1], &mut uf, &mut neighbor);
                }
                merge(labels[i - width], &mut uf, &mut neighbor);
                if x + 1 < width {
                    merge(labels[i - width + 1], &mut uf, &mut neighbor);
                }
            }
            labels[i] = if neighbor == 0 { uf.make() } else { neighbor };
        }
    }

    // Second pass: resolve equivalences to compact ids and count sizes.
    let mut compact = vec![0u16; uf.parent.len()];
    let mut next = 0u16;
    let mut sizes: Vec<u32> = vec![0];
    for i in 0..labels.len() {
        if labels[i] == 0 {
            continue;
        }
        let root = uf.find(labels[i]);
        if compact[root as usize] == 0 {
            next += 1;
            compact[root as usize] = next;
            sizes.push(0);
        }
        labels[i] = compact[root as usize];
        sizes[labels[i] as usize] += 1;
    }

    let (largest, largest_pixels) = sizes
        .iter()
        .enumerate()
        .skip(1)
        .max_by_key(|(_, n)| **n)
        .map(|(id, n)| (id as u16, *n))
        .unwrap_or((0, 0));

    LabelResult {
        labels,
        total: next,
        largest,
        largest_pixels,
        sizes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(rows: &[&str]) -> (Vec<u8>, usize, usize) {
        let height = rows.len();
        let width = rows[0].len();
        let mut out = Vec::with_capacity(width * height);
        for row in rows {
            for ch in row.bytes() {
                out.push(if ch == b'#' { 255 } else { 0 });
            }
        }
        (out, width, height)
    }

    #[test]
    fn test_two_blobs() {
        let (change, w, h) = plane(&[
            "##....",
            "##....",
            "......",
            "....##",
            "...###",
        ]);
        let r = label_components(&change, w, h);
        assert_eq!(r.total, 2);
        assert_eq!(r.largest_pixels, 5);
        // All largest-blob pixels carry the same label.
        let lab = r.largest;
        assert_eq!(r.labels[3 * w + 4], lab);
        assert_eq!(r.labels[4 * w + 3], lab);
    }

    #[test]
    fn test_diagonal_connects() {
        let (change, w, h) = plane(&[
            "#.....",
            ".#....",
            "..#...",
        ]);
        let r = label_components(&change, w, h);
        assert_eq!(r.total, 1);
        assert_eq!(r.largest_pixels, 3);
    }

    #[test]
    fn test_u_shape_merges() {
        // The two arms get distinct provisional labels which must merge at
        // the bottom of the U.
        let (change, w, h) = plane(&[
            "#...#",
            "#...#",
            "#####",
        ]);
        let r = label_components(&change, w, h);
        assert_eq!(r.total, 1);
        assert_eq!(r.largest_pixels, 9);
    }

    #[test]
    fn test_empty_plane() {
        let (change, w, h) = plane(&["....", "...."]);
        let r = label_components(&change, w, h);
        assert_eq!(r.total, 0);
        assert_eq!(r.largest, 0);
        assert_eq!(r.largest_pixels, 0);
    }
}
