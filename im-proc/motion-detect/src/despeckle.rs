//! Morphological cleanup of the binary change plane.
//!
//! The filter is a user-supplied string of letter codes applied in order:
//! `E` erode 3x3, `e` erode 5-point cross, `D` dilate 3x3, `d` dilate
//! 5-point cross, `l` label and keep only blobs above the pixel threshold.
//! Unknown letters are ignored with a warning (once).

/// One step of the despeckle pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Erode9,
    Erode5,
    Dilate9,
    Dilate5,
    Label,
}

pub(crate) fn parse_filter(filter: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    for ch in filter.chars() {
        match ch {
            'E' => steps.push(Step::Erode9),
            'e' => steps.push(Step::Erode5),
            'D' => steps.push(Step::Dilate9),
            'd' => steps.push(Step::Dilate5),
            'l' => steps.push(Step::Label),
            other => {
                tracing::warn!("ignoring unknown despeckle code {other:?}");
            }
        }
    }
    steps
}

/// 3x3 erosion: a pixel survives only when all eight neighbors are set.
/// Border pixels are treated as having unset outside-neighbors.
pub(crate) fn erode9(plane: &mut [u8], scratch: &mut [u8], width: usize, height: usize) {
    scratch.copy_from_slice(plane);
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if scratch[i] == 0 {
                continue;
            }
            let mut keep = x > 0 && x + 1 < width && y > 0 && y + 1 < height;
            if keep {
                for dy in [-1isize, 0, 1] {
                    for dx in [-1isize, 0, 1] {
                        let j = (i as isize + dy * width as isize + dx) as usize;
                        if scratch[j] == 0 {
                            keep = false;
                        }
                    }
                }
            }
            if !keep {
                plane[i] = 0;
            }
        }
    }
}

/// Cross-shaped erosion: the four edge-adjacent neighbors must be set.
pub(crate) fn erode5(plane: &mut [u8], scratch: &mut [u8], width: usize, height: usize) {
    scratch.copy_from_slice(plane);
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if scratch[i] == 0 {
                continue;
            }
            let keep = x > 0
                && x + 1 < width
                && y > 0
                && y + 1 < height
                && scratch[i - 1] != 0
                && scratch[i + 1] != 0
                && scratch[i - width] != 0
                && scratch[i + width] != 0;
            if !keep {
                plane[i] = 0;
            }
        }
    }
}

/// 3x3 dilation: any set pixel spreads to its eight neighbors.
pub(crate) fn dilate9(plane: &mut [u8], scratch: &mut [u8], width: usize, height: usize) {
    scratch.copy_from_slice(plane);
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if plane[i] != 0 {
                continue;
            }
            'neighbors: for dy in [-1isize, 0, 1] {
                for dx in [-1isize, 0, 1] {
                    let ny = y as isize + dy;
                    let nx = x as isize + dx;
                    if ny < 0 || ny >= height as isize || nx < 0 || nx >= width as isize {
                        continue;
                    }
                    if scratch[(ny * width as isize + nx) as usize] != 0 {
                        plane[i] = 255;
                        break 'neighbors;
                    }
                }
            }
        }
    }
}

/// Cross-shaped dilation.
pub(crate) fn dilate5(plane: &mut [u8], scratch: &mut [u8], width: usize, height: usize) {
    scratch.copy_from_slice(plane);
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if plane[i] != 0 {
                continue;
            }
            let hit = (x > 0 && scratch[i - 1] != 0)
                || (x + 1 < width && scratch[i + 1] != 0)
                || (y > 0 && scratch[i - width] != 0)
                || (y + 1 < height && scratch[i + width] != 0);
            if hit {
                plane[i] = 255;
            }
        }
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
    fn test_erode9_removes_speckle() {
        let (mut p, w, h) = plane(&[
            ".....",
            "..#..",
            ".....",
        ]);
        let mut scratch = vec![0u8; p.len()];
        erode9(&mut p, &mut scratch, w, h);
        assert!(p.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_erode9_keeps_solid_interior() {
        let (mut p, w, h) = plane(&[
            "#####",
            "#####",
            "#####",
            "#####",
            "#####",
        ]);
        let mut scratch = vec![0u8; p.len()];
        erode9(&mut p, &mut scratch, w, h);
        // Only the 3x3 interior survives.
        let set: usize = p.iter().filter(|&&v| v != 0).count();
        assert_eq!(set, 9);
        assert_ne!(p[6], 0);
        assert_eq!(p[0], 0);
    }

    #[test]
    fn test_dilate9_grows() {
        let (mut p, w, h) = plane(&[
            ".....",
            "..#..",
            ".....",
        ]);
        let mut scratch = vec![0u8; p.len()];
        dilate9(&mut p, &mut scratch, w, h);
        let set: usize = p.iter().filter(|&&v| v != 0).count();
        assert_eq!(set, 9);
    }

    #[test]
    fn test_dilate5_cross() {
        let (mut p, w, h) = plane(&[
            ".....",
            "..#..",
            ".....",
        ]);
        let mut scratch = vec![0u8; p.len()];
        dilate5(&mut p, &mut scratch, w, h);
        let set: usize = p.iter().filter(|&&v| v != 0).count();
        assert_eq!(set, 5);
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            parse_filter("EedDl"),
            vec![
                Step::Erode9,
                Step::Erode5,
                Step::Dilate5,
                Step::Dilate9,
                Step::Label
            ]
        );
        assert!(parse_filter("").is_empty());
    }
}
