//! ASCII ROC curve for terminal output.
//!
//! Fixed-size character grid over the unit square, deterministic output:
//!
//! - ROC curve: `*`
//! - chance diagonal: `.` (only where the curve does not pass)

/// Render `(fpr, tpr)` points as a `width` x `height` character plot.
pub fn render_ascii_roc(curve: &[(f64, f64)], auc: f64, width: usize, height: usize) -> String {
    let width = width.max(5);
    let height = height.max(3);
    let mut grid = vec![vec![' '; width]; height];

    // Curve first so the diagonal only fills blanks.
    let mut prev = None;
    for &(x, y) in curve {
        let cx = map_x(x, width);
        let cy = map_y(y, height);
        match prev {
            Some((x0, y0)) => draw_line(&mut grid, x0, y0, cx, cy, '*'),
            None => grid[cy][cx] = '*',
        }
        prev = Some((cx, cy));
    }
    draw_line(&mut grid, 0, height - 1, width - 1, 0, '.');

    let mut out = format!("ROC: AUC={auc:.3} | x=FPR [0, 1], y=TPR [0, 1]\n");
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

fn map_x(x: f64, width: usize) -> usize {
    (x.clamp(0.0, 1.0) * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, height: usize) -> usize {
    // Row 0 is the top (tpr = 1).
    (height as f64 - 1.0 - y.clamp(0.0, 1.0) * (height as f64 - 1.0)).round() as usize
}

/// Integer line drawing (Bresenham); only writes into blank cells.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let (mut x, mut y) = (x0 as isize, y0 as isize);
    let (x1, y1) = (x1 as isize, y1 as isize);

    let dx = (x1 - x).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let dy = -(y1 - y).abs();
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if let Some(cell) = grid.get_mut(y as usize).and_then(|row| row.get_mut(x as usize)) {
            if *cell == ' ' {
                *cell = ch;
            }
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_classifier_snapshot() {
        let txt = render_ascii_roc(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)], 1.0, 5, 3);
        let expected = concat!(
            "ROC: AUC=1.000 | x=FPR [0, 1], y=TPR [0, 1]\n",
            "*****\n",
            "*..  \n",
            "*    \n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn chance_curve_covers_diagonal() {
        let txt = render_ascii_roc(&[(0.0, 0.0), (1.0, 1.0)], 0.5, 10, 5);
        assert!(!txt.lines().skip(1).any(|l| l.contains('.')));
        assert_eq!(txt.lines().count(), 6);
    }
}
