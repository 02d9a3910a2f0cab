//! Recursive Morton-order spatial sort.
//!
//! Positions are quantized to 10 bits per axis against the bounding box of
//! the range being sorted and interleaved into a 30-bit code. Ranges of
//! more than 256 points sharing one code are re-sorted against their own
//! (tighter) bounding box, so dense regions keep sub-ordering instead of
//! collapsing into arbitrary runs.

/// Spread the low 10 bits of `v` so every bit lands 3 positions apart.
pub fn part1by2(v: u32) -> u32 {
    let mut x = v & 0x3ff;
    x = (x | (x << 16)) & 0x30000ff;
    x = (x | (x << 8)) & 0x300f00f;
    x = (x | (x << 4)) & 0x30c30c3;
    x = (x | (x << 2)) & 0x9249249;
    x
}

/// Interleave three 10-bit axis values into a 30-bit Morton code.
pub fn morton_code(ix: u32, iy: u32, iz: u32) -> u32 {
    part1by2(ix) | (part1by2(iy) << 1) | (part1by2(iz) << 2)
}

/// Compute a permutation of `[0, N)` clustering spatially-close points.
///
/// The result is always a bijection: ranges whose extents are degenerate or
/// non-finite keep their incoming order.
pub fn morton_order(x: &[f32], y: &[f32], z: &[f32]) -> Vec<u32> {
    assert_eq!(x.len(), y.len());
    assert_eq!(x.len(), z.len());
    let mut indices: Vec<u32> = (0..x.len() as u32).collect();
    sort_range(&mut indices, x, y, z);
    indices
}

fn axis_scale(min: f32, max: f32) -> f32 {
    1024.0 / (max - min)
}

fn sort_range(indices: &mut [u32], x: &[f32], y: &[f32], z: &[f32]) {
    if indices.len() <= 1 {
        return;
    }

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for &i in indices.iter() {
        let p = [x[i as usize], y[i as usize], z[i as usize]];
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    let scale = [
        axis_scale(min[0], max[0]),
        axis_scale(min[1], max[1]),
        axis_scale(min[2], max[2]),
    ];
    if scale.iter().any(|s| !s.is_finite()) || min.iter().any(|m| !m.is_finite()) {
        return;
    }

    let quantize = |v: f32, axis: usize| -> u32 {
        ((v - min[axis]) * scale[axis]).clamp(0.0, 1023.0) as u32
    };

    let mut keyed: Vec<(u32, u32)> = indices
        .iter()
        .map(|&i| {
            let code = morton_code(
                quantize(x[i as usize], 0),
                quantize(y[i as usize], 1),
                quantize(z[i as usize], 2),
            );
            (code, i)
        })
        .collect();
    // Equal codes order by original index so results are deterministic.
    keyed.sort_unstable();

    for (slot, (_, i)) in keyed.iter().enumerate() {
        indices[slot] = *i;
    }

    let mut run_start = 0;
    while run_start < keyed.len() {
        let code = keyed[run_start].0;
        let mut run_end = run_start + 1;
        while run_end < keyed.len() && keyed[run_end].0 == code {
            run_end += 1;
        }
        if run_end - run_start > 256 {
            sort_range(&mut indices[run_start..run_end], x, y, z);
        }
        run_start = run_end;
    }
}
