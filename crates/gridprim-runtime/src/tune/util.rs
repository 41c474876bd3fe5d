/// Round `x` up to a multiple of `multiple`.
pub fn round_up(x: usize, multiple: usize) -> usize {
    x.div_ceil(multiple) * multiple
}

/// Round `x` down to a multiple of `multiple`.
pub fn round_down(x: usize, multiple: usize) -> usize {
    x / multiple * multiple
}

/// Largest power of two less than or equal to `x`, or zero when `x` is zero.
pub fn round_down_power2(x: usize) -> usize {
    match x {
        0 => 0,
        x => 1 << x.ilog2(),
    }
}

/// Every power of two in `min..=max`, in increasing order.
pub fn powers_of_two(min: usize, max: usize) -> impl Iterator<Item = usize> {
    let start = min.max(1).next_power_of_two();
    core::iter::successors(Some(start), |x| x.checked_mul(2)).take_while(move |x| *x <= max)
}
