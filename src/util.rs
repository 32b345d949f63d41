// 2^53 - 1, the largest magnitude below which every integer is an exact f64
const MAX_EXACT_INT: f64 = 9_007_199_254_740_991.0;

/// Truncates `f` toward zero, or returns None if it is not finite or exceeds [MAX_EXACT_INT]
/// in magnitude.
pub(crate) fn f64_to_i64_safe(f: f64) -> Option<i64> {
    if f.is_finite() && f.abs() <= MAX_EXACT_INT {
        Some(f as i64)
    } else {
        None
    }
}

/// For `skip_serializing_if` on flags that are only written when set.
pub(crate) fn is_false(b: &bool) -> bool {
    !(*b)
}
