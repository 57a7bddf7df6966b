/// Next-day direction: `Some(1)` when tomorrow closes above today, `Some(0)`
/// otherwise, `None` on the final row.
///
/// An undefined close on either side also yields `None` so the row falls out
/// of the completeness filter instead of being labelled down.
pub fn next_day_targets(close: &[f64]) -> Vec<Option<u8>> {
    let len = close.len();
    (0..len)
        .map(|i| {
            if i + 1 >= len {
                return None;
            }
            let (today, tomorrow) = (close[i], close[i + 1]);
            if !today.is_finite() || !tomorrow.is_finite() {
                return None;
            }
            Some(u8::from(tomorrow > today))
        })
        .collect()
}
