/// Rounds down onto the granularity grid.
pub fn quantize(watts: f64, granularity_w: i32) -> i32 {
    let step = f64::from(granularity_w.max(1));
    ((watts / step).floor() * step) as i32
}

/// New inverter power limit that brings the grid exchange to zero.
///
/// The result is one granularity step above the quantized demand, so the
/// household keeps exporting a little instead of importing, and it always
/// stays within `[min_power_w, max_power_w]` with the floor taking precedence.
pub fn balance_target(
    inverter_power_w: f64,
    grid_power_w: f64,
    granularity_w: i32,
    min_power_w: i32,
    max_power_w: i32,
) -> anyhow::Result<i32> {
    let raw = inverter_power_w + grid_power_w;
    if !raw.is_finite() {
        anyhow::bail!("non-finite power balance from {inverter_power_w} W and {grid_power_w} W");
    }
    let biased = quantize(raw, granularity_w).saturating_add(granularity_w);
    Ok(biased.min(max_power_w).max(min_power_w))
}
