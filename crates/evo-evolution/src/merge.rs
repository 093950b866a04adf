//! Crossover of two configuration trees.

use evo_core::{ConfigTree, ConfigValue, NumericParam};

/// Blend parent `a` with parent `b`.
///
/// - numeric in both: `alpha * a + (1 - alpha) * b`, kept inside `a`'s range
/// - nested in both: merged recursively
/// - anything else present in both: `a`'s leaf
/// - present in one parent only: that parent's leaf
///
/// Identical leaves come back unchanged, so `merge(a, a, alpha) == a`.
#[must_use]
pub fn merge(a: &ConfigTree, b: &ConfigTree, alpha: f64) -> ConfigTree {
    let mut out = a.clone();
    for (key, b_value) in b.iter() {
        match a.get(key) {
            Some(a_value) => {
                out.insert(key.clone(), merge_value(a_value, b_value, alpha));
            }
            None => {
                out.insert(key.clone(), b_value.clone());
            }
        }
    }
    out
}

fn merge_value(a: &ConfigValue, b: &ConfigValue, alpha: f64) -> ConfigValue {
    match (a, b) {
        (ConfigValue::Numeric(x), ConfigValue::Numeric(y)) => ConfigValue::Numeric(NumericParam {
            value: x.constrain(interpolate(x.value, y.value, alpha)),
            ..x.clone()
        }),
        (ConfigValue::Nested(x), ConfigValue::Nested(y)) => ConfigValue::Nested(merge(x, y, alpha)),
        _ => a.clone(),
    }
}

#[allow(clippy::float_cmp)]
fn interpolate(a: f64, b: f64, alpha: f64) -> f64 {
    if a == b {
        return a;
    }
    alpha * a + (1.0 - alpha) * b
}
