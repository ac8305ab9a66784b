//! Arithmetic, comparison and conversion semantics.
//!
//! Integer arithmetic wraps in two's complement; the only trap is division
//! or remainder by zero, reported as `None`. Floating-point follows IEEE 754
//! as Rust's `f32`/`f64` already do, except where the instruction set pins
//! down something Rust leaves to the caller (NaN in comparisons, saturating
//! float-to-int conversion).

use std::cmp::Ordering;

/// `idiv`; `None` on a zero divisor.
pub fn idiv(a: i32, b: i32) -> Option<i32> {
    (b != 0).then(|| a.wrapping_div(b))
}

/// `irem`; `None` on a zero divisor.
pub fn irem(a: i32, b: i32) -> Option<i32> {
    (b != 0).then(|| a.wrapping_rem(b))
}

/// `ldiv`; `None` on a zero divisor.
pub fn ldiv(a: i64, b: i64) -> Option<i64> {
    (b != 0).then(|| a.wrapping_div(b))
}

/// `lrem`; `None` on a zero divisor.
pub fn lrem(a: i64, b: i64) -> Option<i64> {
    (b != 0).then(|| a.wrapping_rem(b))
}

/// `frem`: truncated remainder, sign of the dividend.
pub fn frem(a: f32, b: f32) -> f32 {
    a % b
}

/// `drem`: truncated remainder, sign of the dividend.
pub fn drem(a: f64, b: f64) -> f64 {
    a % b
}

/// `ishl`; the distance is masked to five bits.
pub fn ishl(a: i32, distance: i32) -> i32 {
    a.wrapping_shl((distance & 0x1f) as u32)
}

/// `ishr`
pub fn ishr(a: i32, distance: i32) -> i32 {
    a.wrapping_shr((distance & 0x1f) as u32)
}

/// `iushr`
pub fn iushr(a: i32, distance: i32) -> i32 {
    ((a as u32) >> (distance & 0x1f)) as i32
}

/// `lshl`; the distance is masked to six bits.
pub fn lshl(a: i64, distance: i32) -> i64 {
    a.wrapping_shl((distance & 0x3f) as u32)
}

/// `lshr`
pub fn lshr(a: i64, distance: i32) -> i64 {
    a.wrapping_shr((distance & 0x3f) as u32)
}

/// `lushr`
pub fn lushr(a: i64, distance: i32) -> i64 {
    ((a as u64) >> (distance & 0x3f)) as i64
}

/// `lcmp`
pub fn lcmp(a: i64, b: i64) -> i32 {
    ordering_to_int(a.cmp(&b))
}

/// `fcmpl` / `fcmpg`: `nan_result` is what an unordered pair yields
/// (-1 for the `l` form, 1 for the `g` form).
pub fn fcmp(a: f32, b: f32, nan_result: i32) -> i32 {
    a.partial_cmp(&b).map_or(nan_result, ordering_to_int)
}

/// `dcmpl` / `dcmpg`
pub fn dcmp(a: f64, b: f64, nan_result: i32) -> i32 {
    a.partial_cmp(&b).map_or(nan_result, ordering_to_int)
}

fn ordering_to_int(o: Ordering) -> i32 {
    match o {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

// Rust's `as` casts from float to int already saturate and map NaN to 0.

/// `f2i`
pub fn f2i(v: f32) -> i32 {
    v as i32
}

/// `f2l`
pub fn f2l(v: f32) -> i64 {
    v as i64
}

/// `d2i`
pub fn d2i(v: f64) -> i32 {
    v as i32
}

/// `d2l`
pub fn d2l(v: f64) -> i64 {
    v as i64
}

/// `i2b`
pub fn i2b(v: i32) -> i32 {
    v as i8 as i32
}

/// `i2c`
pub fn i2c(v: i32) -> i32 {
    v as u16 as i32
}

/// `i2s`
pub fn i2s(v: i32) -> i32 {
    v as i16 as i32
}

/// Decimal rendering of a `float` as `String.valueOf(float)` produces it.
pub fn format_float(v: f32) -> String {
    format_floating(
        v as f64,
        || format!("{:e}", v),
        || format!("{:?}", v),
    )
}

/// Decimal rendering of a `double` as `String.valueOf(double)` produces it.
pub fn format_double(v: f64) -> String {
    format_floating(v, || format!("{:e}", v), || format!("{:?}", v))
}

/// `v` only selects the notation. Digits come from the closures, which
/// format the value at its own width so `float` keeps its shortest digits.
fn format_floating(
    v: f64,
    scientific: impl FnOnce() -> String,
    plain: impl FnOnce() -> String,
) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-3..1e7).contains(&magnitude) {
        // Scientific notation: 1.0E10, 1.5E-5
        let s = scientific();
        let (mantissa, exponent) = s.split_once('e').unwrap_or((&s, "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{}.0", mantissa)
        };
        return format!("{}E{}", mantissa, exponent);
    }
    plain()
}
