/// Quantization utilities and scalar kernels.

/// Largest representable integer for a `bits`-wide quantizer.
#[inline]
pub fn max_int(bits: u32, signed: bool) -> i64 {
    if signed { (1i64 << (bits - 1)) - 1 } else { (1i64 << bits) - 1 }
}

#[inline]
pub fn min_int(bits: u32, signed: bool) -> i64 {
    if signed { -(1i64 << (bits - 1)) } else { 0 }
}

/// Scale mapping `range_max` onto the top of the integer range.
#[inline]
pub fn scale_for(range_max: f32, bits: u32, signed: bool) -> f32 {
    let m = max_int(bits, signed) as f32;
    if range_max > 0.0 { range_max / m } else { 1.0 }
}

#[inline]
pub fn quantize_value(x: f32, scale: f32, bits: u32, signed: bool) -> i64 {
    let q = (x / scale).round() as i64;
    q.clamp(min_int(bits, signed), max_int(bits, signed))
}

/// Quantize then dequantize.
#[inline]
pub fn fake_quantize(x: f32, scale: f32, bits: u32, signed: bool) -> f32 {
    quantize_value(x, scale, bits, signed) as f32 * scale
}
