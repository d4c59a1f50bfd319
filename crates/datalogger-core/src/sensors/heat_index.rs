//! Heat index ("feels like" temperature)
//!
//! Uses the simple Steadman approximation and switches to the Rothfusz
//! regression (with the NWS low/high humidity adjustments) once the simple
//! result reaches 80 °F, as DHT sensor drivers do.

use libm::{fabsf, sqrtf};

pub fn celsius_to_fahrenheit(c: f32) -> f32 {
    c * 1.8 + 32.0
}

pub fn fahrenheit_to_celsius(f: f32) -> f32 {
    (f - 32.0) * 0.55555
}

/// Compute the heat index for `temperature` and relative `humidity` (%).
///
/// `temperature` and the result are in °F when `is_fahrenheit` is set and
/// in °C otherwise.
pub fn compute_heat_index(temperature: f32, humidity: f32, is_fahrenheit: bool) -> f32 {
    let t = if is_fahrenheit {
        temperature
    } else {
        celsius_to_fahrenheit(temperature)
    };
    let h = humidity;

    let mut hi = 0.5 * (t + 61.0 + ((t - 68.0) * 1.2) + (h * 0.094));

    if hi > 79.0 {
        hi = -42.379 + 2.049_015_2 * t + 10.143_331 * h
            - 0.224_755_41 * t * h
            - 0.006_837_83 * t * t
            - 0.054_817_17 * h * h
            + 0.001_228_74 * t * t * h
            + 0.000_852_82 * t * h * h
            - 0.000_001_99 * t * t * h * h;

        if h < 13.0 && (80.0..=112.0).contains(&t) {
            hi -= ((13.0 - h) * 0.25) * sqrtf((17.0 - fabsf(t - 95.0)) * 0.058_82);
        } else if h > 85.0 && (80.0..=87.0).contains(&t) {
            hi += ((h - 85.0) * 0.1) * ((87.0 - t) * 0.2);
        }
    }

    if is_fahrenheit {
        hi
    } else {
        fahrenheit_to_celsius(hi)
    }
}
