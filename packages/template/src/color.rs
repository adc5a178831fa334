//! Hex colors and their alpha channel.
//!
//! Objects hold `#RRGGBB` colors next to a separate `0..=1` opacity; the
//! persisted form folds the opacity into the color as `#RRGGBBAA`.

use crate::ValidationError;

/// Parses `#RRGGBB` or `#RRGGBBAA` into its channels. Alpha defaults to
/// `255` for the six-digit form.
#[must_use]
pub fn parse_hex(color: &str) -> Option<[u8; 4]> {
    let digits = color.strip_prefix('#')?;
    if !matches!(digits.len(), 6 | 8) || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    let alpha = if digits.len() == 8 { channel(6)? } else { 255 };
    Some([channel(0)?, channel(2)?, channel(4)?, alpha])
}

/// Checks that `color` is a `#RRGGBB` color.
///
/// # Errors
///
/// Returns [`ValidationError`] naming `field` otherwise.
pub fn validate_rgb(field: &str, color: &str) -> Result<(), ValidationError> {
    if color.len() == 7 && parse_hex(color).is_some() {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("expected a #RRGGBB color, got {color:?}"),
        ))
    }
}

/// Checks that `opacity` lies in `[0, 1]`.
///
/// # Errors
///
/// Returns [`ValidationError`] naming `field` otherwise.
pub fn validate_opacity(field: &str, opacity: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&opacity) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("expected an opacity between 0 and 1, got {opacity}"),
        ))
    }
}

/// Folds `opacity` into `color`, producing `#rrggbbaa`.
#[must_use]
pub fn with_alpha(color: &str, opacity: f64) -> String {
    let [r, g, b, _] = parse_hex(color).unwrap_or([0, 0, 0, 255]);
    format!("#{r:02x}{g:02x}{b:02x}{:02x}", alpha_byte(opacity))
}

/// Splits `#RRGGBBAA` into a lowercase `#rrggbb` color and an opacity
/// rounded to three decimals.
///
/// # Errors
///
/// Returns [`ValidationError`] naming `field` if `color` is not a hex
/// color.
pub fn split_alpha(field: &str, color: &str) -> Result<(String, f64), ValidationError> {
    let [r, g, b, a] = parse_hex(color).ok_or_else(|| {
        ValidationError::new(field, format!("expected a #RRGGBBAA color, got {color:?}"))
    })?;
    let opacity = (f64::from(a) / 255.0 * 1000.0).round() / 1000.0;
    Ok((format!("#{r:02x}{g:02x}{b:02x}"), opacity))
}

/// CSS `rgba()` notation of a color and opacity.
#[must_use]
pub fn rgba(color: &str, opacity: f64) -> String {
    let [r, g, b, _] = parse_hex(color).unwrap_or([0, 0, 0, 255]);
    format!("rgba({r}, {g}, {b}, {opacity})")
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn alpha_byte(opacity: f64) -> u8 {
    (opacity.clamp(0.0, 1.0) * 255.0).round() as u8
}
