//! TUI color theme

use ratatui::style::Color;

pub const HUD_GREEN: Color = Color::Rgb(0, 255, 0);
pub const CRITICAL_RED: Color = Color::Rgb(255, 0, 0);
pub const CAUTION_AMBER: Color = Color::Rgb(255, 191, 0);
pub const INFO_DIM: Color = Color::Rgb(0, 180, 0);
pub const BACKGROUND: Color = Color::Rgb(0, 20, 0);

/// Color for an access count relative to the hottest row on screen
/// - Above 2/3 of the peak: Critical (Red)
/// - Above 1/3: Caution (Amber)
/// - Otherwise: Normal (Green)
#[must_use]
pub fn heat_color(nr_accesses: u64, peak: u64) -> Color {
    if peak == 0 {
        return HUD_GREEN;
    }
    if nr_accesses * 3 > peak * 2 {
        CRITICAL_RED
    } else if nr_accesses * 3 > peak {
        CAUTION_AMBER
    } else {
        HUD_GREEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heat_color_thresholds() {
        assert_eq!(heat_color(0, 0), HUD_GREEN);
        assert_eq!(heat_color(90, 100), CRITICAL_RED);
        assert_eq!(heat_color(50, 100), CAUTION_AMBER);
        assert_eq!(heat_color(10, 100), HUD_GREEN);
    }
}
