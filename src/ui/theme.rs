//! Color palettes for the script picker

use super::widgets::RowStatus;
use crate::config::Theme;
use ratatui::style::Color;

/// Colors shared by every widget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeColors {
    pub bg: Color,
    pub fg: Color,
    /// Separators and secondary text
    pub dim: Color,
    /// Borders and section headings
    pub accent: Color,
    /// Highlighted script and passing rows
    pub ok: Color,
    pub warn: Color,
    pub error: Color,
    /// Background of the tab and status bars
    pub bar: Color,
}

impl ThemeColors {
    pub fn from_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self::dark(),
            Theme::Light => Self::light(),
        }
    }

    pub fn dark() -> Self {
        Self {
            bg: Color::Rgb(18, 18, 24),
            fg: Color::Rgb(205, 205, 215),
            dim: Color::Rgb(95, 95, 115),
            accent: Color::Rgb(255, 200, 60),
            ok: Color::Rgb(90, 205, 125),
            warn: Color::Rgb(240, 170, 70),
            error: Color::Rgb(235, 85, 95),
            bar: Color::Rgb(48, 48, 62),
        }
    }

    /// High contrast for bright terminals
    pub fn light() -> Self {
        Self {
            bg: Color::Rgb(248, 246, 240),
            fg: Color::Rgb(28, 28, 36),
            dim: Color::Rgb(135, 135, 150),
            accent: Color::Rgb(170, 110, 0),
            ok: Color::Rgb(25, 140, 65),
            warn: Color::Rgb(185, 115, 0),
            error: Color::Rgb(195, 45, 55),
            bar: Color::Rgb(215, 212, 205),
        }
    }

    /// Color for a panel row of the given status
    pub fn status(&self, status: RowStatus) -> Color {
        match status {
            RowStatus::Ok => self.ok,
            RowStatus::Warning => self.warn,
            RowStatus::Error => self.error,
            RowStatus::Info => self.accent,
        }
    }
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self::dark()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_theme_selects_palette() {
        assert_eq!(ThemeColors::from_theme(Theme::Dark), ThemeColors::dark());
        assert_eq!(ThemeColors::from_theme(Theme::Light), ThemeColors::light());
        assert_ne!(ThemeColors::dark().bg, ThemeColors::light().bg);
    }

    #[test]
    fn status_colors() {
        let colors = ThemeColors::dark();
        assert_eq!(colors.status(RowStatus::Ok), colors.ok);
        assert_eq!(colors.status(RowStatus::Error), colors.error);
        assert_eq!(colors.status(RowStatus::Info), colors.accent);
    }
}
