//! Colour allocation for per-face graphics.

use image::Rgba;

pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const CYAN: Rgba<u8> = Rgba([0, 255, 255, 255]);
pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const MAGENTA: Rgba<u8> = Rgba([255, 0, 255, 255]);
pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const YELLOW: Rgba<u8> = Rgba([255, 255, 0, 255]);

const COLOR_CHOICES: [Rgba<u8>; 7] = [BLUE, CYAN, GREEN, MAGENTA, RED, WHITE, YELLOW];

/// Cycles through a fixed palette so each tracked face gets a distinct colour.
///
/// The cursor advances before each pick, so a fresh palette starts at cyan.
#[derive(Debug, Clone, Default)]
pub struct Palette {
    index: usize,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_color(&mut self) -> Rgba<u8> {
        self.index = (self.index + 1) % COLOR_CHOICES.len();
        COLOR_CHOICES[self.index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_color_is_cyan() {
        assert_eq!(Palette::new().next_color(), CYAN);
    }

    #[test]
    fn test_cycle_period() {
        let mut p = Palette::new();
        let first: Vec<_> = (0..7).map(|_| p.next_color()).collect();
        let second: Vec<_> = (0..7).map(|_| p.next_color()).collect();
        assert_eq!(first, second);
        assert_eq!(first[6], BLUE);
    }

    #[test]
    fn test_palettes_are_independent() {
        let mut a = Palette::new();
        let mut b = Palette::new();
        a.next_color();
        a.next_color();
        assert_eq!(b.next_color(), CYAN);
    }
}
