use crate::types::types::ColorRgb;

const TEST_COLORS: [ColorRgb; 4] = [
    ColorRgb::RED,
    ColorRgb::GREEN,
    ColorRgb::BLUE,
    ColorRgb::WHITE,
];

/// Cycles through the test colours on repeated presses of "test", so each
/// press is visibly different on the LEDs. Lives on the calling thread.
#[derive(Debug, Default)]
pub struct TestPalette {
    presses: usize,
}

impl TestPalette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_color(&mut self) -> ColorRgb {
        let color = TEST_COLORS[self.presses % TEST_COLORS.len()];
        self.presses = self.presses.wrapping_add(1);
        color
    }
}
