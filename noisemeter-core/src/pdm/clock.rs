//! PDM clock divider search.

use crate::error::{NoiseError, Result};
use crate::hal::ClockDividers;

/// Split `total` into the three hardware divider stages.
///
/// `clk` and `mclk` range over 1..=4, `cko` over 2..=16. The first match in
/// that order wins.
pub fn find_divider_settings(total: u32) -> Result<ClockDividers> {
    for clk in 1..=4u32 {
        for mclk in 1..=4u32 {
            for cko in 2..=16u32 {
                let product = clk * mclk * cko;
                if product == total {
                    return Ok(ClockDividers { clk, mclk, cko });
                }
                if product > total {
                    break;
                }
            }
        }
    }
    Err(NoiseError::ClockDivider(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_divider_for_2048_khz() {
        let d = find_divider_settings(24).unwrap();
        assert_eq!(d, ClockDividers { clk: 1, mclk: 2, cko: 12 });
        assert_eq!(d.total(), 24);
    }

    #[test]
    fn small_divider_uses_cko_only() {
        let d = find_divider_settings(8).unwrap();
        assert_eq!(d, ClockDividers { clk: 1, mclk: 1, cko: 8 });
    }

    #[test]
    fn largest_reachable_divider() {
        assert_eq!(find_divider_settings(256).unwrap().total(), 256);
    }

    #[test]
    fn unreachable_dividers_fail() {
        assert!(matches!(find_divider_settings(1), Err(NoiseError::ClockDivider(1))));
        // 17 is prime and larger than the cko range.
        assert!(find_divider_settings(17).is_err());
        assert!(find_divider_settings(257).is_err());
    }
}
