//! Math utilites.

use num_traits::PrimInt;

/// Rounds up `src` to the power of two `factor`.
pub fn round_up_pot<T: PrimInt>(src: T, factor: T) -> T {
    debug_assert_eq!(factor.count_ones(), 1); // .is_power_of_two()
    let minus1 = factor - T::one();
    (src + minus1) & !minus1
}

/// Performs integer division between a and b rounding up, instead of down
pub fn round_up_div<T: PrimInt>(a: T, b: T) -> T {
    (a + (b - T::one())) / b
}

/// Number of mips in a full chain for a 2d texture of the given size, down to 1x1.
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Size of the given mip of a 2d texture. Never goes below 1.
pub fn mip_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_rounds_up() {
        assert_eq!(round_up_div(0_u32, 64), 0);
        assert_eq!(round_up_div(1_u32, 64), 1);
        assert_eq!(round_up_div(64_u32, 64), 1);
        assert_eq!(round_up_div(65_u32, 64), 2);
    }

    #[test]
    fn pot_rounding() {
        assert_eq!(round_up_pot(13_u64, 16), 16);
        assert_eq!(round_up_pot(32_u64, 16), 32);
    }

    #[test]
    fn mips() {
        assert_eq!(mip_count(1, 1), 1);
        assert_eq!(mip_count(64, 64), 7);
        assert_eq!(mip_count(5, 3), 3);
        assert_eq!(mip_size(5, 3, 1), (2, 1));
        assert_eq!(mip_size(5, 3, 2), (1, 1));
    }
}
