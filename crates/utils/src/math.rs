// This file is part of Courier.
//
// Courier is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Courier is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Courier.
// If not, see https://www.gnu.org/licenses/.

//! Math utilities

/// Increases a number by a percentage, saturating at `u128::MAX`
pub fn increase_by_percent(n: u128, percent: u32) -> u128 {
    n.saturating_mul(100 + u128::from(percent)) / 100
}

/// Increases a number by a percentage, rounding up
pub fn increase_by_percent_ceil(n: u128, percent: u32) -> u128 {
    n.saturating_mul(100 + u128::from(percent))
        .saturating_add(99)
        / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increase_by_percent() {
        assert_eq!(increase_by_percent(100, 10), 110);
        assert_eq!(increase_by_percent(3, 10), 3);
        assert_eq!(increase_by_percent(0, 50), 0);
        assert_eq!(increase_by_percent(u128::MAX, 10), u128::MAX / 100);
    }

    #[test]
    fn test_increase_by_percent_ceil() {
        assert_eq!(increase_by_percent_ceil(3, 10), 4);
        assert_eq!(increase_by_percent_ceil(100, 10), 110);
    }
}
