//! Critical values for the split significance tests.
//!
//! Both lookups clamp out-of-range degrees of freedom to the nearest
//! tabulated entry instead of failing.

/// Tabulated confidence levels, most demanding first.
const CHI_CONFIDENCE: [f64; 11] = [
    0.99995, 0.9999, 0.99975, 0.9995, 0.999, 0.995, 0.99, 0.975, 0.95, 0.9, 0.75,
];

/// Chi-square quantiles for df = 1..=5, one row per entry of [`CHI_CONFIDENCE`].
const CHI_TABLE: [[f64; 5]; 11] = [
    [16.5, 20.0, 22.7, 25.0, 27.5],
    [15.2, 18.5, 21.2, 23.6, 25.8],
    [13.4, 16.6, 19.2, 21.6, 23.8],
    [12.1, 15.2, 17.7, 20.0, 22.1],
    [10.8, 13.8, 16.3, 18.5, 20.5],
    [7.88, 10.6, 12.8, 14.9, 16.7],
    [6.63, 9.21, 11.3, 13.3, 15.1],
    [5.02, 7.38, 9.35, 11.1, 12.8],
    [3.84, 5.99, 7.81, 9.49, 11.1],
    [2.71, 4.61, 6.25, 7.78, 9.24],
    [1.32, 2.77, 4.11, 5.39, 6.63],
];

/// Value returned for confidence levels that are not tabulated.
const CHI_UNTABULATED: f64 = 1e-9;

/// Return the chi-square critical value for `df` degrees of freedom at `confidence`.
///
/// `df` is clamped into `1..=5`. A confidence level that matches no row
/// yields a near-zero value so that every split passes.
#[must_use]
pub fn chi_square_threshold(df: usize, confidence: f64) -> f64 {
    let col = df.clamp(1, 5) - 1;
    CHI_CONFIDENCE
        .iter()
        .position(|&c| (c - confidence).abs() < 1e-9)
        .map_or(CHI_UNTABULATED, |row| CHI_TABLE[row][col])
}

/// Denominator degrees of freedom with a tabulated row.
const F_DF2: [usize; 36] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 40, 60, 80, 100, 120, 1000,
];

/// F(1, df2) critical values at the 10% level.
const F_10: [f64; 36] = [
    39.9, 8.53, 5.54, 4.54, 4.06, 3.78, 3.59, 3.46, 3.36, 3.29, 3.23, 3.18, 3.14, 3.10, 3.07,
    3.05, 3.03, 3.01, 2.99, 2.97, 2.96, 2.95, 2.94, 2.93, 2.92, 2.91, 2.90, 2.89, 2.89, 2.88,
    2.84, 2.79, 2.77, 2.76, 2.75, 2.71,
];

/// F(1, df2) critical values at the 5% level.
const F_5: [f64; 36] = [
    161.0, 18.5, 10.1, 7.71, 6.61, 5.99, 5.59, 5.32, 5.12, 4.96, 4.84, 4.75, 4.67, 4.60, 4.54,
    4.49, 4.45, 4.41, 4.38, 4.35, 4.32, 4.30, 4.28, 4.26, 4.24, 4.23, 4.21, 4.20, 4.18, 4.17,
    4.08, 4.00, 3.96, 3.94, 3.92, 3.84,
];

/// F(1, df2) critical values at the 1% level.
const F_1: [f64; 36] = [
    4052.0, 98.5, 34.1, 21.2, 16.3, 13.7, 12.2, 11.3, 10.6, 10.0, 9.65, 9.33, 9.07, 8.86, 8.68,
    8.53, 8.40, 8.29, 8.18, 8.10, 8.02, 7.95, 7.88, 7.82, 7.77, 7.72, 7.68, 7.64, 7.60, 7.56,
    7.31, 7.08, 6.96, 6.90, 6.85, 6.63,
];

/// Return the F(1, `df2`) critical value at significance level `alpha`.
///
/// The row is the largest tabulated `df2` not above the requested one
/// (clamped to the first row). Levels of 0.10 or more use the 10% column,
/// levels in `[0.05, 0.10)` the 5% column, anything smaller the 1% column.
/// `alpha >= 1` disables the test.
#[must_use]
pub fn f_threshold(df2: usize, alpha: f64) -> f64 {
    if alpha >= 1.0 {
        return 0.0;
    }
    let row = F_DF2.iter().rposition(|&d| d <= df2).unwrap_or(0);
    if alpha >= 0.1 {
        F_10[row]
    } else if alpha >= 0.05 {
        F_5[row]
    } else {
        F_1[row]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chi_square_lookup() {
        assert_eq!(chi_square_threshold(1, 0.95), 3.84);
        assert_eq!(chi_square_threshold(3, 0.999), 16.3);
    }

    #[test]
    fn chi_square_clamps_df() {
        assert_eq!(chi_square_threshold(0, 0.95), 3.84);
        assert_eq!(chi_square_threshold(12, 0.95), 11.1);
    }

    #[test]
    fn chi_square_untabulated_level() {
        assert_eq!(chi_square_threshold(2, 0.5), CHI_UNTABULATED);
    }

    #[test]
    fn f_lookup_rows() {
        assert_eq!(f_threshold(1, 0.05), 161.0);
        assert_eq!(f_threshold(35, 0.05), 4.17);
        assert_eq!(f_threshold(5000, 0.01), 6.63);
        assert_eq!(f_threshold(0, 0.1), 39.9);
    }

    #[test]
    fn f_disabled_at_one() {
        assert_eq!(f_threshold(10, 1.0), 0.0);
    }
}
