//! Aggregate star rating shown next to a book.

/// Rounds to the nearest half star.
///
/// ```
/// use bookdesk_core::rating::round_to_half;
///
/// assert_eq!(round_to_half(4.25), 4.5);
/// assert_eq!(round_to_half(3.2), 3.0);
/// ```
pub fn round_to_half(value: f64) -> f64 {
    (value * 2.0).round() / 2.0
}

/// Mean of `ratings` rounded to the nearest half star, or `0.0` when empty.
pub fn average_rating<I>(ratings: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = ratings
        .into_iter()
        .fold((0.0_f64, 0_usize), |(sum, count), r| (sum + r, count + 1));
    if count == 0 {
        return 0.0;
    }
    round_to_half(sum / count as f64)
}

/// Formats a rating with exactly one decimal digit.
pub fn format_rating(value: f64) -> String {
    format!("{value:.1}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_and_five_average_to_four_and_a_half() {
        assert_eq!(format_rating(average_rating([4.0, 5.0])), "4.5");
    }

    #[test]
    fn empty_reviews_average_to_zero() {
        assert_eq!(average_rating(Vec::<f64>::new()), 0.0);
        assert_eq!(format_rating(average_rating([])), "0.0");
    }

    #[test]
    fn mean_is_rounded_to_half_stars() {
        // 13 / 3 = 4.333.. -> 4.5
        assert_eq!(average_rating([4.0, 4.0, 5.0]), 4.5);
        // 11 / 3 = 3.666.. -> 3.5
        assert_eq!(average_rating([3.0, 3.0, 5.0]), 3.5);
        // 7 / 4 = 1.75 -> 2.0
        assert_eq!(average_rating([1.0, 1.0, 2.0, 3.0]), 2.0);
        assert_eq!(average_rating([1.0]), 1.0);
    }

    #[test]
    fn every_mean_of_valid_ratings_stays_in_range() {
        for a in 1..=5 {
            for b in 1..=5 {
                for c in 1..=5 {
                    let avg = average_rating([a as f64, b as f64, c as f64]);
                    let mean = (a + b + c) as f64 / 3.0;
                    assert!((1.0..=5.0).contains(&avg));
                    assert!((avg - mean).abs() <= 0.25 + f64::EPSILON);
                    assert_eq!((avg * 2.0).fract(), 0.0);
                }
            }
        }
    }
}
