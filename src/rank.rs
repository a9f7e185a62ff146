//! Ranking and colouring of merit values. Pure functions, no I/O.

/// Ten steps from red (lowest merit) to blue (highest).
pub const PALETTE: [&str; 10] = [
    "#FF0000", "#FF4000", "#FF8000", "#FFB000", "#FFD700", "#B8FF00", "#80FF00", "#00FF80",
    "#0080FF", "#0040FF",
];

/// Linear mapping of the observed merit range onto the palette.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
}

impl ColorScale {
    /// `None` when there are no values at all.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        values.into_iter().fold(None, |scale, v| {
            Some(match scale {
                None => ColorScale { min: v, max: v },
                Some(ColorScale { min, max }) => ColorScale {
                    min: min.min(v),
                    max: max.max(v),
                },
            })
        })
    }

    /// Palette index of `merit`. A degenerate range puts everything in the top band.
    pub fn band(&self, merit: f64) -> usize {
        let top = PALETTE.len() - 1;
        let span = self.max - self.min;
        if span <= 0.0 {
            return top;
        }
        let normalized = ((merit - self.min) / span).clamp(0.0, 1.0);
        ((normalized * PALETTE.len() as f64) as usize).min(top)
    }

    pub fn color(&self, merit: f64) -> &'static str {
        PALETTE[self.band(merit)]
    }

    /// Merit interval covered by band `i`, for the legend.
    pub fn band_range(&self, i: usize) -> (f64, f64) {
        let span = self.max - self.min;
        let n = PALETTE.len() as f64;
        (
            self.min + span * (i as f64 / n),
            self.min + span * ((i + 1) as f64 / n),
        )
    }
}

/// Position of one school among all ranked schools.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Standing {
    /// 1 is the highest merit value.
    pub rank: usize,
    /// Share of schools with a strictly lower merit value, in percent.
    pub percentile: f64,
}

/// Ranks `merits`, returning one standing per input in input order.
/// Equal values keep their input order.
pub fn rank(merits: &[f64]) -> Vec<Standing> {
    let n = merits.len();
    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| merits[b].total_cmp(&merits[a]));

    let mut ascending = merits.to_vec();
    ascending.sort_by(f64::total_cmp);

    let mut standings = vec![
        Standing {
            rank: 0,
            percentile: 0.0,
        };
        n
    ];
    for (pos, &i) in order.iter().enumerate() {
        let lower = ascending.partition_point(|&v| v < merits[i]);
        standings[i] = Standing {
            rank: pos + 1,
            percentile: 100.0 * lower as f64 / n as f64,
        };
    }
    standings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_span_the_range() {
        let scale = ColorScale::from_values([150.0, 250.0]).unwrap();
        assert_eq!(scale.band(150.0), 0);
        assert_eq!(scale.band(250.0), 9);
        assert_eq!(scale.band(200.0), 5);
        assert_eq!(scale.band(159.9), 0);
        assert_eq!(scale.color(250.0), "#0040FF");
        assert_eq!(scale.color(150.0), "#FF0000");
    }

    #[test]
    fn bands_are_monotonic() {
        let values = (0..=340).map(|v| v as f64 * 0.97 + 3.0).collect::<Vec<_>>();
        let scale = ColorScale::from_values(values.iter().copied()).unwrap();
        for pair in values.windows(2) {
            assert!(scale.band(pair[0]) <= scale.band(pair[1]));
        }
    }

    #[test]
    fn single_value_is_top_band() {
        let scale = ColorScale::from_values([300.0]).unwrap();
        assert_eq!(scale.band(300.0), PALETTE.len() - 1);
        assert!(ColorScale::from_values(std::iter::empty()).is_none());
    }

    #[test]
    fn legend_ranges() {
        let scale = ColorScale { min: 100.0, max: 300.0 };
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        let (lo, hi) = scale.band_range(0);
        assert!(close(lo, 100.0) && close(hi, 120.0));
        let (lo, hi) = scale.band_range(9);
        assert!(close(lo, 280.0) && close(hi, 300.0));
    }

    #[test]
    fn ranks_highest_first() {
        let standings = rank(&[200.0, 300.0, 250.0, 300.0]);
        let ranks = standings.iter().map(|s| s.rank).collect::<Vec<_>>();
        assert_eq!(ranks, [4, 1, 3, 2]);
        assert_eq!(standings[0].percentile, 0.0);
        assert_eq!(standings[2].percentile, 25.0);
        assert_eq!(standings[1].percentile, 50.0);
        assert_eq!(standings[3].percentile, 50.0);
    }

    #[test]
    fn nothing_to_rank() {
        assert!(rank(&[]).is_empty());
    }
}
