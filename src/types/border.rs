/// One end of a score range in ZRANGEBYSCORE-style queries: a finite value
/// (inclusive or exclusive) or an infinity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBorder {
    NegInf,
    PosInf,
    Value { value: f64, exclude: bool },
}

impl ScoreBorder {
    pub fn inclusive(value: f64) -> Self {
        ScoreBorder::Value {
            value,
            exclude: false,
        }
    }

    pub fn exclusive(value: f64) -> Self {
        ScoreBorder::Value {
            value,
            exclude: true,
        }
    }

    /// Used as the upper border: is `value` within it?
    pub fn greater(&self, value: f64) -> bool {
        match self {
            ScoreBorder::NegInf => false,
            ScoreBorder::PosInf => true,
            ScoreBorder::Value {
                value: border,
                exclude,
            } => {
                if *exclude {
                    *border > value
                } else {
                    *border >= value
                }
            }
        }
    }

    /// Used as the lower border: is `value` within it?
    pub fn less(&self, value: f64) -> bool {
        match self {
            ScoreBorder::NegInf => true,
            ScoreBorder::PosInf => false,
            ScoreBorder::Value {
                value: border,
                exclude,
            } => {
                if *exclude {
                    *border < value
                } else {
                    *border <= value
                }
            }
        }
    }

    /// Treating `self` as the lower border and `other` as the upper one, is
    /// the range empty regardless of contents?
    pub fn excludes_all_of(&self, upper: &ScoreBorder) -> bool {
        match (self, upper) {
            (ScoreBorder::PosInf, _) | (_, ScoreBorder::NegInf) => true,
            (
                ScoreBorder::Value {
                    value: min,
                    exclude: min_ex,
                },
                ScoreBorder::Value {
                    value: max,
                    exclude: max_ex,
                },
            ) => min > max || (min == max && (*min_ex || *max_ex)),
            _ => false,
        }
    }

    /// Parse a wire argument: `+inf`, `-inf`, `(3.5` for exclusive, `3.5`
    /// for inclusive.
    pub fn parse(raw: &[u8]) -> Result<ScoreBorder, ()> {
        match raw {
            b"inf" | b"+inf" => return Ok(ScoreBorder::PosInf),
            b"-inf" => return Ok(ScoreBorder::NegInf),
            _ => {}
        }
        let (digits, exclude) = match raw.strip_prefix(b"(") {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        let value: f64 = std::str::from_utf8(digits)
            .map_err(|_| ())?
            .parse()
            .map_err(|_| ())?;
        Ok(ScoreBorder::Value { value, exclude })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_infinities_and_exclusive_values() {
        assert_eq!(ScoreBorder::parse(b"+inf"), Ok(ScoreBorder::PosInf));
        assert_eq!(ScoreBorder::parse(b"inf"), Ok(ScoreBorder::PosInf));
        assert_eq!(ScoreBorder::parse(b"-inf"), Ok(ScoreBorder::NegInf));
        assert_eq!(ScoreBorder::parse(b"2.5"), Ok(ScoreBorder::inclusive(2.5)));
        assert_eq!(ScoreBorder::parse(b"(2.5"), Ok(ScoreBorder::exclusive(2.5)));
        assert!(ScoreBorder::parse(b"nope").is_err());
        assert!(ScoreBorder::parse(b"(").is_err());
    }

    #[test]
    fn border_predicates() {
        let min = ScoreBorder::inclusive(2.0);
        assert!(min.less(2.0));
        assert!(min.less(3.0));
        assert!(!min.less(1.0));

        let min = ScoreBorder::exclusive(2.0);
        assert!(!min.less(2.0));
        assert!(min.less(2.1));

        let max = ScoreBorder::inclusive(2.0);
        assert!(max.greater(2.0));
        assert!(!max.greater(2.1));

        assert!(ScoreBorder::NegInf.less(f64::MIN));
        assert!(ScoreBorder::PosInf.greater(f64::MAX));
    }

    #[test]
    fn empty_range_detection() {
        assert!(ScoreBorder::inclusive(3.0).excludes_all_of(&ScoreBorder::inclusive(2.0)));
        assert!(ScoreBorder::exclusive(2.0).excludes_all_of(&ScoreBorder::inclusive(2.0)));
        assert!(ScoreBorder::inclusive(2.0).excludes_all_of(&ScoreBorder::exclusive(2.0)));
        assert!(!ScoreBorder::inclusive(2.0).excludes_all_of(&ScoreBorder::inclusive(2.0)));
        assert!(ScoreBorder::PosInf.excludes_all_of(&ScoreBorder::PosInf));
        assert!(!ScoreBorder::NegInf.excludes_all_of(&ScoreBorder::PosInf));
    }
}
