//! Index dates of repeated extractions
//!
//! A study measured over time compiles one [Dataset](super::Dataset) per index date.

use chrono::{Days, Months, NaiveDate};
use std::{fmt, str::FromStr};

use super::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// The step between two index dates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Increment {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl Increment {
    /// The `n`-th date after `start`, months counted from `start` itself
    fn step(self, start: NaiveDate, n: u32) -> Option<NaiveDate> {
        match self {
            Increment::Day => start.checked_add_days(Days::new(n.into())),
            Increment::Week => start.checked_add_days(Days::new(7 * u64::from(n))),
            Increment::Month => start.checked_add_months(Months::new(n)),
            Increment::Year => start.checked_add_months(Months::new(12 * n)),
        }
    }
}

impl FromStr for Increment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "day" => Ok(Increment::Day),
            "week" => Ok(Increment::Week),
            "month" => Ok(Increment::Month),
            "year" => Ok(Increment::Year),
            other => Err(Error::invalid_definition(
                "cohort_date_range",
                format!("unknown increment {other}, use day, week, month or year"),
            )),
        }
    }
}

impl fmt::Display for Increment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Increment::Day => write!(f, "day"),
            Increment::Week => write!(f, "week"),
            Increment::Month => write!(f, "month"),
            Increment::Year => write!(f, "year"),
        }
    }
}

fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).map_err(|err| {
        Error::invalid_definition("cohort_date_range", format!("{date} is not a date ({err})"))
    })
}

/// Dates from `start` to `end`, both included, `increment` apart
pub fn cohort_date_range<S: AsRef<str>, E: AsRef<str>>(
    start: S,
    end: E,
    increment: Increment,
) -> Result<Vec<NaiveDate>> {
    let start = parse_date(start.as_ref())?;
    let end = parse_date(end.as_ref())?;
    if start > end {
        return Err(Error::invalid_definition(
            "cohort_date_range",
            format!("{start} is after {end}"),
        ));
    }
    Ok((0..)
        .map_while(|n| increment.step(start, n))
        .take_while(|date| *date <= end)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(dates: &[&str]) -> Vec<NaiveDate> {
        dates.iter().map(|date| parse_date(date).unwrap()).collect()
    }

    #[test]
    fn test_months() {
        let range = cohort_date_range("2021-01-01", "2021-03-04", Increment::default()).unwrap();
        println!("{range:?}");
        assert_eq!(range, dates(&["2021-01-01", "2021-02-01", "2021-03-01"]));
        let range =
            cohort_date_range("2019-01-01", "2019-02-10", "month".parse().unwrap()).unwrap();
        assert_eq!(range, dates(&["2019-01-01", "2019-02-01"]));
        // The end of a month stays the end of the following months
        let range = cohort_date_range("2021-01-31", "2021-04-30", Increment::Month).unwrap();
        assert_eq!(
            range,
            dates(&["2021-01-31", "2021-02-28", "2021-03-31", "2021-04-30"])
        );
    }

    #[test]
    fn test_days_and_weeks() {
        let range = cohort_date_range("2020-12-30", "2021-01-01", Increment::Day).unwrap();
        assert_eq!(range, dates(&["2020-12-30", "2020-12-31", "2021-01-01"]));
        let range = cohort_date_range("2021-01-01", "2021-01-15", Increment::Week).unwrap();
        assert_eq!(range, dates(&["2021-01-01", "2021-01-08", "2021-01-15"]));
        let range = cohort_date_range("2020-02-29", "2022-03-01", Increment::Year).unwrap();
        assert_eq!(range, dates(&["2020-02-29", "2021-02-28", "2022-02-28"]));
        assert_eq!(
            cohort_date_range("2021-06-01", "2021-06-01", Increment::Week).unwrap(),
            dates(&["2021-06-01"])
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            cohort_date_range("2021-03-01", "2021-01-01", Increment::Month),
            Err(Error::InvalidDefinition(_))
        ));
        assert!(cohort_date_range("2021-13-01", "2022-01-01", Increment::Month).is_err());
        assert!("fortnight".parse::<Increment>().is_err());
        assert_eq!("week".parse::<Increment>().unwrap(), Increment::Week);
        assert_eq!(Increment::Year.to_string(), "year");
    }
}
