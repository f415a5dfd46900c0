use crate::models::{Cell, MetricValue, ResultRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    ValueColumn,
    /// No `value` column; the first column was used instead.
    FirstColumn,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    pub value: MetricValue,
    pub source: ValueSource,
}

impl Normalized {
    pub fn is_low_confidence(&self) -> bool {
        self.source != ValueSource::ValueColumn
    }
}

/// Locates the scalar with an ordered fallback: a column named `value`, then
/// the first column of the first row, then nothing at all.
pub fn normalize_scalar(rows: &[ResultRow]) -> Normalized {
    let Some(row) = rows.first() else {
        return Normalized {
            value: MetricValue::NoData,
            source: ValueSource::Empty,
        };
    };

    if let Some(cell) = row.get("value") {
        return Normalized {
            value: coerce(cell),
            source: ValueSource::ValueColumn,
        };
    }

    match row.first() {
        Some((_, cell)) => Normalized {
            value: coerce(cell),
            source: ValueSource::FirstColumn,
        },
        None => Normalized {
            value: MetricValue::NoData,
            source: ValueSource::Empty,
        },
    }
}

/// Non-numeric and non-finite values become `NoData`, which renders as 0.
pub fn coerce(cell: &Cell) -> MetricValue {
    match cell.as_f64() {
        Some(number) if number.is_finite() => MetricValue::Value(number),
        _ => MetricValue::NoData,
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_scalar, ValueSource};
    use crate::models::{Cell, MetricValue, ResultRow};

    #[test]
    fn falls_back_to_first_column() {
        let normalized = normalize_scalar(&[ResultRow::from_pairs([("count", Cell::Integer(5))])]);
        assert_eq!(normalized.value, MetricValue::Value(5.0));
        assert_eq!(normalized.source, ValueSource::FirstColumn);
        assert_eq!(normalized.value.as_number(), 5.0);
    }

    #[test]
    fn non_numeric_value_normalizes_to_zero() {
        let normalized = normalize_scalar(&[ResultRow::from_pairs([(
            "value",
            Cell::Text("not a number".to_string()),
        )])]);
        assert_eq!(normalized.value, MetricValue::NoData);
        assert_eq!(normalized.value.as_number(), 0.0);
        assert_eq!(normalized.source, ValueSource::ValueColumn);
    }

    #[test]
    fn value_column_wins_over_position() {
        let normalized = normalize_scalar(&[ResultRow::from_pairs([
            ("label", Cell::Text("Current".to_string())),
            ("Value", Cell::Text(" 1250.75 ".to_string())),
        ])]);
        assert_eq!(normalized.value, MetricValue::Value(1250.75));
        assert!(!normalized.is_low_confidence());
    }

    #[test]
    fn empty_result_is_no_data_and_real_zero_is_a_value() {
        assert_eq!(normalize_scalar(&[]).value, MetricValue::NoData);
        let zero = normalize_scalar(&[ResultRow::from_pairs([("value", Cell::Integer(0))])]);
        assert_eq!(zero.value, MetricValue::Value(0.0));
    }
}
