use super::{CompareOp, Condition, CountAggregate, CountTarget, Literal, OrderKey, Projection, Table};
use crate::errors::{AppError, AppResult};
use crate::models::{Cell, ResultRow};
use std::cmp::Ordering;

/// Filter, project, sort and truncate `table`. This is the whole row-level
/// surface of the interpreter; parsed queries reach it through [`super::AccessQuery::run`].
pub fn query(
    table: &Table,
    projection: &Projection,
    filters: &[Condition],
    order_by: &[OrderKey],
    limit: Option<usize>,
) -> AppResult<Vec<ResultRow>> {
    for condition in filters {
        require_column(table, &condition.column)?;
    }
    if let Projection::Columns(columns) = projection {
        for column in columns {
            require_column(table, &column.column)?;
        }
    }
    for key in order_by {
        let projected = match projection {
            Projection::All => false,
            Projection::Columns(columns) => columns
                .iter()
                .any(|column| column.output_name().eq_ignore_ascii_case(&key.column)),
        };
        if !projected {
            require_column(table, &key.column)?;
        }
    }

    let surviving = table
        .rows
        .iter()
        .filter(|row| filters.iter().all(|condition| matches(row, condition)));

    // Source rows ride along so ORDER BY can also see columns the projection dropped.
    let mut projected: Vec<(&ResultRow, ResultRow)> = surviving
        .map(|row| (row, project(row, projection)))
        .collect();

    if !order_by.is_empty() {
        projected.sort_by(|(left_source, left), (right_source, right)| {
            for key in order_by {
                let left_cell = sort_cell(left, left_source, &key.column);
                let right_cell = sort_cell(right, right_source, &key.column);
                let mut ordering = compare_cells(left_cell, right_cell);
                if key.descending {
                    ordering = ordering.reverse();
                }
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let mut rows: Vec<ResultRow> = projected.into_iter().map(|(_, row)| row).collect();
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

/// `COUNT(*)` counts surviving rows; `COUNT(col)` counts surviving non-null values of `col`.
/// The single aggregate row is still subject to LIMIT.
pub(super) fn count(
    table: &Table,
    aggregate: &CountAggregate,
    filters: &[Condition],
    limit: Option<usize>,
) -> AppResult<Vec<ResultRow>> {
    for condition in filters {
        require_column(table, &condition.column)?;
    }
    if let CountTarget::Column(column) = &aggregate.target {
        require_column(table, column)?;
    }

    let total = table
        .rows
        .iter()
        .filter(|row| filters.iter().all(|condition| matches(row, condition)))
        .filter(|row| match &aggregate.target {
            CountTarget::All => true,
            CountTarget::Column(column) => row.get(column).is_some_and(|cell| !cell.is_null()),
        })
        .count();

    let mut rows = vec![ResultRow::from_pairs([(
        aggregate.alias.clone(),
        Cell::Integer(total as i64),
    )])];
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

fn require_column(table: &Table, column: &str) -> AppResult<()> {
    if table.has_column(column) {
        Ok(())
    } else {
        Err(AppError::QueryExecution(format!(
            "column {} not found in table {}",
            column, table.name
        )))
    }
}

fn matches(row: &ResultRow, condition: &Condition) -> bool {
    let Some(cell) = row.get(&condition.column) else {
        return false;
    };
    if cell.is_null() {
        return false;
    }

    let ordering = match &condition.value {
        Literal::Number(expected) => match cell.as_f64() {
            Some(actual) => actual.partial_cmp(expected),
            None => cell
                .as_text()
                .map(|actual| actual.as_str().cmp(format_number(*expected).as_str())),
        },
        Literal::Text(expected) => cell.as_text().map(|actual| actual.as_str().cmp(expected.as_str())),
    };
    let Some(ordering) = ordering else {
        return false;
    };

    match condition.op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::GtEq => ordering != Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
    }
}

fn project(row: &ResultRow, projection: &Projection) -> ResultRow {
    match projection {
        Projection::All => row.clone(),
        Projection::Columns(columns) => {
            let mut projected = ResultRow::new();
            for column in columns {
                let cell = row.get(&column.column).cloned().unwrap_or(Cell::Null);
                let name = match &column.alias {
                    Some(alias) => alias.as_str(),
                    None => row.column_name(&column.column).unwrap_or(&column.column),
                };
                projected.push(name, cell);
            }
            projected
        }
    }
}

fn sort_cell<'a>(projected: &'a ResultRow, source: &'a ResultRow, column: &str) -> &'a Cell {
    const NULL: &Cell = &Cell::Null;
    projected
        .get(column)
        .or_else(|| source.get(column))
        .unwrap_or(NULL)
}

/// Nulls sort first; numbers compare numerically, everything else as text.
fn compare_cells(left: &Cell, right: &Cell) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    let a = left.as_text().unwrap_or_default();
    let b = right.as_text().unwrap_or_default();
    a.cmp(&b)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
