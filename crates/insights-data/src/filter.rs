//! Row filtering by a [`FilterSpec`].

use insights_core::models::FilterSpec;

use crate::dataset::Record;

/// `true` when `row` satisfies every key set in `spec`.
///
/// Text keys are exact matches. `user_type` compares against the employee
/// flag and `date_range` is inclusive on [`Record::date`]. A key the row
/// type does not carry (e.g. `model` on adoption rows) never matches.
pub fn matches<R: Record + ?Sized>(row: &R, spec: &FilterSpec) -> bool {
    if let Some(segment) = &spec.segment {
        if row.segment() != segment.as_str() {
            return false;
        }
    }
    if let Some(user_type) = spec.user_type {
        if row.is_employee() != Some(user_type.is_employee()) {
            return false;
        }
    }
    if let Some(enterprise) = &spec.enterprise {
        if row.enterprise() != Some(enterprise.as_str()) {
            return false;
        }
    }
    if let Some(model) = &spec.model {
        if row.model() != Some(model.as_str()) {
            return false;
        }
    }
    if let Some(range) = &spec.date_range {
        if !range.contains(row.date()) {
            return false;
        }
    }
    true
}

/// The rows of `rows` matching `spec`, in their original order.
pub fn filter_rows<'a, R: Record>(rows: &'a [R], spec: &FilterSpec) -> Vec<&'a R> {
    rows.iter().filter(|row| matches(*row, spec)).collect()
}
