use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::models::DocumentType;
use crate::schema::document_types;

/// Issues the next number in a document type's series.
///
/// The read-increment-write holds a row lock on the one `document_types`
/// row, so concurrent callers for the same type serialize on each other
/// while other types allocate freely. Must run inside a transaction;
/// document creation folds allocation into its own transaction, so a
/// rolled-back insert consumes no number.
pub fn allocate_number_locked(
    conn: &mut PgConnection,
    doc_type_id: Uuid,
) -> Result<String, diesel::result::Error> {
    let locked: DocumentType = document_types::table
        .find(doc_type_id)
        .for_update()
        .first(conn)?;

    diesel::update(document_types::table.find(doc_type_id))
        .set(document_types::next_number.eq(locked.next_number + 1))
        .execute(conn)?;

    Ok(format_number(&locked.series, locked.next_number))
}

pub fn format_number(series: &str, number: i32) -> String {
    format!("{series}-{number:05}")
}

#[cfg(test)]
mod tests {
    use super::format_number;

    #[test]
    fn pads_to_five_digits() {
        assert_eq!(format_number("OL", 1), "OL-00001");
        assert_eq!(format_number("OL", 2), "OL-00002");
        assert_eq!(format_number("PV", 12345), "PV-12345");
    }

    #[test]
    fn wide_numbers_are_not_truncated() {
        assert_eq!(format_number("SR", 123456), "SR-123456");
    }
}
