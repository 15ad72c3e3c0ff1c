//! Position ordering for sibling rows.
//!
//! Pages within a qcm and questions within a page share the same ordering
//! scheme: every row carries a strictly positive `position`, unique among
//! the rows with the same parent. Moving an item one step exchanges its
//! position with the immediate neighbor in that direction; the set of
//! positions in use never changes, only which row holds which position.

use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }
}

/// One reorderable table: where the rows live and which column names the
/// parent collection. Identifiers only, never user input.
#[derive(Debug, Clone, Copy)]
pub struct SiblingSet {
    pub table: &'static str,
    pub parent_column: &'static str,
}

pub const QCM_PAGES: SiblingSet = SiblingSet {
    table: "qcm_pages",
    parent_column: "qcm_id",
};

pub const PAGE_QUESTIONS: SiblingSet = SiblingSet {
    table: "questions",
    parent_column: "page_id",
};

#[derive(Debug)]
pub enum ReorderError {
    /// The item id does not resolve to a row.
    NotFound,
    Store(rusqlite::Error),
}

impl fmt::Display for ReorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReorderError::NotFound => write!(f, "item not found"),
            ReorderError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for ReorderError {}

impl From<rusqlite::Error> for ReorderError {
    fn from(e: rusqlite::Error) -> Self {
        ReorderError::Store(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    /// Target and neighbor exchanged positions.
    Swapped,
    /// Target is already first/last in its parent; nothing changed.
    AtBoundary,
    /// Positions moved between read and write; nothing changed.
    Conflict,
}

/// Move `item_id` one step toward the start (`Up`) or end (`Down`) of its
/// parent's ordering by swapping positions with the adjacent sibling.
///
/// Neighbor selection is strict inequality on position combined with
/// closest-first, so the move is a single transposition even when the
/// position sequence has gaps. Both updates are guarded on the positions
/// read beforehand and committed in one transaction; if either guard
/// misses the swap is rolled back and `Conflict` is reported.
pub fn reorder(
    conn: &Connection,
    set: SiblingSet,
    item_id: &str,
    direction: Direction,
) -> Result<ReorderOutcome, ReorderError> {
    let target_sql = format!(
        "SELECT {}, position FROM {} WHERE id = ?",
        set.parent_column, set.table
    );
    let target: Option<(String, i64)> = conn
        .query_row(&target_sql, [item_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?;
    let Some((parent_id, position)) = target else {
        return Err(ReorderError::NotFound);
    };

    let neighbor_sql = match direction {
        Direction::Up => format!(
            "SELECT id, position FROM {} WHERE {} = ? AND position < ? ORDER BY position DESC LIMIT 1",
            set.table, set.parent_column
        ),
        Direction::Down => format!(
            "SELECT id, position FROM {} WHERE {} = ? AND position > ? ORDER BY position ASC LIMIT 1",
            set.table, set.parent_column
        ),
    };
    let neighbor: Option<(String, i64)> = conn
        .query_row(&neighbor_sql, params![parent_id, position], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .optional()?;
    let Some((neighbor_id, neighbor_position)) = neighbor else {
        return Ok(ReorderOutcome::AtBoundary);
    };

    let tx = conn.unchecked_transaction()?;
    let update_sql = format!(
        "UPDATE {} SET position = ? WHERE id = ? AND position = ?",
        set.table
    );
    let target_hit = tx.execute(&update_sql, params![neighbor_position, item_id, position])?;
    let neighbor_hit = tx.execute(
        &update_sql,
        params![position, neighbor_id, neighbor_position],
    )?;
    if target_hit != 1 || neighbor_hit != 1 {
        tx.rollback()?;
        return Ok(ReorderOutcome::Conflict);
    }
    tx.commit()?;
    Ok(ReorderOutcome::Swapped)
}

/// Position for a row appended to `parent_id`: max+1, or 1 for the first
/// child. Deletions do not compact, so this can leave gaps; the reorder
/// protocol never relies on contiguity.
pub fn next_position(
    conn: &Connection,
    set: SiblingSet,
    parent_id: &str,
) -> rusqlite::Result<i64> {
    let sql = format!(
        "SELECT COALESCE(MAX(position), 0) FROM {} WHERE {} = ?",
        set.table, set.parent_column
    );
    let max: i64 = conn.query_row(&sql, [parent_id], |r| r.get(0))?;
    Ok(max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "CREATE TABLE qcm_pages(
                id TEXT PRIMARY KEY,
                qcm_id TEXT NOT NULL,
                name TEXT NOT NULL,
                position INTEGER NOT NULL
            );
            CREATE TABLE questions(
                id TEXT PRIMARY KEY,
                qcm_id TEXT NOT NULL,
                page_id TEXT NOT NULL,
                text TEXT NOT NULL,
                kind TEXT NOT NULL,
                options_json TEXT NOT NULL,
                correct_answers_json TEXT NOT NULL,
                explanation TEXT,
                position INTEGER NOT NULL
            );",
        )
        .expect("create tables");
        conn
    }

    fn insert_page(conn: &Connection, id: &str, qcm_id: &str, position: i64) {
        conn.execute(
            "INSERT INTO qcm_pages(id, qcm_id, name, position) VALUES(?, ?, ?, ?)",
            params![id, qcm_id, format!("page {}", id), position],
        )
        .expect("insert page");
    }

    fn positions(conn: &Connection, qcm_id: &str) -> Vec<(String, i64)> {
        let mut stmt = conn
            .prepare("SELECT id, position FROM qcm_pages WHERE qcm_id = ? ORDER BY position")
            .expect("prepare");
        stmt.query_map([qcm_id], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect")
    }

    #[test]
    fn swaps_with_predecessor_on_up() {
        let conn = test_conn();
        insert_page(&conn, "a", "q1", 1);
        insert_page(&conn, "b", "q1", 2);
        insert_page(&conn, "c", "q1", 3);

        let out = reorder(&conn, QCM_PAGES, "b", Direction::Up).expect("reorder");
        assert_eq!(out, ReorderOutcome::Swapped);
        assert_eq!(
            positions(&conn, "q1"),
            vec![
                ("b".to_string(), 1),
                ("a".to_string(), 2),
                ("c".to_string(), 3)
            ]
        );
    }

    #[test]
    fn first_item_up_is_a_noop() {
        let conn = test_conn();
        insert_page(&conn, "a", "q1", 1);
        insert_page(&conn, "b", "q1", 2);

        let out = reorder(&conn, QCM_PAGES, "a", Direction::Up).expect("reorder");
        assert_eq!(out, ReorderOutcome::AtBoundary);
        assert_eq!(
            positions(&conn, "q1"),
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn last_item_down_is_a_noop() {
        let conn = test_conn();
        insert_page(&conn, "a", "q1", 1);
        insert_page(&conn, "b", "q1", 2);

        let out = reorder(&conn, QCM_PAGES, "b", Direction::Down).expect("reorder");
        assert_eq!(out, ReorderOutcome::AtBoundary);
        assert_eq!(
            positions(&conn, "q1"),
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn down_then_up_restores_order() {
        let conn = test_conn();
        insert_page(&conn, "a", "q1", 1);
        insert_page(&conn, "b", "q1", 2);
        insert_page(&conn, "c", "q1", 3);

        assert_eq!(
            reorder(&conn, QCM_PAGES, "b", Direction::Down).expect("down"),
            ReorderOutcome::Swapped
        );
        assert_eq!(
            reorder(&conn, QCM_PAGES, "b", Direction::Up).expect("up"),
            ReorderOutcome::Swapped
        );
        assert_eq!(
            positions(&conn, "q1"),
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 3)
            ]
        );
    }

    #[test]
    fn gaps_still_move_one_step() {
        // Deletions leave holes; the swap must pick the closest sibling,
        // not position-1.
        let conn = test_conn();
        insert_page(&conn, "a", "q1", 1);
        insert_page(&conn, "b", "q1", 3);
        insert_page(&conn, "c", "q1", 7);

        let out = reorder(&conn, QCM_PAGES, "b", Direction::Up).expect("reorder");
        assert_eq!(out, ReorderOutcome::Swapped);
        assert_eq!(
            positions(&conn, "q1"),
            vec![
                ("b".to_string(), 1),
                ("a".to_string(), 3),
                ("c".to_string(), 7)
            ]
        );

        let out = reorder(&conn, QCM_PAGES, "a", Direction::Down).expect("reorder");
        assert_eq!(out, ReorderOutcome::Swapped);
        assert_eq!(
            positions(&conn, "q1"),
            vec![
                ("b".to_string(), 1),
                ("c".to_string(), 3),
                ("a".to_string(), 7)
            ]
        );
    }

    #[test]
    fn unknown_id_is_not_found_and_mutates_nothing() {
        let conn = test_conn();
        insert_page(&conn, "a", "q1", 1);
        insert_page(&conn, "b", "q1", 2);

        let err = reorder(&conn, QCM_PAGES, "missing", Direction::Up)
            .expect_err("should fail");
        assert!(matches!(err, ReorderError::NotFound));
        assert_eq!(
            positions(&conn, "q1"),
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn other_parents_are_untouched() {
        let conn = test_conn();
        insert_page(&conn, "a", "q1", 1);
        insert_page(&conn, "b", "q1", 2);
        insert_page(&conn, "x", "q2", 1);
        insert_page(&conn, "y", "q2", 2);

        reorder(&conn, QCM_PAGES, "b", Direction::Up).expect("reorder");
        assert_eq!(
            positions(&conn, "q2"),
            vec![("x".to_string(), 1), ("y".to_string(), 2)]
        );
    }

    #[test]
    fn question_set_orders_within_its_page() {
        let conn = test_conn();
        for (id, page, pos) in [("qa", "p1", 1), ("qb", "p1", 2), ("qc", "p2", 1)] {
            conn.execute(
                "INSERT INTO questions(id, qcm_id, page_id, text, kind, options_json, correct_answers_json, position)
                 VALUES(?, 'q1', ?, 'text', 'single', '[]', '[]', ?)",
                params![id, page, pos],
            )
            .expect("insert question");
        }

        let out = reorder(&conn, PAGE_QUESTIONS, "qb", Direction::Up).expect("reorder");
        assert_eq!(out, ReorderOutcome::Swapped);
        let pos: i64 = conn
            .query_row("SELECT position FROM questions WHERE id = 'qb'", [], |r| {
                r.get(0)
            })
            .expect("query");
        assert_eq!(pos, 1);
        let other: i64 = conn
            .query_row("SELECT position FROM questions WHERE id = 'qc'", [], |r| {
                r.get(0)
            })
            .expect("query");
        assert_eq!(other, 1);
    }

    #[test]
    fn next_position_appends_after_max() {
        let conn = test_conn();
        assert_eq!(next_position(&conn, QCM_PAGES, "q1").expect("next"), 1);
        insert_page(&conn, "a", "q1", 1);
        insert_page(&conn, "b", "q1", 5);
        assert_eq!(next_position(&conn, QCM_PAGES, "q1").expect("next"), 6);
    }

}
